//! Total value operations: arithmetic, comparison, coercion, `toString`.
//!
//! These are the operations §4.2 of the design describes; they are kept
//! separate from [`crate::value::Value`] itself because several of them
//! (structural equality of lists, rendering an object's contents) need to
//! reach into the heap, while `Value` stays a plain `Copy` bit pattern.

use crate::gc::Heap;
use crate::object::HeapObject;
use crate::value::Value;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    TypeMismatch { op: &'static str, lhs: &'static str, rhs: &'static str },
    DivideByZero,
}

impl fmt::Display for ValueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueError::TypeMismatch { op, lhs, rhs } => {
                write!(f, "type mismatch: cannot apply '{op}' to {lhs} and {rhs}")
            }
            ValueError::DivideByZero => write!(f, "divide by zero"),
        }
    }
}

impl std::error::Error for ValueError {}

type VResult = Result<Value, ValueError>;

fn mismatch(op: &'static str, a: Value, b: Value) -> ValueError {
    ValueError::TypeMismatch { op, lhs: a.kind_name(), rhs: b.kind_name() }
}

/// `int (+) int -> int`; widens to `real` if either side is `real`;
/// anything else is a type mismatch.
pub fn add(a: Value, b: Value) -> VResult {
    numeric_binop("+", a, b, |x, y| x.wrapping_add(y), |x, y| x + y)
}

pub fn subtract(a: Value, b: Value) -> VResult {
    numeric_binop("-", a, b, |x, y| x.wrapping_sub(y), |x, y| x - y)
}

pub fn multiply(a: Value, b: Value) -> VResult {
    numeric_binop("*", a, b, |x, y| x.wrapping_mul(y), |x, y| x * y)
}

fn numeric_binop(
    op: &'static str,
    a: Value,
    b: Value,
    int_op: impl Fn(i32, i32) -> i32,
    real_op: impl Fn(f64, f64) -> f64,
) -> VResult {
    match (a.as_int(), b.as_int()) {
        (Some(x), Some(y)) => return Ok(Value::int(int_op(x, y))),
        _ => {}
    }
    if a.is_numeric() && b.is_numeric() {
        Ok(Value::real(real_op(a.to_f64(), b.to_f64())))
    } else {
        Err(mismatch(op, a, b))
    }
}

/// `/` always yields `real`, even for two ints.
pub fn divide(a: Value, b: Value) -> VResult {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(mismatch("/", a, b));
    }
    if let (Some(_), Some(0)) = (a.as_int(), b.as_int()) {
        return Err(ValueError::DivideByZero);
    }
    let rhs = b.to_f64();
    if rhs == 0.0 {
        return Err(ValueError::DivideByZero);
    }
    Ok(Value::real(a.to_f64() / rhs))
}

/// Modulo: integer remainder for `int % int`, mathematical `fmod` once
/// either side is `real`.
pub fn modulo(a: Value, b: Value) -> VResult {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(mismatch("%", a, b));
    }
    if let (Some(x), Some(y)) = (a.as_int(), b.as_int()) {
        if y == 0 {
            return Err(ValueError::DivideByZero);
        }
        return Ok(Value::int(x.wrapping_rem(y)));
    }
    let rhs = b.to_f64();
    if rhs == 0.0 {
        return Err(ValueError::DivideByZero);
    }
    Ok(Value::real(a.to_f64() % rhs))
}

/// `^`: nonnegative int exponent uses integer exponentiation-by-squaring;
/// a negative or real exponent widens both sides to `real` and uses `pow`.
pub fn power(a: Value, b: Value) -> VResult {
    if !a.is_numeric() || !b.is_numeric() {
        return Err(mismatch("^", a, b));
    }
    if let (Some(base), Some(exp)) = (a.as_int(), b.as_int()) {
        if exp >= 0 {
            return Ok(Value::int(base.wrapping_pow(exp as u32)));
        }
    }
    Ok(Value::real(a.to_f64().powf(b.to_f64())))
}

/// Numeric negation, or an object that implements its own negate -- the
/// spec mentions "object-with-negate" but no object kind currently
/// supports it, so only numerics are handled.
pub fn negate(a: Value) -> VResult {
    if let Some(n) = a.as_int() {
        Ok(Value::int(n.wrapping_neg()))
    } else if let Some(r) = a.as_real() {
        Ok(Value::real(-r))
    } else {
        Err(ValueError::TypeMismatch { op: "unary -", lhs: a.kind_name(), rhs: a.kind_name() })
    }
}

pub fn logical_not(a: Value) -> VResult {
    match a.as_bool() {
        Some(b) => Ok(Value::bool(!b)),
        None => Err(ValueError::TypeMismatch { op: "not", lhs: a.kind_name(), rhs: a.kind_name() }),
    }
}

/// Strict `and`: both sides are evaluated and popped before this runs (the
/// compiler chooses whether to short-circuit by emitting jumps instead).
pub fn logical_and(a: Value, b: Value) -> VResult {
    match (a.as_bool(), b.as_bool()) {
        (Some(x), Some(y)) => Ok(Value::bool(x && y)),
        _ => Err(mismatch("and", a, b)),
    }
}

pub fn logical_or(a: Value, b: Value) -> VResult {
    match (a.as_bool(), b.as_bool()) {
        (Some(x), Some(y)) => Ok(Value::bool(x || y)),
        _ => Err(mismatch("or", a, b)),
    }
}

/// Structural equality: total over every pair of values. Numerics compare
/// cross-type after widening; strings compare by byte equality; lists
/// compare elementwise.
pub fn equals(heap: &Heap, a: Value, b: Value) -> bool {
    if a.is_nil() && b.is_nil() {
        return true;
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return x == y;
    }
    if a.is_numeric() && b.is_numeric() {
        return a.to_f64() == b.to_f64();
    }
    match (a.as_handle(), b.as_handle()) {
        (Some(ha), Some(hb)) => {
            let oa = heap.get(ha);
            let ob = heap.get(hb);
            match (&*oa, &*ob) {
                (HeapObject::String(sa), HeapObject::String(sb)) => sa.as_str() == sb.as_str(),
                (HeapObject::List(la), HeapObject::List(lb)) => {
                    if la.items.len() != lb.items.len() {
                        return false;
                    }
                    let (la, lb) = (la.items.clone(), lb.items.clone());
                    drop(oa);
                    drop(ob);
                    la.iter().zip(lb.iter()).all(|(x, y)| equals(heap, *x, *y))
                }
                _ => ha == hb,
            }
        }
        _ => false,
    }
}

pub fn not_equals(heap: &Heap, a: Value, b: Value) -> bool {
    !equals(heap, a, b)
}

fn require_numeric_pair(op: &'static str, a: Value, b: Value) -> Result<(f64, f64), ValueError> {
    if a.is_numeric() && b.is_numeric() {
        Ok((a.to_f64(), b.to_f64()))
    } else {
        Err(mismatch(op, a, b))
    }
}

pub fn less_than(a: Value, b: Value) -> Result<bool, ValueError> {
    require_numeric_pair("<", a, b).map(|(x, y)| x < y)
}

pub fn less_or_equal(a: Value, b: Value) -> Result<bool, ValueError> {
    require_numeric_pair("<=", a, b).map(|(x, y)| x <= y)
}

pub fn greater_than(a: Value, b: Value) -> Result<bool, ValueError> {
    require_numeric_pair(">", a, b).map(|(x, y)| x > y)
}

pub fn greater_or_equal(a: Value, b: Value) -> Result<bool, ValueError> {
    require_numeric_pair(">=", a, b).map(|(x, y)| x >= y)
}

/// Shortest round-trip rendering of a double, with a trailing `.0` when
/// Rust's formatter would otherwise print an integer-looking literal.
pub fn format_real(n: f64) -> String {
    if n.is_infinite() {
        return if n > 0.0 { "inf".to_string() } else { "-inf".to_string() };
    }
    if n.is_nan() {
        return "nan".to_string();
    }
    let s = format!("{n}");
    if s.contains('.') || s.contains('e') || s.contains('E') {
        s
    } else {
        format!("{s}.0")
    }
}

/// Canonical rendering used by `repr`/`toString` and the `list` literal
/// syntax.
pub fn to_string(heap: &Heap, v: Value) -> String {
    if v.is_nil() {
        return "nil".to_string();
    }
    if let Some(b) = v.as_bool() {
        return b.to_string();
    }
    if let Some(n) = v.as_int() {
        return n.to_string();
    }
    if let Some(n) = v.as_real() {
        return format_real(n);
    }
    if let Some(h) = v.as_handle() {
        let obj = heap.get(h);
        return match &*obj {
            HeapObject::String(s) => format!("{:?}", s.as_str()),
            HeapObject::List(l) => {
                let items = l.items.clone();
                drop(obj);
                let parts: Vec<String> = items.iter().map(|e| to_repr(heap, *e)).collect();
                format!("[{}]", parts.join(", "))
            }
            _ => format!("<{} {}>", obj.kind_name(), h.0),
        };
    }
    unreachable!("value is neither primitive nor object")
}

/// Like `to_string` but quotes strings (used when rendering list elements
/// and for the `repr` builtin, which always shows strings quoted).
pub fn to_repr(heap: &Heap, v: Value) -> String {
    to_string(heap, v)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcList, GcString, HeapObject};

    #[test]
    fn int_plus_int_is_int() {
        assert_eq!(add(Value::int(1), Value::int(2)).unwrap().as_int(), Some(3));
    }

    #[test]
    fn int_plus_real_widens() {
        let r = add(Value::int(1), Value::real(2.5)).unwrap();
        assert_eq!(r.as_real(), Some(3.5));
    }

    #[test]
    fn divide_always_yields_real() {
        let r = divide(Value::int(4), Value::int(2)).unwrap();
        assert_eq!(r.as_real(), Some(2.0));
    }

    #[test]
    fn divide_by_zero_errors() {
        assert_eq!(divide(Value::int(1), Value::int(0)), Err(ValueError::DivideByZero));
        assert_eq!(divide(Value::real(1.0), Value::real(0.0)), Err(ValueError::DivideByZero));
    }

    #[test]
    fn negative_power_widens_to_real() {
        let r = power(Value::int(2), Value::int(-1)).unwrap();
        assert_eq!(r.as_real(), Some(0.5));
    }

    #[test]
    fn equals_cross_compares_numerics() {
        let heap = Heap::new();
        assert!(equals(&heap, Value::int(2), Value::real(2.0)));
        assert!(!equals(&heap, Value::int(2), Value::real(2.1)));
    }

    #[test]
    fn equals_compares_strings_by_bytes() {
        let heap = Heap::new();
        let a = heap.alloc(HeapObject::String(GcString::new("hi")));
        let b = heap.alloc(HeapObject::String(GcString::new("hi")));
        assert!(equals(&heap, a.value(), b.value()));
    }

    #[test]
    fn equals_compares_lists_elementwise() {
        let heap = Heap::new();
        let a = heap.alloc(HeapObject::List(GcList::from_vec(vec![Value::int(1), Value::int(2)])));
        let b = heap.alloc(HeapObject::List(GcList::from_vec(vec![Value::int(1), Value::int(2)])));
        let c = heap.alloc(HeapObject::List(GcList::from_vec(vec![Value::int(1), Value::int(3)])));
        assert!(equals(&heap, a.value(), b.value()));
        assert!(!equals(&heap, a.value(), c.value()));
    }

    #[test]
    fn to_string_renders_lists() {
        let heap = Heap::new();
        let l = heap.alloc(HeapObject::List(GcList::from_vec(vec![
            Value::int(1),
            Value::int(2),
            Value::int(3),
        ])));
        assert_eq!(to_string(&heap, l.value()), "[1, 2, 3]");
    }
}
