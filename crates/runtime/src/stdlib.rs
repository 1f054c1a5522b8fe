//! Standard-library builtins preloaded into the VM's globals namespace.
//!
//! Each binding is a [`CFunction`]: a fixed Rust function plus an optional
//! fixed arity. `list.add`/`list.size` are registered under the literal
//! names `list.add`/`list.size` -- the compiler resolves `list.add(...)` by
//! looking up that exact global name, the same way any other identifier
//! reaches a `GLOBAL` opcode.

use somire_core::{ops, CFunction, GcList, Heap, HeapObject, Value};
use std::io::Write as _;

use crate::vm::Vm;

pub fn install(vm: &Vm) {
    // `log` is genuinely variadic; every other builtin has a fixed arity
    // the VM checks before the call ever reaches Rust.
    define(vm, "log", None, log);
    define(vm, "repr", Some(1), repr);
    define(vm, "write", Some(1), write_stdout);
    define(vm, "writeLine", Some(1), write_line);
    define(vm, "bool", Some(1), to_bool);
    define(vm, "list.add", None, list_add);
    define(vm, "list.size", Some(1), list_size);
}

fn define(vm: &Vm, name: &'static str, arity: Option<usize>, func: somire_core::object::CFunctionPtr) {
    let root = vm.heap().alloc(HeapObject::CFunction(CFunction { name, arity, func }));
    vm.define_global(name, root.value());
}

fn log(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let rendered: Vec<String> = args.iter().map(|v| ops::to_string(heap, *v)).collect();
    println!("{}", rendered.join(" "));
    Ok(Value::NIL)
}

fn repr(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().ok_or("repr expects 1 argument")?;
    let rendered = ops::to_repr(heap, v);
    let root = heap.alloc(HeapObject::String(somire_core::GcString::new(rendered)));
    Ok(root.value())
}

fn write_stdout(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().ok_or("write expects 1 argument")?;
    let s = as_string(heap, v)?;
    print!("{s}");
    std::io::stdout().flush().map_err(|e| e.to_string())?;
    Ok(Value::NIL)
}

fn write_line(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().ok_or("writeLine expects 1 argument")?;
    let s = as_string(heap, v)?;
    println!("{s}");
    Ok(Value::NIL)
}

fn to_bool(_heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().ok_or("bool expects 1 argument")?;
    match v.as_bool() {
        Some(b) => Ok(Value::bool(b)),
        None => Err(format!("bool() expects a bool, got {}", v.kind_name())),
    }
}

fn list_add(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    if args.len() != 2 && args.len() != 3 {
        return Err("list.add expects 2 or 3 arguments".to_string());
    }
    let handle = args[0].as_handle().filter(|h| heap.get(*h).as_list().is_some());
    let handle = handle.ok_or_else(|| format!("list.add() expects a list, got {}", args[0].kind_name()))?;
    let value = args[1];
    // `pos` is 1-based, matching list indexing elsewhere: 1 inserts before the
    // first element, `len + 1` appends.
    let pos = match args.get(2) {
        Some(p) => {
            let pos = p.as_int().ok_or("list.add() position must be an int")?;
            if pos < 1 {
                return Err(format!("list.add() position {pos} out of range"));
            }
            pos as usize
        }
        None => heap.get(handle).as_list().unwrap().items.len() + 1,
    };
    let mut obj = heap.get_mut(handle);
    let list = obj.as_list_mut().unwrap();
    if pos > list.items.len() + 1 {
        return Err(format!("list.add() position {pos} out of range"));
    }
    list.items.insert(pos - 1, value);
    drop(obj);
    Ok(Value::NIL)
}

fn list_size(heap: &Heap, args: &[Value]) -> Result<Value, String> {
    let v = args.first().copied().ok_or("list.size expects 1 argument")?;
    let handle = v.as_handle().ok_or_else(|| format!("list.size() expects a list, got {}", v.kind_name()))?;
    let obj = heap.get(handle);
    let list: &GcList = obj.as_list().ok_or_else(|| format!("list.size() expects a list, got {}", obj.kind_name()))?;
    Ok(Value::int(list.items.len() as i32))
}

fn as_string(heap: &Heap, v: Value) -> Result<String, String> {
    let handle = v.as_handle().ok_or_else(|| format!("expected a string, got {}", v.kind_name()))?;
    let obj = heap.get(handle);
    let s = obj.as_string().ok_or_else(|| format!("expected a string, got {}", obj.kind_name()))?;
    Ok(s.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bool_accepts_only_bool() {
        let heap = Heap::new();
        assert!(to_bool(&heap, &[Value::bool(true)]).unwrap().as_bool().unwrap());
        assert!(to_bool(&heap, &[Value::int(1)]).is_err());
    }

    #[test]
    fn repr_quotes_strings() {
        let heap = Heap::new();
        let root = heap.alloc(HeapObject::String(somire_core::GcString::new("hi")));
        let result = repr(&heap, &[root.value()]).unwrap();
        let handle = result.as_handle().unwrap();
        let obj = heap.get(handle);
        assert_eq!(obj.as_string().unwrap().as_str(), "\"hi\"");
    }

    #[test]
    fn list_add_inserts_at_position() {
        let heap = Heap::new();
        let list_root = heap.alloc(HeapObject::List(GcList::new()));
        list_add(&heap, &[list_root.value(), Value::int(1)]).unwrap();
        list_add(&heap, &[list_root.value(), Value::int(2)]).unwrap();
        list_add(&heap, &[list_root.value(), Value::int(0), Value::int(1)]).unwrap();
        let obj = heap.get(list_root.handle());
        let items: Vec<i32> = obj.as_list().unwrap().items.iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(items, vec![0, 1, 2]);
    }

    #[test]
    fn list_add_rejects_position_below_one() {
        let heap = Heap::new();
        let list_root = heap.alloc(HeapObject::List(GcList::new()));
        let err = list_add(&heap, &[list_root.value(), Value::int(1), Value::int(0)]);
        assert!(err.is_err());
    }

    #[test]
    fn list_add_rejects_out_of_range_position() {
        let heap = Heap::new();
        let list_root = heap.alloc(HeapObject::List(GcList::new()));
        let err = list_add(&heap, &[list_root.value(), Value::int(1), Value::int(5)]);
        assert!(err.is_err());
    }

    #[test]
    fn list_size_counts_elements() {
        let heap = Heap::new();
        let list_root = heap.alloc(HeapObject::List(GcList::from_vec(vec![Value::int(1), Value::int(2), Value::int(3)])));
        let result = list_size(&heap, &[list_root.value()]).unwrap();
        assert_eq!(result.as_int(), Some(3));
    }

    #[test]
    fn list_size_rejects_non_list() {
        let heap = Heap::new();
        assert!(list_size(&heap, &[Value::int(1)]).is_err());
    }
}
