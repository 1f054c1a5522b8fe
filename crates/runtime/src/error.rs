//! VM execution errors.
//!
//! Covers stack underflow, undefined globals, arity and type mismatches,
//! out-of-range indexing, an unbalanced operand stack at function exit,
//! stack overflow, calling a non-callable value, and a host builtin
//! rejecting its own arguments for some other reason (`Native`).

use somire_core::ValueError;
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionError {
    StackEmpty,
    UndefinedGlobal(String),
    ArityMismatch { expected: usize, got: usize },
    Value(ValueError),
    IndexOutOfRange { index: i32, len: usize },
    UnclosedStack { left: usize },
    StackOverflow,
    NotCallable(&'static str),
    InvalidLocal(i16),
    InvalidUpvalue(i16),
    /// A host builtin (`bool`, `list.add`, ...) rejected its arguments for a
    /// reason other than arity -- wrong value type, an out-of-range `pos`,
    /// and so on. Carries the builtin's own message verbatim.
    Native(String),
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionError::StackEmpty => write!(f, "operand stack is empty"),
            ExecutionError::UndefinedGlobal(name) => write!(f, "undefined global '{name}'"),
            ExecutionError::ArityMismatch { expected, got } => {
                write!(f, "expected {expected} argument(s), got {got}")
            }
            ExecutionError::Value(e) => write!(f, "{e}"),
            ExecutionError::IndexOutOfRange { index, len } => {
                write!(f, "index {index} out of range for list of length {len}")
            }
            ExecutionError::UnclosedStack { left } => {
                write!(f, "function exit left {left} extra value(s) on the stack")
            }
            ExecutionError::StackOverflow => write!(f, "stack overflow"),
            ExecutionError::NotCallable(kind) => write!(f, "value of kind '{kind}' is not callable"),
            ExecutionError::InvalidLocal(idx) => write!(f, "invalid local index {idx}"),
            ExecutionError::InvalidUpvalue(idx) => write!(f, "invalid upvalue index {idx}"),
            ExecutionError::Native(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ExecutionError {}

impl From<ValueError> for ExecutionError {
    fn from(e: ValueError) -> ExecutionError {
        ExecutionError::Value(e)
    }
}
