//! Somire core: NaN-boxed values, the tracing garbage collector, the heap
//! object hierarchy, and the bytecode chunk format.
//!
//! This crate is the shared foundation between the compiler (which builds a
//! [`chunk::Chunk`]) and the VM (which executes one) -- the chunk is the
//! stable boundary between the two.
//!
//! # Modules
//!
//! - `value`: the 64-bit NaN-boxed `Value`
//! - `gc`: the tracing mark-and-sweep heap and scoped `Root` pins
//! - `object`: heap object kinds (strings, lists, namespaces, closures, ...)
//! - `ops`: total value operations (arithmetic, comparison, `toString`)
//! - `chunk`: opcodes, `Chunk`/`FunctionChunk`, and `.sbf` serialization

pub mod chunk;
pub mod gc;
pub mod object;
pub mod ops;
pub mod value;

pub use chunk::{Chunk, ChunkError, FunctionChunk, Instr, Op};
pub use gc::{Heap, Root};
pub use object::{CFunction, FunctionObj, GcList, GcString, HeapObject, Namespace, UpvalueObj};
pub use ops::ValueError;
pub use value::{Handle, Value};
