//! The stack-based bytecode interpreter.
//!
//! `Vm::run` drives a classical fetch-decode-execute loop over a [`Chunk`]:
//! it owns the operand stack, the call-frame vector, and the heap, and it
//! is the only thing that ever mutates any of the three. Execution never
//! crosses a thread boundary and never suspends mid-instruction, which is
//! what lets the garbage collector treat "between instructions" as the
//! only point at which it needs a consistent view of the world.

use crate::error::ExecutionError;
use crate::frame::CallFrame;
use somire_core::{decode, ops, Chunk, FunctionObj, GcList, HeapObject, Instr, Namespace, Root, UpvalueObj, Value};

/// Bounded so that open upvalues can address stack slots by `(frame_id,
/// local_index)` without the stack ever reallocating underneath them.
const STACK_MAX: usize = 64 * 1024;
const MAX_CALL_DEPTH: usize = 1024;

pub struct Vm {
    heap: somire_core::Heap,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: Root<HeapObject>,
    next_frame_id: u64,
}

type EResult<T> = Result<T, ExecutionError>;

impl Vm {
    pub fn new(heap: somire_core::Heap) -> Vm {
        let globals = heap.alloc(HeapObject::Namespace(Namespace::new()));
        Vm { heap, stack: Vec::with_capacity(256), frames: Vec::new(), globals, next_frame_id: 0 }
    }

    pub fn heap(&self) -> &somire_core::Heap {
        &self.heap
    }

    /// Registers a standard-library binding in the globals namespace,
    /// addressable from bytecode via `GLOBAL`.
    pub fn define_global(&self, name: &str, value: Value) {
        if let HeapObject::Namespace(ns) = &mut *self.heap.get_mut(self.globals.handle()) {
            ns.set(name, value);
        }
    }

    /// Runs `chunk` from function 0 to completion, returning the top-level
    /// program's result value.
    pub fn run(&mut self, chunk: &Chunk) -> EResult<Value> {
        let frame = CallFrame::new(self.next_frame_id, 0, 0, None);
        self.next_frame_id += 1;
        self.frames.push(frame);
        self.execute(chunk)
    }

    fn push(&mut self, v: Value) -> EResult<()> {
        if self.stack.len() >= STACK_MAX {
            return Err(ExecutionError::StackOverflow);
        }
        self.stack.push(v);
        Ok(())
    }

    fn pop(&mut self) -> EResult<Value> {
        self.stack.pop().ok_or(ExecutionError::StackEmpty)
    }

    fn pop_bool(&mut self) -> EResult<bool> {
        let v = self.pop()?;
        v.as_bool().ok_or_else(|| ExecutionError::Value(somire_core::ValueError::TypeMismatch {
            op: "condition",
            lhs: v.kind_name(),
            rhs: v.kind_name(),
        }))
    }

    fn execute(&mut self, chunk: &Chunk) -> EResult<Value> {
        loop {
            let top = self.frames.last().expect("at least one frame while executing");
            let code = &chunk.functions[top.function_index as usize].code;
            if top.pc >= code.len() {
                // Implicit return: end of function body without RETURN.
                self.push(Value::NIL)?;
                if self.do_return()?.is_some() {
                    continue;
                } else {
                    return Ok(self.pop()?);
                }
            }
            let (instr, next_pc) = decode(code, top.pc);
            self.frames.last_mut().unwrap().pc = next_pc;
            self.heap.step(self.stack.iter().copied());

            match instr {
                Instr::Ignore => {
                    self.pop()?;
                }
                Instr::Constant(idx) => {
                    let v = *chunk.constants.get(idx as usize).ok_or(ExecutionError::InvalidLocal(idx as i16))?;
                    self.push(v)?;
                }
                Instr::UniMinus => {
                    let v = self.pop()?;
                    self.push(ops::negate(v)?)?;
                }
                Instr::Not => {
                    let v = self.pop()?;
                    self.push(ops::logical_not(v)?)?;
                }
                Instr::BinPlus => self.binop(ops::add)?,
                Instr::BinMinus => self.binop(ops::subtract)?,
                Instr::BinMultiply => self.binop(ops::multiply)?,
                Instr::BinDivide => self.binop(ops::divide)?,
                Instr::BinModulo => self.binop(ops::modulo)?,
                Instr::BinPower => self.binop(ops::power)?,
                Instr::BinAnd => self.binop(ops::logical_and)?,
                Instr::BinOr => self.binop(ops::logical_or)?,
                Instr::BinEquals => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::bool(ops::equals(&self.heap, a, b)))?;
                }
                Instr::BinLess => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::bool(ops::less_than(a, b)?))?;
                }
                Instr::BinLessOrEq => {
                    let b = self.pop()?;
                    let a = self.pop()?;
                    self.push(Value::bool(ops::less_or_equal(a, b)?))?;
                }
                Instr::BinIndex => {
                    let index = self.pop()?;
                    let list = self.pop()?;
                    self.push(self.index_list(list, index)?)?;
                }
                Instr::Let => {
                    // The value is already in place on the stack; LET just
                    // marks it as a named local, which is a compile-time-only
                    // concept the VM doesn't need to track.
                }
                Instr::Pop(n) => {
                    self.pop_locals(n as usize)?;
                }
                Instr::SetLocal(idx) => {
                    let v = self.pop()?;
                    self.set_local_or_upvalue(idx, v)?;
                }
                Instr::Local(idx) => {
                    let v = self.local_or_upvalue(idx)?;
                    self.push(v)?;
                }
                Instr::Global(idx) => {
                    let name_v = *chunk.constants.get(idx as usize).ok_or(ExecutionError::InvalidLocal(idx as i16))?;
                    let name_handle = name_v.as_handle().expect("GLOBAL name constant must be a string");
                    let name = self.heap.get(name_handle).as_string().expect("GLOBAL name constant must be a string").as_str().to_string();
                    let value = match &*self.heap.get(self.globals.handle()) {
                        HeapObject::Namespace(ns) => ns.get(&name),
                        _ => None,
                    };
                    let value = value.ok_or(ExecutionError::UndefinedGlobal(name))?;
                    self.push(value)?;
                }
                Instr::JumpIfNot(rel) => {
                    let cond = self.pop_bool()?;
                    if !cond {
                        self.jump(next_pc, rel);
                    }
                }
                Instr::Jump(rel) => {
                    self.jump(next_pc, rel);
                }
                Instr::Call(argc) => {
                    if self.frames.len() >= MAX_CALL_DEPTH {
                        return Err(ExecutionError::StackOverflow);
                    }
                    self.call(argc as usize)?;
                }
                Instr::Return => {
                    if self.do_return()?.is_none() {
                        return Ok(self.pop()?);
                    }
                }
                Instr::MakeFunc { proto, argc, upvalues } => {
                    self.make_func(proto, argc, &upvalues)?;
                }
                Instr::MakeList(n) => {
                    self.make_list(n as usize)?;
                }
            }
        }
    }

    fn binop(&mut self, f: impl Fn(Value, Value) -> Result<Value, somire_core::ValueError>) -> EResult<()> {
        let b = self.pop()?;
        let a = self.pop()?;
        self.push(f(a, b)?)?;
        Ok(())
    }

    fn jump(&mut self, next_pc: usize, rel: i16) {
        let target = (next_pc as i64 + rel as i64) as usize;
        self.frames.last_mut().unwrap().pc = target;
    }

    fn index_list(&self, list: Value, index: Value) -> EResult<Value> {
        let handle = list.as_handle().ok_or(ExecutionError::NotCallable(list.kind_name()))?;
        let idx = index.as_int().ok_or(ExecutionError::Value(somire_core::ValueError::TypeMismatch {
            op: "[]",
            lhs: list.kind_name(),
            rhs: index.kind_name(),
        }))?;
        let obj = self.heap.get(handle);
        let items = &obj.as_list().ok_or(ExecutionError::NotCallable(obj.kind_name()))?.items;
        if idx < 1 || idx as usize > items.len() {
            return Err(ExecutionError::IndexOutOfRange { index: idx, len: items.len() });
        }
        Ok(items[idx as usize - 1])
    }

    /// Resolves a `LOCAL`/`SET_LOCAL` index: non-negative addresses a stack
    /// slot in the current frame, negative addresses one of the current
    /// function's own upvalues (`-idx - 1`).
    fn local_or_upvalue(&self, idx: i16) -> EResult<Value> {
        let frame = self.frames.last().unwrap();
        if idx >= 0 {
            let slot = frame.local_base + idx as usize;
            self.stack.get(slot).copied().ok_or(ExecutionError::InvalidLocal(idx))
        } else {
            let upv_idx = (-idx - 1) as usize;
            let func = frame.function_root.as_ref().ok_or(ExecutionError::InvalidUpvalue(idx))?;
            let obj = self.heap.get(func.handle());
            let upvalue_cell = *obj
                .as_function()
                .ok_or(ExecutionError::InvalidUpvalue(idx))?
                .upvalues
                .get(upv_idx)
                .ok_or(ExecutionError::InvalidUpvalue(idx))?;
            drop(obj);
            self.resolve_upvalue(upvalue_cell)
        }
    }

    fn set_local_or_upvalue(&mut self, idx: i16, v: Value) -> EResult<()> {
        if idx >= 0 {
            let slot = self.frames.last().unwrap().local_base + idx as usize;
            if slot >= self.stack.len() {
                return Err(ExecutionError::InvalidLocal(idx));
            }
            self.stack[slot] = v;
            Ok(())
        } else {
            let upv_idx = (-idx - 1) as usize;
            let frame = self.frames.last().unwrap();
            let func = frame.function_root.as_ref().ok_or(ExecutionError::InvalidUpvalue(idx))?.clone();
            let upvalue_cell = {
                let obj = self.heap.get(func.handle());
                *obj.as_function().ok_or(ExecutionError::InvalidUpvalue(idx))?.upvalues.get(upv_idx).ok_or(ExecutionError::InvalidUpvalue(idx))?
            };
            self.write_upvalue(upvalue_cell, v)
        }
    }

    /// Dereferences an `Upvalue` object, reading through to the captured
    /// stack slot if still open or to its own storage once closed.
    fn resolve_upvalue(&self, upvalue: Value) -> EResult<Value> {
        let handle = upvalue.as_handle().expect("upvalue cell is always a heap object");
        let obj = self.heap.get(handle);
        match obj.as_upvalue().expect("upvalue slot must hold an Upvalue object") {
            UpvalueObj::Closed(v) => Ok(*v),
            UpvalueObj::Open { frame_id, local_index } => {
                let (frame_id, local_index) = (*frame_id, *local_index);
                drop(obj);
                let frame = self
                    .frames
                    .iter()
                    .find(|f| f.frame_id == frame_id)
                    .ok_or(ExecutionError::InvalidUpvalue(local_index as i16))?;
                let slot = frame.local_base + local_index as usize;
                self.stack.get(slot).copied().ok_or(ExecutionError::InvalidUpvalue(local_index as i16))
            }
        }
    }

    fn write_upvalue(&mut self, upvalue: Value, value: Value) -> EResult<()> {
        let handle = upvalue.as_handle().expect("upvalue cell is always a heap object");
        let (frame_id, local_index) = {
            let obj = self.heap.get(handle);
            match obj.as_upvalue().expect("upvalue slot must hold an Upvalue object") {
                UpvalueObj::Closed(_) => {
                    drop(obj);
                    *self.heap.get_mut(handle).as_upvalue_mut().unwrap() = UpvalueObj::Closed(value);
                    return Ok(());
                }
                UpvalueObj::Open { frame_id, local_index } => (*frame_id, *local_index),
            }
        };
        let frame = self
            .frames
            .iter()
            .find(|f| f.frame_id == frame_id)
            .ok_or(ExecutionError::InvalidUpvalue(local_index as i16))?;
        let slot = frame.local_base + local_index as usize;
        if slot >= self.stack.len() {
            return Err(ExecutionError::InvalidUpvalue(local_index as i16));
        }
        self.stack[slot] = value;
        Ok(())
    }

    /// Pops `n` locals off the top of the stack, closing any open upvalues
    /// that capture a local index going out of scope.
    fn pop_locals(&mut self, n: usize) -> EResult<()> {
        if self.stack.len() < n {
            return Err(ExecutionError::StackEmpty);
        }
        let local_base = self.frames.last().unwrap().local_base;
        let first_idx = (self.stack.len() - local_base).saturating_sub(n) as u32;
        let last_idx = (self.stack.len() - local_base) as u32;
        for local_index in first_idx..last_idx {
            self.close_upvalue(local_index);
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    fn close_upvalue(&mut self, local_index: u32) {
        let frame = self.frames.last_mut().unwrap();
        if let Some(root) = frame.open_upvalues.remove(&local_index) {
            let slot = frame.local_base + local_index as usize;
            let current = self.stack[slot];
            *self.heap.get_mut(root.handle()).as_upvalue_mut().unwrap() = UpvalueObj::Closed(current);
        }
    }

    /// Pops the return value, closes out every local of the current frame,
    /// pops the frame itself, and pushes the return value for the caller.
    /// Returns `None` once the final (top-level) frame has returned.
    fn do_return(&mut self) -> EResult<Option<()>> {
        let ret = self.pop()?;
        let local_base = self.frames.last().unwrap().local_base;
        let n = self.stack.len() - local_base;
        self.pop_locals(n)?;
        self.frames.pop();
        self.push(ret)?;
        if self.frames.is_empty() {
            Ok(None)
        } else {
            Ok(Some(()))
        }
    }

    fn call(&mut self, argc: usize) -> EResult<()> {
        if self.stack.len() < argc + 1 {
            return Err(ExecutionError::StackEmpty);
        }
        let callee_index = self.stack.len() - argc - 1;
        let callee = self.stack[callee_index];
        let handle = callee.as_handle().ok_or(ExecutionError::NotCallable(callee.kind_name()))?;
        let obj = self.heap.get(handle);
        if let Some(cfunc) = obj.as_cfunction() {
            let cfunc = *cfunc;
            drop(obj);
            if let Some(arity) = cfunc.arity {
                if arity != argc {
                    return Err(ExecutionError::ArityMismatch { expected: arity, got: argc });
                }
            }
            let args: Vec<Value> = self.stack[callee_index + 1..].to_vec();
            let result = (cfunc.func)(&self.heap, &args).map_err(ExecutionError::Native)?;
            self.stack.truncate(callee_index);
            self.push(result)?;
            return Ok(());
        }
        if obj.as_function().is_some() {
            let arg_count = obj.as_function().unwrap().arg_count as usize;
            let prototype_index = obj.as_function().unwrap().prototype_index;
            drop(obj);
            if arg_count != argc {
                return Err(ExecutionError::ArityMismatch { expected: arg_count, got: argc });
            }
            let function_root = self.heap.pin(handle);
            self.stack.remove(callee_index);
            let frame_id = self.next_frame_id;
            self.next_frame_id += 1;
            let frame = CallFrame::new(frame_id, callee_index, prototype_index, Some(function_root));
            self.frames.push(frame);
            return Ok(());
        }
        Err(ExecutionError::NotCallable(obj.kind_name()))
    }

    fn make_func(&mut self, proto: u16, argc: u16, upvalue_indices: &[i16]) -> EResult<()> {
        let frame = self.frames.last().unwrap();
        let local_base = frame.local_base;
        let frame_id = frame.frame_id;
        let current_local_count = (self.stack.len() - local_base) as i16;
        let outer_function = frame.function_root.clone();

        let mut upvalues = Vec::with_capacity(upvalue_indices.len());
        for &raw in upvalue_indices {
            let cell = if raw >= 0 {
                // The recursion edge case: an index equal to the slot not
                // yet filled by the upcoming LET is still valid -- the
                // local doesn't need to exist on the stack yet, only its
                // frame_id/index pair, which `resolve_upvalue` looks up
                // lazily.
                if raw > current_local_count {
                    return Err(ExecutionError::InvalidLocal(raw));
                }
                let heap = &self.heap;
                let local_index = raw as u32;
                self.frames
                    .last_mut()
                    .unwrap()
                    .open_upvalue_for(heap, local_index, || {
                        HeapObject::Upvalue(UpvalueObj::Open { frame_id, local_index })
                    })
            } else {
                let idx = (-raw - 1) as usize;
                let outer = outer_function.as_ref().ok_or(ExecutionError::InvalidUpvalue(raw))?;
                let obj = self.heap.get(outer.handle());
                *obj.as_function().ok_or(ExecutionError::InvalidUpvalue(raw))?.upvalues.get(idx).ok_or(ExecutionError::InvalidUpvalue(raw))?
            };
            upvalues.push(cell);
        }

        let func = FunctionObj { prototype_index: proto, arg_count: argc, upvalues, name: None };
        let root = self.heap.alloc(HeapObject::Function(func));
        let value = root.value();
        drop(root);
        self.push(value)
    }

    fn make_list(&mut self, n: usize) -> EResult<()> {
        if self.stack.len() < n {
            return Err(ExecutionError::StackEmpty);
        }
        let items: Vec<Value> = self.stack.split_off(self.stack.len() - n);
        let root = self.heap.alloc(HeapObject::List(GcList::from_vec(items)));
        let value = root.value();
        drop(root);
        self.push(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use somire_core::{Chunk, FunctionChunk, Op};

    fn chunk_with_constants(constants: &[Value]) -> Chunk {
        let mut chunk = Chunk::new();
        for &c in constants {
            chunk.add_constant(c).unwrap();
        }
        chunk
    }

    #[test]
    fn arithmetic_precedence_matches_spec_scenario_a() {
        // `1 + 2 * 3`, built directly at the bytecode level.
        let mut chunk = chunk_with_constants(&[Value::int(1), Value::int(2), Value::int(3)]);
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Constant);
        f.emit_u16(0);
        f.emit_op(Op::Constant);
        f.emit_u16(1);
        f.emit_op(Op::Constant);
        f.emit_u16(2);
        f.emit_op(Op::BinMultiply);
        f.emit_op(Op::BinPlus);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(somire_core::Heap::new());
        let result = vm.run(&chunk).unwrap();
        assert_eq!(result.as_int(), Some(7));
    }

    #[test]
    fn implicit_return_at_end_of_code_yields_nil() {
        let mut chunk = Chunk::new();
        chunk.add_function(FunctionChunk::new());
        let mut vm = Vm::new(somire_core::Heap::new());
        let result = vm.run(&chunk).unwrap();
        assert!(result.is_nil());
    }

    #[test]
    fn calling_a_user_function_passes_arguments() {
        // function 1: fun(n) -> n + 1
        let mut chunk = chunk_with_constants(&[Value::int(1), Value::int(5)]);
        let mut callee = FunctionChunk::new();
        callee.emit_op(Op::Local);
        callee.emit_i16(0);
        callee.emit_op(Op::Constant);
        callee.emit_u16(0);
        callee.emit_op(Op::BinPlus);
        callee.emit_op(Op::Return);

        // function 0 (top-level): MAKE_FUNC proto=1; CONSTANT 5; CALL 1; RETURN
        let mut top = FunctionChunk::new();
        top.emit_op(Op::MakeFunc);
        top.emit_u16(1); // proto
        top.emit_u16(1); // argc
        top.emit_u16(0); // upvalue count
        top.emit_op(Op::Constant);
        top.emit_u16(1);
        top.emit_op(Op::Call);
        top.emit_u16(1);
        top.emit_op(Op::Return);

        chunk.add_function(top);
        chunk.add_function(callee);

        let mut vm = Vm::new(somire_core::Heap::new());
        let result = vm.run(&chunk).unwrap();
        assert_eq!(result.as_int(), Some(6));
    }

    /// Hand-builds the `makeCounter` closure scenario from spec.md scenario D
    /// directly in bytecode, bypassing the compiler, to pin down the VM's
    /// own open/close upvalue contract: each call to the returned closure
    /// observes the previous call's write.
    #[test]
    fn closures_share_and_persist_captured_state() {
        let mut chunk = chunk_with_constants(&[Value::int(0), Value::int(1)]);

        // function 2: the inner counter closure, capturing `c` as its one
        // upvalue (upvalue index 0 -> encoded as raw -1).
        let mut inner = FunctionChunk::new();
        inner.emit_op(Op::Local);
        inner.emit_i16(-1);
        inner.emit_op(Op::Constant);
        inner.emit_u16(1); // the constant 1
        inner.emit_op(Op::BinPlus);
        inner.emit_op(Op::SetLocal);
        inner.emit_i16(-1);
        inner.emit_op(Op::Local);
        inner.emit_i16(-1);
        inner.emit_op(Op::Return);

        // function 1: makeCounter -- `let c = 0; return fun(): ...`
        let mut make_counter = FunctionChunk::new();
        make_counter.emit_op(Op::Constant);
        make_counter.emit_u16(0); // the constant 0
        make_counter.emit_op(Op::Let);
        make_counter.emit_op(Op::MakeFunc);
        make_counter.emit_u16(2); // proto: inner
        make_counter.emit_u16(0); // argc
        make_counter.emit_u16(1); // one upvalue
        make_counter.emit_i16(0); // captures local 0 (`c`) of this frame
        make_counter.emit_op(Op::Return);

        // function 0: top-level -- calls makeCounter once, then the
        // returned closure three times, collecting results into a list.
        let mut top = FunctionChunk::new();
        top.emit_op(Op::MakeFunc);
        top.emit_u16(1); // proto: makeCounter
        top.emit_u16(0);
        top.emit_u16(0);
        top.emit_op(Op::Call);
        top.emit_u16(0);
        top.emit_op(Op::Let); // local 0 = the counter closure
        for _ in 0..3 {
            top.emit_op(Op::Local);
            top.emit_i16(0);
            top.emit_op(Op::Call);
            top.emit_u16(0);
        }
        top.emit_op(Op::MakeList);
        top.emit_u16(3);
        top.emit_op(Op::Return);

        chunk.add_function(top);
        chunk.add_function(make_counter);
        chunk.add_function(inner);

        let heap = somire_core::Heap::new();
        let mut vm = Vm::new(heap.clone());
        let result = vm.run(&chunk).unwrap();
        let handle = result.as_handle().unwrap();
        let obj = heap.get(handle);
        let items = &obj.as_list().unwrap().items;
        let values: Vec<i32> = items.iter().map(|v| v.as_int().unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn list_index_reads_elements() {
        let mut chunk = chunk_with_constants(&[Value::int(10), Value::int(20), Value::int(30), Value::int(2)]);
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Constant);
        f.emit_u16(0);
        f.emit_op(Op::Constant);
        f.emit_u16(1);
        f.emit_op(Op::Constant);
        f.emit_u16(2);
        f.emit_op(Op::MakeList);
        f.emit_u16(3);
        f.emit_op(Op::Constant);
        f.emit_u16(3); // index 2 (1-based)
        f.emit_op(Op::BinIndex);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(somire_core::Heap::new());
        let result = vm.run(&chunk).unwrap();
        assert_eq!(result.as_int(), Some(20));
    }

    #[test]
    fn index_out_of_range_is_an_execution_error() {
        let mut chunk = chunk_with_constants(&[Value::int(10), Value::int(5)]);
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Constant);
        f.emit_u16(0);
        f.emit_op(Op::MakeList);
        f.emit_u16(1);
        f.emit_op(Op::Constant);
        f.emit_u16(1); // index 5, out of range
        f.emit_op(Op::BinIndex);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(somire_core::Heap::new());
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::IndexOutOfRange { index: 5, len: 1 }));
    }

    #[test]
    fn divide_by_zero_is_an_execution_error() {
        let mut chunk = chunk_with_constants(&[Value::int(1), Value::int(0)]);
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Constant);
        f.emit_u16(0);
        f.emit_op(Op::Constant);
        f.emit_u16(1);
        f.emit_op(Op::BinDivide);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(somire_core::Heap::new());
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::Value(somire_core::ValueError::DivideByZero)));
    }

    #[test]
    fn calling_a_non_function_value_is_an_execution_error() {
        let mut chunk = chunk_with_constants(&[Value::int(1)]);
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Constant);
        f.emit_u16(0);
        f.emit_op(Op::Call);
        f.emit_u16(0);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(somire_core::Heap::new());
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::NotCallable("int")));
    }

    #[test]
    fn arity_mismatch_on_user_function_is_an_execution_error() {
        let mut chunk = Chunk::new();
        let mut callee = FunctionChunk::new();
        callee.emit_op(Op::Return); // unreachable, arity check happens before entry
        let mut top = FunctionChunk::new();
        top.emit_op(Op::MakeFunc);
        top.emit_u16(1); // proto
        top.emit_u16(1); // declared argc: 1
        top.emit_u16(0);
        top.emit_op(Op::Call);
        top.emit_u16(0); // called with 0 args
        top.emit_op(Op::Return);
        chunk.add_function(top);
        chunk.add_function(callee);

        let mut vm = Vm::new(somire_core::Heap::new());
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::ArityMismatch { expected: 1, got: 0 }));
    }

    #[test]
    fn globals_round_trip_through_define_global() {
        let heap = somire_core::Heap::new();
        let mut chunk = Chunk::new();
        let name_idx = chunk.add_string_constant(&heap, "greeting").unwrap();
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Global);
        f.emit_u16(name_idx);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(heap);
        vm.define_global("greeting", Value::int(42));
        let result = vm.run(&chunk).unwrap();
        assert_eq!(result.as_int(), Some(42));
    }

    #[test]
    fn cfunction_rejection_surfaces_as_native_error_not_arity_mismatch() {
        let heap = somire_core::Heap::new();
        let mut chunk = Chunk::new();
        let name_idx = chunk.add_string_constant(&heap, "reject").unwrap();
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Global);
        f.emit_u16(name_idx);
        f.emit_op(Op::Call);
        f.emit_u16(0);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        fn reject(_heap: &somire_core::Heap, _args: &[Value]) -> Result<Value, String> {
            Err("reject() always rejects its arguments".to_string())
        }
        let cfunc_root = heap.alloc(HeapObject::CFunction(somire_core::CFunction {
            name: "reject",
            arity: Some(0),
            func: reject,
        }));

        let mut vm = Vm::new(heap);
        vm.define_global("reject", cfunc_root.value());
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::Native(ref msg) if msg == "reject() always rejects its arguments"));
    }

    #[test]
    fn undefined_global_is_an_execution_error() {
        let heap = somire_core::Heap::new();
        let mut chunk = Chunk::new();
        let name_idx = chunk.add_string_constant(&heap, "nope").unwrap();
        let mut f = FunctionChunk::new();
        f.emit_op(Op::Global);
        f.emit_u16(name_idx);
        f.emit_op(Op::Return);
        chunk.add_function(f);

        let mut vm = Vm::new(heap);
        let err = vm.run(&chunk).unwrap_err();
        assert!(matches!(err, ExecutionError::UndefinedGlobal(ref s) if s == "nope"));
    }
}
