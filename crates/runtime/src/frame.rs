//! Call frames.
//!
//! Frames are kept in a plain `Vec`, each owning its own program counter,
//! so "restoring the caller's position" on return is just popping the
//! vector -- the frame underneath was never mutated while suspended.

use somire_core::{Heap, HeapObject, Root};
use std::collections::HashMap;

pub struct CallFrame {
    /// Unique per call, used to key open upvalues so a closed-over local
    /// from frame N can never be confused with the same local index in a
    /// later, unrelated call to the same function.
    pub frame_id: u64,
    pub local_base: usize,
    pub function_index: u16,
    pub pc: usize,
    /// Pins the `Function` this frame is executing, so it (and transitively
    /// its upvalues) can't be collected mid-call. `None` for the top-level
    /// frame, which has no owning closure.
    pub function_root: Option<Root<HeapObject>>,
    /// At most one open `Upvalue` per local index (the uniqueness
    /// invariant from §3): the map from local index to the live open
    /// upvalue pinned on its behalf.
    pub open_upvalues: HashMap<u32, Root<HeapObject>>,
}

impl CallFrame {
    pub fn new(
        frame_id: u64,
        local_base: usize,
        function_index: u16,
        function_root: Option<Root<HeapObject>>,
    ) -> CallFrame {
        CallFrame {
            frame_id,
            local_base,
            function_index,
            pc: 0,
            function_root,
            open_upvalues: HashMap::new(),
        }
    }

    /// Finds (or creates) the open upvalue for `local_index`, pinning it in
    /// this frame's back-pointer map.
    pub fn open_upvalue_for(
        &mut self,
        heap: &Heap,
        local_index: u32,
        make: impl FnOnce() -> HeapObject,
    ) -> somire_core::Value {
        if let Some(root) = self.open_upvalues.get(&local_index) {
            return root.value();
        }
        let root = heap.alloc(make());
        let value = root.value();
        self.open_upvalues.insert(local_index, root);
        value
    }
}
