//! Tracing mark-and-sweep garbage collector.
//!
//! The heap is a simple slab: `Vec<Option<Slot>>` indexed by [`Handle`].
//! Objects are never moved, so a `Handle` stays valid for the object's
//! entire lifetime (it just stops resolving once the slot is swept).
//!
//! Roots are objects that are *pinned*: every [`Root`] guard increments the
//! object's root counter on construction and decrements it on drop, on
//! every exit path including error propagation (`?`), matching the scoped
//! acquisition pattern used throughout the rest of the runtime. `collect()`
//! walks every object with a nonzero root counter, marks it and everything
//! it reaches, then sweeps anything left unmarked.

use crate::object::HeapObject;
use crate::value::{Handle, Value};
use std::cell::RefCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

struct Slot {
    marked: bool,
    root_count: u32,
    object: HeapObject,
}

struct Inner {
    slots: Vec<Option<Slot>>,
    /// Handles are 1-based; index 0 is never a valid object (see the
    /// `Value::object` invariant that a zero handle is never valid).
    free_list: Vec<u32>,
    instructions_since_collect: u64,
}

/// Owns every heap object. Cheap to clone (an `Rc`), so the compiler and
/// the VM can each hold a handle to the same heap without lifetime
/// gymnastics -- the language is single-threaded, so `Rc<RefCell<_>>` is
/// the right tool rather than `Arc<Mutex<_>>`.
#[derive(Clone)]
pub struct Heap(Rc<RefCell<Inner>>);

/// How often `step()` runs a full collection, measured in VM instructions.
/// A minimally correct GC could collect every instruction; this just
/// amortizes the sweep cost. Tuned, not load-bearing for correctness.
const STEP_COLLECTION_PERIOD: u64 = 4096;

impl Heap {
    pub fn new() -> Heap {
        Heap(Rc::new(RefCell::new(Inner {
            slots: vec![None],
            free_list: Vec::new(),
            instructions_since_collect: 0,
        })))
    }

    /// Registers a new object and returns its handle, pinned once (caller
    /// owns the returned `Root` and must keep it alive for as long as the
    /// object must survive a collection).
    pub fn alloc(&self, object: HeapObject) -> Root<HeapObject> {
        let mut inner = self.0.borrow_mut();
        let slot = Slot {
            marked: false,
            root_count: 1,
            object,
        };
        let handle = if let Some(index) = inner.free_list.pop() {
            inner.slots[index as usize] = Some(slot);
            Handle(index)
        } else {
            inner.slots.push(Some(slot));
            Handle((inner.slots.len() - 1) as u32)
        };
        drop(inner);
        Root {
            heap: self.clone(),
            handle,
            _marker: PhantomData,
        }
    }

    /// Pins an already-allocated object, returning a guard that unpins on
    /// drop. Pinning an object with no entry (swept, or a stale test
    /// handle) is a fatal invariant violation, not a recoverable error.
    pub fn pin(&self, handle: Handle) -> Root<HeapObject> {
        let mut inner = self.0.borrow_mut();
        match inner.slots.get_mut(handle.index()).and_then(|s| s.as_mut()) {
            Some(slot) => slot.root_count += 1,
            None => panic!("pin: handle {:?} does not name a live object", handle),
        }
        Root {
            heap: self.clone(),
            handle,
            _marker: PhantomData,
        }
    }

    fn unpin(&self, handle: Handle) {
        let mut inner = self.0.borrow_mut();
        match inner.slots.get_mut(handle.index()).and_then(|s| s.as_mut()) {
            Some(slot) => {
                slot.root_count = slot
                    .root_count
                    .checked_sub(1)
                    .unwrap_or_else(|| panic!("stack-pin underflow on handle {:?}", handle));
            }
            None => panic!("unpin: handle {:?} does not name a live object", handle),
        }
    }

    pub fn get(&self, handle: Handle) -> std::cell::Ref<'_, HeapObject> {
        std::cell::Ref::map(self.0.borrow(), |inner| {
            &inner.slots[handle.index()]
                .as_ref()
                .unwrap_or_else(|| panic!("dangling handle {:?}", handle))
                .object
        })
    }

    pub fn get_mut(&self, handle: Handle) -> std::cell::RefMut<'_, HeapObject> {
        std::cell::RefMut::map(self.0.borrow_mut(), |inner| {
            &mut inner.slots[handle.index()]
                .as_mut()
                .unwrap_or_else(|| panic!("dangling handle {:?}", handle))
                .object
        })
    }

    /// Marks `handle` and recurses into its children. Guarded by the mark
    /// bit so cycles (closures capturing their own defining environment,
    /// lists containing themselves) terminate.
    fn mark(&self, handle: Handle) {
        let already_marked = {
            let mut inner = self.0.borrow_mut();
            let slot = inner.slots[handle.index()].as_mut().expect("mark: dangling handle");
            let was = slot.marked;
            slot.marked = true;
            was
        };
        if already_marked {
            return;
        }
        // Children are read via a clone of the children-list so we don't
        // hold the `RefCell` borrow across a recursive `mark` call that
        // also needs to borrow the heap.
        let children = self.get(handle).children();
        for child in children {
            if let Some(h) = child.as_handle() {
                self.mark(h);
            }
        }
    }

    pub fn mark_value(&self, value: Value) {
        if let Some(h) = value.as_handle() {
            self.mark(h);
        }
    }

    /// Runs one full mark-and-sweep collection, treating every pinned
    /// object as a root.
    pub fn collect(&self) {
        self.collect_with_roots(std::iter::empty());
    }

    /// Like [`Heap::collect`], but additionally treats every value in
    /// `extra_roots` as a root for this pass. The VM uses this to mark the
    /// operand stack and frame locals, which are roots by the contract in
    /// §5 but aren't individually pinned the way globals or a frame's
    /// owning function are.
    pub fn collect_with_roots(&self, extra_roots: impl IntoIterator<Item = Value>) {
        for v in extra_roots {
            self.mark_value(v);
        }
        let pinned: Vec<Handle> = {
            let inner = self.0.borrow();
            inner
                .slots
                .iter()
                .enumerate()
                .filter_map(|(i, slot)| {
                    slot.as_ref()
                        .filter(|s| s.root_count > 0)
                        .map(|_| Handle(i as u32))
                })
                .collect()
        };
        for handle in pinned {
            self.mark(handle);
        }
        let mut inner = self.0.borrow_mut();
        inner.instructions_since_collect = 0;
        let len = inner.slots.len();
        for i in 0..len {
            let sweep = match &inner.slots[i] {
                Some(slot) if !slot.marked => true,
                _ => false,
            };
            if sweep {
                inner.slots[i] = None;
                inner.free_list.push(i as u32);
            } else if let Some(slot) = inner.slots[i].as_mut() {
                slot.marked = false;
            }
        }
    }

    /// Policy hook: the VM calls this between bytecode instructions. A
    /// minimally correct implementation could call `collect()` every time;
    /// this amortizes it to a coarse period instead. Running it every
    /// instruction remains correct, just slower.
    pub fn step(&self, extra_roots: impl IntoIterator<Item = Value>) {
        let due = {
            let mut inner = self.0.borrow_mut();
            inner.instructions_since_collect += 1;
            inner.instructions_since_collect >= STEP_COLLECTION_PERIOD
        };
        if due {
            self.collect_with_roots(extra_roots);
        }
    }

    pub fn live_count(&self) -> usize {
        self.0.borrow().slots.iter().filter(|s| s.is_some()).count()
    }
}

impl Default for Heap {
    fn default() -> Heap {
        Heap::new()
    }
}

impl fmt::Debug for Heap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Heap({} live objects)", self.live_count())
    }
}

/// A scoped root: pins an object for the lifetime of the guard and unpins
/// it on every exit path, including unwinding through `?`.
pub struct Root<T> {
    heap: Heap,
    handle: Handle,
    _marker: PhantomData<T>,
}

impl<T> Root<T> {
    pub fn handle(&self) -> Handle {
        self.handle
    }

    pub fn value(&self) -> Value {
        Value::object(self.handle)
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }
}

impl<T> Clone for Root<T> {
    fn clone(&self) -> Root<T> {
        self.heap.pin(self.handle)
    }
}

impl<T> Drop for Root<T> {
    fn drop(&mut self) {
        self.heap.unpin(self.handle);
    }
}

impl<T> fmt::Debug for Root<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Root({:?})", self.handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{GcList, HeapObject};

    #[test]
    fn unreachable_objects_are_swept() {
        let heap = Heap::new();
        let a = heap.alloc(HeapObject::List(GcList::new()));
        let handle = a.handle();
        drop(a);
        heap.collect();
        // Slot reused on next alloc proves the old one was swept.
        let b = heap.alloc(HeapObject::List(GcList::new()));
        assert_eq!(b.handle(), handle);
    }

    #[test]
    fn pinned_objects_survive() {
        let heap = Heap::new();
        let root = heap.alloc(HeapObject::List(GcList::new()));
        heap.collect();
        assert_eq!(heap.live_count(), 1);
        drop(root);
        heap.collect();
        assert_eq!(heap.live_count(), 0);
    }

    #[test]
    fn cycles_do_not_overflow_the_stack() {
        let heap = Heap::new();
        let list_root = heap.alloc(HeapObject::List(GcList::new()));
        let self_value = list_root.value();
        if let HeapObject::List(list) = &mut *heap.get_mut(list_root.handle()) {
            list.items.push(self_value);
        }
        heap.collect();
        assert_eq!(heap.live_count(), 1);
    }

    #[test]
    #[should_panic(expected = "stack-pin underflow")]
    fn double_unpin_is_fatal() {
        let heap = Heap::new();
        let root = heap.alloc(HeapObject::List(GcList::new()));
        let handle = root.handle();
        heap.unpin(handle); // root's own Drop will try to unpin again -> underflow
        drop(root);
    }
}
