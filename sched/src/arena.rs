//! Arena - fixed-capacity context storage
//!
//! Slab of [`Context`] slots with stable integer handles. Capacity is
//! chosen once at processor bring-up; attach/detach reuse slots through a
//! free list, so the scheduler hot path never touches the heap.
//!
//! Indexing a vacant slot is a fatal contract violation: a dangling
//! [`ContextId`] means the surrounding kernel destroyed a thread that is
//! still linked somewhere, and continuing would corrupt every list that
//! runs through the arena.

use alloc::vec::Vec;

use crate::context::{Context, ContextId, Link};

enum Entry {
    Occupied(Context),
    Vacant { next_free: Option<u32> },
}

/// Fixed-capacity slab of contexts
pub struct Arena {
    entries: Vec<Entry>,
    free_head: Option<u32>,
    live: usize,
}

impl Arena {
    /// Allocate an arena with room for `capacity` contexts.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        for i in 0..capacity {
            let next_free = if i + 1 < capacity {
                Some(i as u32 + 1)
            } else {
                None
            };
            entries.push(Entry::Vacant { next_free });
        }
        Self {
            entries,
            free_head: if capacity > 0 { Some(0) } else { None },
            live: 0,
        }
    }

    /// Total number of slots
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of live contexts
    pub fn live(&self) -> usize {
        self.live
    }

    /// Place a context into a free slot; `None` when the arena is full.
    pub(crate) fn insert(&mut self, ctx: Context) -> Option<ContextId> {
        let slot = self.free_head?;
        match self.entries[slot as usize] {
            Entry::Vacant { next_free } => self.free_head = next_free,
            Entry::Occupied(_) => unreachable!("free list points at a live context"),
        }
        self.entries[slot as usize] = Entry::Occupied(ctx);
        self.live += 1;
        Some(ContextId(slot))
    }

    /// Free a slot and return its context.
    pub(crate) fn remove(&mut self, id: ContextId) -> Context {
        let entry = core::mem::replace(
            &mut self.entries[id.index()],
            Entry::Vacant {
                next_free: self.free_head,
            },
        );
        match entry {
            Entry::Occupied(ctx) => {
                self.free_head = Some(id.0);
                self.live -= 1;
                ctx
            }
            Entry::Vacant { .. } => panic!("context {:?} destroyed twice", id),
        }
    }

    pub(crate) fn get(&self, id: ContextId) -> &Context {
        match &self.entries[id.index()] {
            Entry::Occupied(ctx) => ctx,
            Entry::Vacant { .. } => panic!("context {:?} is not attached", id),
        }
    }

    pub(crate) fn get_mut(&mut self, id: ContextId) -> &mut Context {
        match &mut self.entries[id.index()] {
            Entry::Occupied(ctx) => ctx,
            Entry::Vacant { .. } => panic!("context {:?} is not attached", id),
        }
    }

    /// Record `helper` as helping `target`: set the outgoing edge and push
    /// `helper` onto `target`'s helper list. Both directions are kept in
    /// sync so teardown can sever them atomically.
    pub(crate) fn helper_attach(&mut self, target: ContextId, helper: ContextId) {
        debug_assert!(
            self.get(helper).destination.is_none(),
            "a context holds at most one outgoing help edge"
        );
        let old_head = self.get(target).helpers_head;
        {
            let h = self.get_mut(helper);
            h.destination = Some(target);
            h.helper_link.prev = None;
            h.helper_link.next = old_head;
        }
        if let Some(old) = old_head {
            self.get_mut(old).helper_link.prev = Some(helper);
        }
        self.get_mut(target).helpers_head = Some(helper);
    }

    /// Sever `helper`'s outgoing help edge, both directions. Idempotent.
    pub(crate) fn helper_detach(&mut self, helper: ContextId) {
        let Some(target) = self.get(helper).destination else {
            return;
        };
        let Link { prev, next } = self.get(helper).helper_link;
        match prev {
            Some(p) => self.get_mut(p).helper_link.next = next,
            None => self.get_mut(target).helpers_head = next,
        }
        if let Some(n) = next {
            self.get_mut(n).helper_link.prev = prev;
        }
        let h = self.get_mut(helper);
        h.destination = None;
        h.helper_link = Link::new();
    }
}

impl core::ops::Index<ContextId> for Arena {
    type Output = Context;

    fn index(&self, id: ContextId) -> &Context {
        self.get(id)
    }
}

impl core::ops::IndexMut<ContextId> for Arena {
    fn index_mut(&mut self, id: ContextId) -> &mut Context {
        self.get_mut(id)
    }
}

/// Index-linked FIFO list threaded through the contexts' `run_link`.
///
/// Used for both the pending-ready list and the per-group queue; a context
/// is a member of at most one run list at a time.
pub(crate) struct RunList {
    head: Option<ContextId>,
    tail: Option<ContextId>,
    len: usize,
}

impl RunList {
    pub(crate) const fn new() -> Self {
        Self {
            head: None,
            tail: None,
            len: 0,
        }
    }

    pub(crate) fn head(&self) -> Option<ContextId> {
        self.head
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub(crate) fn push_back(&mut self, arena: &mut Arena, id: ContextId) {
        let link = &mut arena.get_mut(id).run_link;
        link.prev = self.tail;
        link.next = None;
        match self.tail {
            Some(t) => arena.get_mut(t).run_link.next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    pub(crate) fn insert_before(&mut self, arena: &mut Arena, before: ContextId, id: ContextId) {
        let prev = arena.get(before).run_link.prev;
        {
            let link = &mut arena.get_mut(id).run_link;
            link.prev = prev;
            link.next = Some(before);
        }
        arena.get_mut(before).run_link.prev = Some(id);
        match prev {
            Some(p) => arena.get_mut(p).run_link.next = Some(id),
            None => self.head = Some(id),
        }
        self.len += 1;
    }

    pub(crate) fn pop_front(&mut self, arena: &mut Arena) -> Option<ContextId> {
        let id = self.head?;
        self.remove(arena, id);
        Some(id)
    }

    pub(crate) fn remove(&mut self, arena: &mut Arena, id: ContextId) {
        debug_assert!(self.len > 0, "removal from an empty run list");
        let Link { prev, next } = arena.get(id).run_link;
        match prev {
            Some(p) => arena.get_mut(p).run_link.next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => arena.get_mut(n).run_link.prev = prev,
            None => self.tail = prev,
        }
        arena.get_mut(id).run_link = Link::new();
        self.len -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::group::GroupId;

    fn ctx() -> Context {
        Context::new(GroupId(0))
    }

    #[test]
    fn test_insert_until_full() {
        let mut arena = Arena::with_capacity(2);
        assert!(arena.insert(ctx()).is_some());
        assert!(arena.insert(ctx()).is_some());
        assert!(arena.insert(ctx()).is_none());
        assert_eq!(arena.live(), 2);
    }

    #[test]
    fn test_slot_reuse_after_remove() {
        let mut arena = Arena::with_capacity(2);
        let a = arena.insert(ctx()).expect("slot available");
        let _b = arena.insert(ctx()).expect("slot available");
        arena.remove(a);
        let c = arena.insert(ctx()).expect("freed slot reusable");
        assert_eq!(c, a);
    }

    #[test]
    #[should_panic(expected = "destroyed twice")]
    fn test_double_remove_is_fatal() {
        let mut arena = Arena::with_capacity(1);
        let a = arena.insert(ctx()).expect("slot available");
        arena.remove(a);
        arena.remove(a);
    }

    #[test]
    #[should_panic(expected = "not attached")]
    fn test_dangling_handle_is_fatal() {
        let mut arena = Arena::with_capacity(1);
        let a = arena.insert(ctx()).expect("slot available");
        arena.remove(a);
        let _ = arena.get(a);
    }

    #[test]
    fn test_run_list_fifo() {
        let mut arena = Arena::with_capacity(3);
        let a = arena.insert(ctx()).expect("slot");
        let b = arena.insert(ctx()).expect("slot");
        let c = arena.insert(ctx()).expect("slot");

        let mut list = RunList::new();
        list.push_back(&mut arena, a);
        list.push_back(&mut arena, b);
        list.push_back(&mut arena, c);
        assert_eq!(list.len(), 3);

        assert_eq!(list.pop_front(&mut arena), Some(a));
        assert_eq!(list.pop_front(&mut arena), Some(b));
        assert_eq!(list.pop_front(&mut arena), Some(c));
        assert_eq!(list.pop_front(&mut arena), None);
    }

    #[test]
    fn test_run_list_remove_middle() {
        let mut arena = Arena::with_capacity(3);
        let a = arena.insert(ctx()).expect("slot");
        let b = arena.insert(ctx()).expect("slot");
        let c = arena.insert(ctx()).expect("slot");

        let mut list = RunList::new();
        list.push_back(&mut arena, a);
        list.push_back(&mut arena, b);
        list.push_back(&mut arena, c);
        list.remove(&mut arena, b);

        assert_eq!(list.pop_front(&mut arena), Some(a));
        assert_eq!(list.pop_front(&mut arena), Some(c));
        assert!(list.is_empty());
    }

    #[test]
    fn test_run_list_insert_before_head() {
        let mut arena = Arena::with_capacity(2);
        let a = arena.insert(ctx()).expect("slot");
        let b = arena.insert(ctx()).expect("slot");

        let mut list = RunList::new();
        list.push_back(&mut arena, a);
        list.insert_before(&mut arena, a, b);
        assert_eq!(list.head(), Some(b));
    }

    #[test]
    fn test_helper_list_attach_detach() {
        let mut arena = Arena::with_capacity(3);
        let target = arena.insert(ctx()).expect("slot");
        let h1 = arena.insert(ctx()).expect("slot");
        let h2 = arena.insert(ctx()).expect("slot");

        arena.helper_attach(target, h1);
        arena.helper_attach(target, h2);
        assert_eq!(arena[h1].destination(), Some(target));
        assert_eq!(arena[h2].destination(), Some(target));
        assert_eq!(arena[target].helpers_head, Some(h2));

        arena.helper_detach(h2);
        assert_eq!(arena[target].helpers_head, Some(h1));
        assert_eq!(arena[h2].destination(), None);

        // detach is idempotent
        arena.helper_detach(h2);
        arena.helper_detach(h1);
        assert_eq!(arena[target].helpers_head, None);
    }
}
