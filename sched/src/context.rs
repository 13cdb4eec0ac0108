//! Context - schedulable unit of execution
//!
//! One `Context` per thread-like kernel object. The scheduler never
//! allocates or frees contexts on its own; they live in the per-CPU
//! [`Arena`](crate::arena::Arena) and are linked/unlinked through stable
//! [`ContextId`] handles.

use crate::group::GroupId;
use crate::Ticks;

/// Stable handle into the context arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub u32);

impl ContextId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Scheduling state of a context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Not known to the scheduler
    Unready,

    /// Queued in the pending-ready list, awaiting group insertion
    Listed,

    /// Filed in its group (or running) and eligible for selection
    Ready,
}

/// Doubly-linked list membership, index-linked through the arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Link {
    pub prev: Option<ContextId>,
    pub next: Option<ContextId>,
}

impl Link {
    pub(crate) const fn new() -> Self {
        Self {
            prev: None,
            next: None,
        }
    }
}

/// Per-context scheduling bookkeeping
///
/// A context is in at most one of {pending list, group queue} at a time
/// (both use `run_link`), and independently in at most one helper list
/// (`helper_link`, owned by the context named in `destination`).
pub struct Context {
    /// Current scheduling state
    pub(crate) state: ContextState,

    /// Priority/weight class this context belongs to
    pub(crate) group: GroupId,

    /// Virtual time consumed, scaled by the group weight
    pub(crate) vtime: Ticks,

    /// Residue of the weight division, so scaled advancement loses no ticks
    pub(crate) vfrac: Ticks,

    /// Wall-clock ticks executed on behalf of this context, help included
    pub(crate) execution_time: Ticks,

    /// Context this one is currently helping (donating its time to)
    pub(crate) destination: Option<ContextId>,

    /// First context in the list of contexts helping *this* one
    pub(crate) helpers_head: Option<ContextId>,

    /// Membership in the destination's helper list
    pub(crate) helper_link: Link,

    /// Membership in the pending list or the group queue
    pub(crate) run_link: Link,
}

impl Context {
    pub(crate) fn new(group: GroupId) -> Self {
        Self {
            state: ContextState::Unready,
            group,
            vtime: 0,
            vfrac: 0,
            execution_time: 0,
            destination: None,
            helpers_head: None,
            helper_link: Link::new(),
            run_link: Link::new(),
        }
    }

    /// Scheduling state
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// Group this context is filed under
    pub fn group(&self) -> GroupId {
        self.group
    }

    /// Virtual time consumed so far
    pub fn vtime(&self) -> Ticks {
        self.vtime
    }

    /// Wall-clock ticks executed on behalf of this context
    pub fn execution_time(&self) -> Ticks {
        self.execution_time
    }

    /// Context this one is helping, if any (direct edge, not transitive)
    pub fn destination(&self) -> Option<ContextId> {
        self.destination
    }

    /// Advance `vtime` by `elapsed` real ticks scaled by `1/weight`.
    ///
    /// The division residue is carried in `vfrac` so that repeated small
    /// advancements add up to exactly `elapsed / weight` in the long run.
    pub(crate) fn advance_vtime(&mut self, elapsed: Ticks, weight: u64) {
        debug_assert!(weight > 0, "group weight must be positive");
        let total = self.vfrac.saturating_add(elapsed);
        self.vtime = self.vtime.saturating_add(total / weight);
        self.vfrac = total % weight;
    }
}
