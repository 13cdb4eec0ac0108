//! Group - priority/weight class
//!
//! A group holds an ordered queue of ready contexts (ascending member
//! vtime, FIFO among equals) plus the vtime bookkeeping needed to compare
//! this group against others: the raw aggregate `vtime` advanced by
//! unscaled elapsed time while a member runs, the additive `warp`
//! adjustment, and the `min_vtime` floor that keeps a dormant group from
//! banking credit while it was away.

use crate::arena::{Arena, RunList};
use crate::config::GroupConfig;
use crate::context::ContextId;
use crate::Ticks;

/// Handle of a priority/weight class, fixed at configuration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub u32);

impl GroupId {
    #[inline]
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// One priority/weight class and its ready queue
pub struct Group {
    /// Share weight; member vtime advances by `elapsed / weight`
    pub(crate) weight: u64,

    /// Additive offset granted to this group in cross-group comparison
    pub(crate) warp: u64,

    /// Aggregate virtual time, advanced by raw elapsed ticks while a
    /// member of this group is running
    pub(crate) vtime: Ticks,

    /// Smallest member vtime currently represented in this group; floor
    /// applied to members returning from dormancy
    pub(crate) min_vtime: Ticks,

    queue: RunList,
}

impl Group {
    pub(crate) fn new(config: &GroupConfig) -> Self {
        Self {
            weight: config.weight,
            warp: config.warp,
            vtime: 0,
            min_vtime: 0,
            queue: RunList::new(),
        }
    }

    /// Share weight of this class
    pub fn weight(&self) -> u64 {
        self.weight
    }

    /// Cross-group comparison offset
    pub fn warp(&self) -> u64 {
        self.warp
    }

    /// Earliest queued member, if any
    pub(crate) fn head(&self) -> Option<ContextId> {
        self.queue.head()
    }

    pub(crate) fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn queue_is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// File a context into the queue in ascending-vtime order.
    ///
    /// The scan stops at the first member with a strictly greater vtime,
    /// so among equal vtimes the earlier insertion stays ahead (FIFO
    /// tie-break, the property the selection determinism rests on).
    pub(crate) fn insert_orderly(&mut self, arena: &mut Arena, id: ContextId) {
        let vtime = arena[id].vtime;
        let mut at = self.queue.head();
        while let Some(cur) = at {
            if arena[cur].vtime > vtime {
                break;
            }
            at = arena[cur].run_link.next;
        }
        match at {
            Some(cur) => self.queue.insert_before(arena, cur, id),
            None => self.queue.push_back(arena, id),
        }
    }

    pub(crate) fn queue_remove(&mut self, arena: &mut Arena, id: ContextId) {
        self.queue.remove(arena, id);
    }
}
