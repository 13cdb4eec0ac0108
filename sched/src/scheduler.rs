//! Scheduler - virtual-time fair-share selection
//!
//! One instance per processor. Owns the context arena, the priority
//! groups, the pending-ready list, the idle context and the one-shot
//! re-evaluation timeout. All operations run with interrupts disabled on
//! their own CPU: nothing here blocks, allocates or takes a lock.
//!
//! The selection rule: among all ready contexts, run the one with the
//! earliest adjusted virtual time. Contexts of the same group compare by
//! raw member vtime; across groups the aggregate group vtimes compare
//! through the weight/warp formula, so classes of different share never
//! need renormalizing into one unit.

use alloc::vec::Vec;

use log::{debug, trace};

use crate::arena::{Arena, RunList};
use crate::config::SchedulerConfig;
use crate::context::{Context, ContextId, ContextState};
use crate::error::{AttachError, ConfigError};
use crate::group::{Group, GroupId};
use crate::stats::SchedulerStats;
use crate::timeout::Timeout;
use crate::Ticks;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CacheState {
    /// The last selection is still valid
    UpToDate,

    /// Something changed; the next `update` must re-evaluate
    OutOfDate,
}

/// Per-CPU virtual-time scheduler
pub struct Scheduler {
    arena: Arena,
    groups: Vec<Group>,
    pending: RunList,
    idle: ContextId,
    current: ContextId,
    cache: CacheState,
    last_time: Ticks,

    /// Global member-vtime floor over all in-use groups
    min_vtime: Ticks,

    /// Global raw group-vtime floor over all in-use groups
    min_gvtime: Ticks,

    min_timeout: Ticks,
    max_timeout: Ticks,
    timeout: Timeout,
    stats: SchedulerStats,
}

impl Scheduler {
    /// Build a scheduler from its boot-time configuration.
    ///
    /// The idle context is created here, inside the arena, and is owned
    /// by the scheduler for its whole life; one extra slot beyond
    /// `config.capacity` is reserved for it.
    pub fn new(config: &SchedulerConfig<'_>) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut arena = Arena::with_capacity(config.capacity + 1);
        let groups = config.groups.iter().map(Group::new).collect();
        let mut idle_ctx = Context::new(GroupId(0));
        // always eligible, never queued
        idle_ctx.state = ContextState::Ready;
        let idle = arena
            .insert(idle_ctx)
            .expect("arena always has room for the idle context");
        Ok(Self {
            arena,
            groups,
            pending: RunList::new(),
            idle,
            current: idle,
            cache: CacheState::OutOfDate,
            last_time: 0,
            min_vtime: 0,
            min_gvtime: 0,
            min_timeout: config.min_timeout,
            max_timeout: config.max_timeout,
            timeout: Timeout::new(config.max_timeout),
            stats: SchedulerStats::default(),
        })
    }

    /// Context currently selected to run (idle when nothing else is)
    pub fn current(&self) -> ContextId {
        self.current
    }

    /// The always-eligible fallback context
    pub fn idle(&self) -> ContextId {
        self.idle
    }

    /// Read-only view of a context's bookkeeping
    pub fn context(&self, id: ContextId) -> &Context {
        &self.arena[id]
    }

    /// Read-only view of a group
    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.index()]
    }

    /// Number of configured groups
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Contexts queued in `group`, the running one excluded
    pub fn queue_len(&self, group: GroupId) -> usize {
        self.groups[group.index()].queue_len()
    }

    /// Whether the next `update` call will re-evaluate
    pub fn needs_update(&self) -> bool {
        self.cache == CacheState::OutOfDate
    }

    /// The alarm armed by the last `update`
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Minimum scheduling granularity
    pub fn min_timeout(&self) -> Ticks {
        self.min_timeout
    }

    /// Upper bound on the re-evaluation timeout
    pub fn max_timeout(&self) -> Ticks {
        self.max_timeout
    }

    /// Counter snapshot
    pub fn stats(&self) -> SchedulerStats {
        self.stats
    }

    /// Create a context in `group`. It starts out `Unready`; the embedding
    /// kernel object readies it once the thread may run.
    pub fn attach(&mut self, group: GroupId) -> Result<ContextId, AttachError> {
        if group.index() >= self.groups.len() {
            return Err(AttachError::NoSuchGroup {
                group: group.0,
                group_count: self.groups.len(),
            });
        }
        self.arena
            .insert(Context::new(group))
            .ok_or(AttachError::ArenaFull {
                capacity: self.arena.capacity() - 1,
            })
    }

    /// Destroy a context: sever its own outgoing help, then the help of
    /// everyone still helping it, unlink it from any list and free its
    /// slot. `now` is needed to account the running context's time when
    /// the destroyed context is `current`.
    pub fn detach(&mut self, id: ContextId, now: Ticks) {
        assert!(id != self.idle, "the idle context cannot be detached");
        self.arena.helper_detach(id);
        while let Some(helper) = self.arena[id].helpers_head {
            self.arena.helper_detach(helper);
        }
        self.unready(id, now);
        self.arena.remove(id);
    }

    /// Make a context eligible to run.
    ///
    /// O(1): the context only lands on the pending list; group insertion
    /// happens lazily inside the next `update`. Recursively applied to
    /// every context helping `id`. Calling this on a context that is
    /// already listed or ready is a harmless no-op.
    pub fn ready(&mut self, id: ContextId) {
        if self.arena[id].state != ContextState::Unready {
            return;
        }
        trace!("sched: ready {:?}", id);
        self.arena[id].state = ContextState::Listed;
        self.pending.push_back(&mut self.arena, id);
        self.cache = CacheState::OutOfDate;

        let mut helper = self.arena[id].helpers_head;
        while let Some(h) = helper {
            let next = self.arena[h].helper_link.next;
            self.ready(h);
            helper = next;
        }
    }

    /// Remove a context from scheduling, recursively including everyone
    /// helping it. When the removed context is `current`, its time is
    /// accounted up to `now` and the scheduler falls back to idle.
    pub fn unready(&mut self, id: ContextId, now: Ticks) {
        if id == self.idle {
            return;
        }
        match self.arena[id].state {
            ContextState::Unready => return,
            ContextState::Listed => {
                self.pending.remove(&mut self.arena, id);
                self.arena[id].state = ContextState::Unready;
            }
            ContextState::Ready => {
                let gid = self.arena[id].group;
                if id == self.current {
                    self._update_time(now);
                    self.arena[id].state = ContextState::Unready;
                    self.current = self.idle;
                } else {
                    self.groups[gid.index()].queue_remove(&mut self.arena, id);
                    self.arena[id].state = ContextState::Unready;
                }
                self._refresh_group_floor(gid);
            }
        }
        trace!("sched: unready {:?}", id);
        self.cache = CacheState::OutOfDate;

        let mut helper = self.arena[id].helpers_head;
        while let Some(h) = helper {
            let next = self.arena[h].helper_link.next;
            self.unready(h, now);
            helper = next;
        }
    }

    /// Voluntarily age the running context by exactly `min_timeout`, the
    /// smallest amount guaranteed to let an equally eligible peer win the
    /// next selection, and force a re-evaluation.
    pub fn yield_now(&mut self) {
        if self.current != self.idle {
            let gid = self.arena[self.current].group;
            let weight = self.groups[gid.index()].weight;
            self.arena[self.current].vtime =
                self.arena[self.current].vtime.saturating_add(self.min_timeout);
            self.groups[gid.index()].vtime = self.groups[gid.index()]
                .vtime
                .saturating_add(self.min_timeout.saturating_mul(weight));
            self.stats.yields += 1;
        }
        self.cache = CacheState::OutOfDate;
    }

    /// Donate `helper`'s time attribution to `target`.
    ///
    /// Scheduling position is not transferred: whenever `helper` runs,
    /// the wall-clock time is booked to the end of `target`'s helping
    /// chain while `helper` still pays with its own vtime. Any previous
    /// help by `helper` is finished first (single outgoing edge).
    pub fn help(&mut self, helper: ContextId, target: ContextId) {
        if helper == target {
            return;
        }
        debug_assert!(
            !self._in_helping_chain(target, helper),
            "helping cycle: {:?} already (transitively) helps {:?}",
            target,
            helper,
        );
        self.arena.helper_detach(helper);
        self.arena.helper_attach(target, helper);
        self.stats.helps += 1;
        trace!("sched: {:?} helps {:?}", helper, target);
    }

    /// End `id`'s outgoing help relation. Idempotent.
    pub fn helping_finished(&mut self, id: ContextId) {
        self.arena.helper_detach(id);
    }

    /// Resolve the transitive helping chain: if C helps D and D helps E,
    /// C's destination is E. A context without outgoing help is its own
    /// destination.
    pub fn helping_destination(&self, id: ContextId) -> ContextId {
        let mut cur = id;
        while let Some(next) = self.arena[cur].destination {
            cur = next;
        }
        cur
    }

    /// The timeout fired: the current selection may be stale even though
    /// no context changed state.
    pub fn timeout_triggered(&mut self) {
        self.stats.preemptions += 1;
        self.cache = CacheState::OutOfDate;
    }

    /// Re-evaluate the scheduling decision.
    ///
    /// No-op while up to date. Otherwise: account elapsed time, refile
    /// the outgoing context, drain the pending list, select the earliest
    /// context (idle as fallback) and arm the timeout with the distance
    /// to the next possible crossover.
    pub fn update(&mut self, now: Ticks) {
        if self.cache == CacheState::UpToDate {
            return;
        }
        self.stats.updates += 1;
        self._update_time(now);

        // the outgoing context is still schedulable; refile it before
        // selection so it competes (and stays ahead of equal newcomers)
        let prev = self.current;
        if prev != self.idle && self.arena[prev].state == ContextState::Ready {
            let gid = self.arena[prev].group;
            self.groups[gid.index()].insert_orderly(&mut self.arena, prev);
        }

        self._check_ready_contexts();

        let next = self._select_head().unwrap_or(self.idle);
        if next != self.idle {
            let gid = self.arena[next].group;
            self.groups[gid.index()].queue_remove(&mut self.arena, next);
        }
        if next != prev {
            self.stats.switches += 1;
            debug!("sched: switch {:?} -> {:?}", prev, next);
        }
        self.current = next;

        let deadline = self._next_timeout();
        self.timeout.arm(deadline);
        self.cache = CacheState::UpToDate;
    }

    /// Charge elapsed real time since the last accounting point.
    ///
    /// Wall-clock time goes to the helping destination's execution time
    /// (whoever ultimately benefits); virtual time is paid by the runner
    /// itself, scaled by its group weight. Idle pays raw elapsed time and
    /// touches no group.
    fn _update_time(&mut self, now: Ticks) {
        let elapsed = now.saturating_sub(self.last_time);
        self.last_time = now;
        if elapsed == 0 {
            return;
        }

        let sink = self.helping_destination(self.current);
        self.arena[sink].execution_time =
            self.arena[sink].execution_time.saturating_add(elapsed);

        if self.current == self.idle {
            self.arena[self.idle].vtime = self.arena[self.idle].vtime.saturating_add(elapsed);
            return;
        }

        let gid = self.arena[self.current].group;
        let weight = self.groups[gid.index()].weight;
        self.arena[self.current].advance_vtime(elapsed, weight);
        self.groups[gid.index()].vtime =
            self.groups[gid.index()].vtime.saturating_add(elapsed);

        // running group's floor follows its earliest representative
        let current_vtime = self.arena[self.current].vtime;
        let head_vtime = self.groups[gid.index()].head().map(|h| self.arena[h].vtime);
        self.groups[gid.index()].min_vtime = match head_vtime {
            Some(hv) => current_vtime.min(hv),
            None => current_vtime,
        };

        self._recompute_global_floors();
    }

    /// Global floors span the groups that are in use: non-empty queue or
    /// the running context's group. Idle groups are excluded so they
    /// cannot drag the floor down and let everyone else bank credit
    /// against them.
    fn _recompute_global_floors(&mut self) {
        let running = if self.current == self.idle {
            None
        } else {
            Some(self.arena[self.current].group)
        };
        let mut min_vtime: Option<Ticks> = None;
        let mut min_gvtime: Option<Ticks> = None;
        for (index, group) in self.groups.iter().enumerate() {
            let in_use =
                !group.queue_is_empty() || running.map_or(false, |r| r.index() == index);
            if !in_use {
                continue;
            }
            min_vtime = Some(min_vtime.map_or(group.min_vtime, |m| m.min(group.min_vtime)));
            min_gvtime = Some(min_gvtime.map_or(group.vtime, |m| m.min(group.vtime)));
        }
        if let Some(v) = min_vtime {
            self.min_vtime = v;
        }
        if let Some(v) = min_gvtime {
            self.min_gvtime = v;
        }
    }

    /// A departing member can leave its group's floor stale at the old
    /// low vtime. Re-read the floor from the members still represented
    /// (queue head plus the running context); it is only ever raised.
    fn _refresh_group_floor(&mut self, gid: GroupId) {
        let head_vtime = self.groups[gid.index()].head().map(|h| self.arena[h].vtime);
        let running_vtime =
            if self.current != self.idle && self.arena[self.current].group == gid {
                Some(self.arena[self.current].vtime)
            } else {
                None
            };
        let floor = match (head_vtime, running_vtime) {
            (Some(h), Some(r)) => Some(h.min(r)),
            (Some(h), None) => Some(h),
            (None, Some(r)) => Some(r),
            (None, None) => None,
        };
        if let Some(f) = floor {
            if f > self.groups[gid.index()].min_vtime {
                self.groups[gid.index()].min_vtime = f;
            }
        }
    }

    /// Drain the pending list into the groups, applying the
    /// anti-starvation/anti-leapfrog floors before each insertion.
    fn _check_ready_contexts(&mut self) {
        while let Some(id) = self.pending.pop_front(&mut self.arena) {
            let gid = self.arena[id].group;
            let in_use = !self.groups[gid.index()].queue_is_empty()
                || (self.current != self.idle && self.arena[self.current].group == gid);
            if !in_use {
                // dormant group re-activation: no banking below the
                // global floors
                let group = &mut self.groups[gid.index()];
                if group.min_vtime < self.min_vtime {
                    group.min_vtime = self.min_vtime;
                }
                if group.vtime < self.min_gvtime {
                    group.vtime = self.min_gvtime;
                }
            }
            let floor = self.groups[gid.index()].min_vtime;
            {
                let ctx = &mut self.arena[id];
                if ctx.vtime < floor {
                    // dormant context: no queue-jumping below the floor
                    ctx.vtime = floor;
                    ctx.vfrac = 0;
                }
                ctx.state = ContextState::Ready;
            }
            self.groups[gid.index()].insert_orderly(&mut self.arena, id);
        }
    }

    /// True when `a` compares as earlier than `b`.
    ///
    /// Same group: raw member vtime. Across groups: each side is the
    /// opposing group's warp added to the own aggregate vtime, scaled by
    /// the opposing weight, in u128 so the products cannot wrap.
    fn earlier(&self, a: ContextId, b: ContextId) -> bool {
        let ga = self.arena[a].group;
        let gb = self.arena[b].group;
        if ga == gb {
            return self.arena[a].vtime < self.arena[b].vtime;
        }
        let ga = &self.groups[ga.index()];
        let gb = &self.groups[gb.index()];
        let lhs = (ga.vtime as u128 + gb.warp as u128) * gb.weight as u128;
        let rhs = (gb.vtime as u128 + ga.warp as u128) * ga.weight as u128;
        lhs < rhs
    }

    /// Earliest head over all groups; ties keep the lower group index.
    fn _select_head(&self) -> Option<ContextId> {
        let mut best: Option<ContextId> = None;
        for group in &self.groups {
            let Some(head) = group.head() else {
                continue;
            };
            best = Some(match best {
                None => head,
                Some(b) if self.earlier(head, b) => head,
                Some(b) => b,
            });
        }
        best
    }

    /// Real ticks until some group head would compare as earlier than the
    /// running context, floored at `min_timeout` per head and capped at
    /// `max_timeout` overall.
    fn _next_timeout(&self) -> Ticks {
        let mut best = self.max_timeout;
        let running_group = if self.current == self.idle {
            None
        } else {
            Some(self.arena[self.current].group)
        };
        for (index, group) in self.groups.iter().enumerate() {
            let Some(head) = group.head() else {
                continue;
            };
            let distance = match running_group {
                Some(rg) if rg.index() == index => {
                    // same group: member vtime is paid at 1/weight per
                    // real tick
                    let dv = self.arena[head]
                        .vtime
                        .saturating_sub(self.arena[self.current].vtime);
                    dv.saturating_mul(group.weight)
                        .saturating_add(self.min_timeout)
                }
                Some(rg) => {
                    let rg = &self.groups[rg.index()];
                    let lhs = (rg.vtime as u128 + group.warp as u128) * group.weight as u128;
                    let rhs = (group.vtime as u128 + rg.warp as u128) * rg.weight as u128;
                    // the running side's product grows by the head's
                    // weight per real tick
                    let ticks = rhs
                        .saturating_sub(lhs)
                        .checked_div(group.weight as u128)
                        .unwrap_or(0)
                        .min(Ticks::MAX as u128) as Ticks;
                    ticks.saturating_add(self.min_timeout)
                }
                None => self.min_timeout,
            };
            best = best.min(distance);
        }
        best.clamp(self.min_timeout, self.max_timeout)
    }

    fn _in_helping_chain(&self, start: ContextId, needle: ContextId) -> bool {
        let mut cur = start;
        while let Some(next) = self.arena[cur].destination {
            if next == needle {
                return true;
            }
            cur = next;
        }
        false
    }
}
