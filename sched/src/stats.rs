//! Scheduler statistics
//!
//! Monotonic counters, snapshot-read by the surrounding kernel's
//! diagnostics surface. Pure accounting; no scheduling decision depends
//! on any of these.

/// Counter snapshot of one per-CPU scheduler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    /// `update()` invocations that performed work
    pub updates: u64,

    /// Context switches (current changed across an update)
    pub switches: u64,

    /// Timeout-driven re-evaluations
    pub preemptions: u64,

    /// Voluntary yields of the running context
    pub yields: u64,

    /// Help relations established
    pub helps: u64,
}
