//! Processor - per-CPU binding of scheduler and timer
//!
//! Composes one [`Scheduler`] with the CPU's hardware timer and exposes
//! the entry points the kernel dispatch loop calls: `exception` on every
//! kernel entry (trap, interrupt, syscall), `timer_interrupt` when the
//! armed timeout fires, and `proceed` to learn which context's machine
//! state to resume. Register save/restore and address-space switching
//! stay with the caller; only the scheduling decision lives here.
//!
//! The scheduler sits behind a `spin::Mutex` so a `Processor` can live in
//! a static per-CPU table and be reached from both the IRQ path and the
//! kernel entry path. The timer is programmed after the lock is dropped.

use spin::Mutex;

use crate::config::SchedulerConfig;
use crate::context::ContextId;
use crate::error::{AttachError, ConfigError};
use crate::group::GroupId;
use crate::scheduler::Scheduler;
use crate::stats::SchedulerStats;
use crate::Ticks;

/// Hardware timer contract, one instance per CPU.
///
/// Time is an opaque monotonically increasing tick count; the unit is
/// whatever the platform's timer runs at.
pub trait Timer {
    /// Monotonic ticks since the timer started
    fn elapsed(&self) -> Ticks;

    /// Program the one-shot preemption alarm `duration` ticks from now
    fn set_timeout(&self, duration: Ticks);

    /// Ticks remaining until the armed alarm fires (0 when expired)
    fn ticks_left(&self) -> Ticks;
}

impl<T: Timer + ?Sized> Timer for &T {
    fn elapsed(&self) -> Ticks {
        (**self).elapsed()
    }

    fn set_timeout(&self, duration: Ticks) {
        (**self).set_timeout(duration)
    }

    fn ticks_left(&self) -> Ticks {
        (**self).ticks_left()
    }
}

/// One CPU's scheduling front end
pub struct Processor<T: Timer> {
    id: u32,
    timer: T,
    sched: Mutex<Scheduler>,
}

impl<T: Timer> Processor<T> {
    /// Bring up the scheduling core of CPU `id`.
    pub fn new(id: u32, timer: T, config: &SchedulerConfig<'_>) -> Result<Self, ConfigError> {
        let sched = Scheduler::new(config)?;
        Ok(Self {
            id,
            timer,
            sched: Mutex::new(sched),
        })
    }

    /// CPU number this processor schedules for
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Create a context in `group` on this CPU.
    pub fn attach(&self, group: GroupId) -> Result<ContextId, AttachError> {
        self.sched.lock().attach(group)
    }

    /// Destroy a context, severing its help relations first.
    pub fn detach(&self, id: ContextId) {
        let now = self.timer.elapsed();
        self.sched.lock().detach(id, now);
    }

    /// Register a context as runnable (thread unblocked or created).
    pub fn schedule(&self, id: ContextId) {
        self.sched.lock().ready(id);
    }

    /// Remove a context from scheduling (thread blocked).
    pub fn unready(&self, id: ContextId) {
        let now = self.timer.elapsed();
        self.sched.lock().unready(id, now);
    }

    /// Voluntary yield of the running context.
    pub fn yield_now(&self) {
        self.sched.lock().yield_now();
    }

    /// Let `helper` donate its time attribution to `target`.
    pub fn help(&self, helper: ContextId, target: ContextId) {
        self.sched.lock().help(helper, target);
    }

    /// End `id`'s outgoing help relation.
    pub fn helping_finished(&self, id: ContextId) {
        self.sched.lock().helping_finished(id);
    }

    /// The armed preemption alarm fired: mark the decision stale. The
    /// re-evaluation itself happens in `exception` on the way back out.
    pub fn timer_interrupt(&self) {
        self.sched.lock().timeout_triggered();
    }

    /// Kernel entry point: account elapsed time, re-run the selection if
    /// anything went stale, program the timer with the new deadline and
    /// return the context to dispatch.
    ///
    /// The timer is reprogrammed only when the update armed a fresh
    /// deadline (timeout generation changed). A no-op entry leaves the
    /// hardware countdown running, so a context that enters the kernel
    /// faster than its timeslice cannot push its preemption out forever.
    pub fn exception(&self) -> ContextId {
        let now = self.timer.elapsed();
        let (current, rearmed) = {
            let mut sched = self.sched.lock();
            let generation = sched.timeout().generation();
            sched.update(now);
            let timeout = sched.timeout();
            let rearmed = (timeout.generation() != generation).then_some(timeout.duration());
            (sched.current(), rearmed)
        };
        if let Some(duration) = rearmed {
            self.timer.set_timeout(duration);
        }
        current
    }

    /// Context whose saved machine state is to be resumed. Stable between
    /// `exception` calls.
    pub fn proceed(&self) -> ContextId {
        self.sched.lock().current()
    }

    /// Ticks the current timeslice has already consumed.
    pub fn timeout_age(&self) -> Ticks {
        let armed = self.sched.lock().timeout().duration();
        armed.saturating_sub(self.timer.ticks_left())
    }

    /// Upper bound of any timeslice on this CPU.
    pub fn timeout_max(&self) -> Ticks {
        self.sched.lock().max_timeout()
    }

    /// Counter snapshot of this CPU's scheduler.
    pub fn stats(&self) -> SchedulerStats {
        self.sched.lock().stats()
    }

    /// Shared access to the scheduler for read paths the wrappers above
    /// do not cover (diagnostics, tests).
    pub fn scheduler(&self) -> &Mutex<Scheduler> {
        &self.sched
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GroupConfig;
    use core::sync::atomic::{AtomicU64, Ordering};

    /// Timer stub driven by the test
    struct FakeTimer {
        now: AtomicU64,
        armed: AtomicU64,
    }

    impl FakeTimer {
        fn new() -> Self {
            Self {
                now: AtomicU64::new(0),
                armed: AtomicU64::new(0),
            }
        }

        fn advance(&self, ticks: Ticks) {
            self.now.fetch_add(ticks, Ordering::Relaxed);
            let armed = self.armed.load(Ordering::Relaxed);
            self.armed.store(armed.saturating_sub(ticks), Ordering::Relaxed);
        }
    }

    impl Timer for FakeTimer {
        fn elapsed(&self) -> Ticks {
            self.now.load(Ordering::Relaxed)
        }

        fn set_timeout(&self, duration: Ticks) {
            self.armed.store(duration, Ordering::Relaxed);
        }

        fn ticks_left(&self) -> Ticks {
            self.armed.load(Ordering::Relaxed)
        }
    }

    const GROUPS: &[GroupConfig] = &[GroupConfig { weight: 1, warp: 0 }];

    fn processor(timer: &FakeTimer) -> Processor<&FakeTimer> {
        Processor::new(
            0,
            timer,
            &SchedulerConfig {
                groups: GROUPS,
                min_timeout: 10,
                max_timeout: 1000,
                capacity: 4,
            },
        )
        .expect("config should be valid")
    }

    #[test]
    fn test_exception_dispatches_idle_at_boot() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let idle = cpu.scheduler().lock().idle();
        assert_eq!(cpu.exception(), idle);
        assert_eq!(cpu.proceed(), idle);
    }

    #[test]
    fn test_exception_programs_the_timer() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        assert_eq!(cpu.exception(), a);
        // alone in its group: the timer carries the cap
        assert_eq!(timer.ticks_left(), 1000);
    }

    #[test]
    fn test_timer_interrupt_forces_reevaluation() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        let b = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        cpu.schedule(b);
        assert_eq!(cpu.exception(), a);

        timer.advance(timer.ticks_left());
        cpu.timer_interrupt();
        assert_eq!(cpu.exception(), b);
    }

    #[test]
    fn test_frequent_kernel_entries_do_not_defer_preemption() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        let b = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        cpu.schedule(b);
        assert_eq!(cpu.exception(), a);

        // a enters the kernel every 5 ticks, faster than the 10-tick
        // slice; the armed countdown must survive these no-op entries
        // so the equally eligible b still gets the CPU
        let mut now = 0;
        loop {
            timer.advance(5);
            now += 5;
            if timer.ticks_left() == 0 {
                cpu.timer_interrupt();
            }
            if cpu.exception() == b {
                break;
            }
            assert!(now < 100, "b was never selected");
        }
    }

    #[test]
    fn test_blocked_context_stops_running() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        assert_eq!(cpu.exception(), a);

        timer.advance(40);
        cpu.unready(a);
        let idle = cpu.scheduler().lock().idle();
        assert_eq!(cpu.exception(), idle);
        assert_eq!(cpu.scheduler().lock().context(a).execution_time(), 40);
    }

    #[test]
    fn test_timeout_age_tracks_consumed_slice() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        cpu.exception();

        timer.advance(300);
        assert_eq!(cpu.timeout_age(), 300);
        assert_eq!(cpu.timeout_max(), 1000);
    }

    #[test]
    fn test_yield_hands_over_within_min_timeout() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        let b = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.schedule(a);
        cpu.schedule(b);
        assert_eq!(cpu.exception(), a);

        cpu.yield_now();
        assert_eq!(cpu.exception(), b);
        let stats = cpu.stats();
        assert_eq!(stats.yields, 1);
        assert!(stats.switches >= 2);
    }

    #[test]
    fn test_detach_through_the_processor() {
        let timer = FakeTimer::new();
        let cpu = processor(&timer);
        let a = cpu.attach(GroupId(0)).expect("attach should succeed");
        let b = cpu.attach(GroupId(0)).expect("attach should succeed");
        cpu.help(a, b);
        cpu.schedule(a);
        cpu.detach(b);
        assert_eq!(cpu.exception(), a);
        assert_eq!(cpu.scheduler().lock().context(a).destination(), None);
    }
}
