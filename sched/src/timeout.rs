//! Timeout - one-shot re-evaluation alarm
//!
//! The scheduler computes, on every update, how long the freshly chosen
//! context may run before some other context would compare as earlier,
//! and arms this alarm with that duration. The processor wrapper
//! translates it to the hardware timer; when the timer fires, the
//! scheduler is marked out of date and the next kernel entry re-runs the
//! selection even though no context explicitly changed state.
//!
//! The generation counter advances on every arming, so the processor can
//! tell a fresh deadline from a no-op update and leave the hardware
//! countdown running across kernel entries.

use crate::Ticks;

/// Armed one-shot alarm owned by the scheduler
#[derive(Debug, Clone, Copy)]
pub struct Timeout {
    duration: Ticks,
    generation: u64,
}

impl Timeout {
    pub(crate) const fn new(duration: Ticks) -> Self {
        Self {
            duration,
            generation: 0,
        }
    }

    pub(crate) fn arm(&mut self, duration: Ticks) {
        self.duration = duration;
        self.generation = self.generation.wrapping_add(1);
    }

    /// Duration the hardware timer is to be programmed with, in ticks
    pub fn duration(&self) -> Ticks {
        self.duration
    }

    /// Arming counter; changes exactly when a new deadline was computed
    pub fn generation(&self) -> u64 {
        self.generation
    }
}
