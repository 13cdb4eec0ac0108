//! vela-sched - per-CPU scheduling core of the Vela microkernel
//!
//! Virtual-time fair-share scheduling with priority groups, scheduling-
//! context donation ("helping") and a per-processor wrapper that turns
//! timer interrupts into scheduling decisions.
//!
//! The crate is `no_std`; `alloc` is used once at processor bring-up to
//! size the context arena and the group table, never on the scheduling
//! hot path. All operations run with interrupts disabled on their own
//! CPU and are O(groups + queue scan), lock-free inside the core.
//!
//! Entry points, in the order a kernel uses them:
//! - [`Processor::new`] at CPU bring-up with a [`SchedulerConfig`],
//! - [`Processor::attach`] / [`Processor::schedule`] as threads appear,
//! - [`Processor::exception`] on every kernel entry to learn which
//!   context to resume,
//! - [`Processor::timer_interrupt`] when the armed timeout fires,
//! - [`Scheduler::help`] and friends from the IPC layer.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arena;
pub mod config;
pub mod context;
pub mod error;
pub mod group;
pub mod processor;
pub mod scheduler;
pub mod stats;
pub mod timeout;

/// Monotonic time in platform timer ticks
pub type Ticks = u64;

pub use config::{GroupConfig, SchedulerConfig};
pub use context::{Context, ContextId, ContextState};
pub use error::{AttachError, ConfigError};
pub use group::{Group, GroupId};
pub use processor::{Processor, Timer};
pub use scheduler::Scheduler;
pub use stats::SchedulerStats;
pub use timeout::Timeout;
