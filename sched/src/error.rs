//! Scheduler error types
//!
//! Everything the scheduler can refuse is refused at the boundary:
//! configuration at boot, context attachment when the arena is sized out.
//! The scheduling operations themselves are total; inconsistent list
//! membership discovered at runtime is a fatal kernel bug and panics.

use core::fmt;

use crate::Ticks;

/// Boot-time configuration rejection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    /// The group table is empty; at least one priority class is required
    NoGroups,

    /// A group was configured with weight zero
    ZeroWeight { group: usize },

    /// The context arena has no slots
    ZeroCapacity,

    /// `min_timeout` must be a positive tick count
    ZeroMinTimeout,

    /// `max_timeout` must not undercut `min_timeout`
    TimeoutOrder { min: Ticks, max: Ticks },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoGroups => write!(f, "no scheduling groups configured"),
            Self::ZeroWeight { group } => {
                write!(f, "group {} has zero weight", group)
            }
            Self::ZeroCapacity => write!(f, "context arena capacity is zero"),
            Self::ZeroMinTimeout => write!(f, "min_timeout must be positive"),
            Self::TimeoutOrder { min, max } => {
                write!(f, "max_timeout {} below min_timeout {}", max, min)
            }
        }
    }
}

/// Context attachment failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachError {
    /// All arena slots are in use
    ArenaFull { capacity: usize },

    /// The named group does not exist in the configured table
    NoSuchGroup { group: u32, group_count: usize },
}

impl fmt::Display for AttachError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ArenaFull { capacity } => {
                write!(f, "context arena full ({} slots)", capacity)
            }
            Self::NoSuchGroup { group, group_count } => {
                write!(f, "group {} out of range ({} configured)", group, group_count)
            }
        }
    }
}
