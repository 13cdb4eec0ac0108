//! Construction-time configuration
//!
//! Supplied once at processor bring-up and immutable thereafter. The
//! group table, the timeout tuning constants and the arena capacity are
//! validated before the scheduler is built; a bad table is a boot-time
//! error, never a runtime one.

use crate::error::ConfigError;
use crate::Ticks;

/// Weight/warp pair defining one priority class
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GroupConfig {
    /// Share weight; must be positive. Member vtime grows by
    /// `elapsed / weight`, so a heavier group consumes virtual time
    /// more slowly and runs more often.
    pub weight: u64,

    /// Additive cross-group offset; a larger warp makes this group
    /// compare as earlier against others.
    pub warp: u64,
}

/// Per-processor scheduler configuration
#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig<'a> {
    /// Priority classes, one [`GroupConfig`] per group. Group handles are
    /// indices into this table.
    pub groups: &'a [GroupConfig],

    /// Minimum scheduling granularity in ticks. Also the exact amount a
    /// voluntary yield ages the running context by.
    pub min_timeout: Ticks,

    /// Upper bound on the re-evaluation timeout in ticks.
    pub max_timeout: Ticks,

    /// Number of context slots in the arena (idle excluded).
    pub capacity: usize,
}

impl SchedulerConfig<'_> {
    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.groups.is_empty() {
            return Err(ConfigError::NoGroups);
        }
        for (index, group) in self.groups.iter().enumerate() {
            if group.weight == 0 {
                return Err(ConfigError::ZeroWeight { group: index });
            }
        }
        if self.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.min_timeout == 0 {
            return Err(ConfigError::ZeroMinTimeout);
        }
        if self.max_timeout < self.min_timeout {
            return Err(ConfigError::TimeoutOrder {
                min: self.min_timeout,
                max: self.max_timeout,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ONE_GROUP: &[GroupConfig] = &[GroupConfig { weight: 1, warp: 0 }];

    fn config(groups: &[GroupConfig]) -> SchedulerConfig<'_> {
        SchedulerConfig {
            groups,
            min_timeout: 10,
            max_timeout: 1000,
            capacity: 8,
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(config(ONE_GROUP).validate().is_ok());
    }

    #[test]
    fn test_empty_group_table_rejected() {
        assert_eq!(config(&[]).validate(), Err(ConfigError::NoGroups));
    }

    #[test]
    fn test_zero_weight_rejected() {
        let groups = [
            GroupConfig { weight: 2, warp: 0 },
            GroupConfig { weight: 0, warp: 0 },
        ];
        assert_eq!(
            config(&groups).validate(),
            Err(ConfigError::ZeroWeight { group: 1 })
        );
    }

    #[test]
    fn test_inverted_timeouts_rejected() {
        let mut cfg = config(ONE_GROUP);
        cfg.max_timeout = 5;
        assert_eq!(
            cfg.validate(),
            Err(ConfigError::TimeoutOrder { min: 10, max: 5 })
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut cfg = config(ONE_GROUP);
        cfg.capacity = 0;
        assert_eq!(cfg.validate(), Err(ConfigError::ZeroCapacity));
    }
}
