//! Pool configuration types

use std::time::Duration;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`Pool`](crate::Pool)
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PoolConfig {
    /// Minimum number of resources (available + in use) the pool keeps alive
    pub min_size: usize,
    /// Maximum number of resources that may exist at the same time
    pub max_size: usize,
    /// Releases after which a resource is retired; `None` or `Some(0)` means unbounded
    pub max_uses: Option<usize>,
    /// Time an available resource may sit unused before it is reaped
    pub idle_timeout: Duration,
    /// Time an acquire may wait before failing with a timeout
    pub acquire_timeout: Duration,
    /// Interval between idle reaping passes
    pub reap_interval: Duration,
    /// Interval at which `drain` re-checks outstanding work
    pub drain_poll_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_size: 0,
            max_size: 10,
            max_uses: None,
            idle_timeout: Duration::from_secs(30),
            acquire_timeout: Duration::from_secs(30),
            reap_interval: Duration::from_secs(1),
            drain_poll_interval: Duration::from_millis(100),
        }
    }
}

impl PoolConfig {
    /// Validate pool configuration, returning an error if invalid.
    ///
    /// Zero durations are not errors; the pool substitutes the defaults.
    pub fn validate(&self) -> Result<()> {
        if self.max_size == 0 {
            return Err(Error::configuration("max must be an integer > 0"));
        }
        if self.min_size > self.max_size {
            return Err(Error::configuration(format!(
                "max is smaller than min ({} > {})",
                self.min_size, self.max_size
            )));
        }
        Ok(())
    }

    /// Replace zero durations with their defaults.
    pub(crate) fn with_zero_durations_defaulted(mut self) -> Self {
        let defaults = Self::default();
        for (value, fallback) in [
            (&mut self.idle_timeout, defaults.idle_timeout),
            (&mut self.acquire_timeout, defaults.acquire_timeout),
            (&mut self.reap_interval, defaults.reap_interval),
            (&mut self.drain_poll_interval, defaults.drain_poll_interval),
        ] {
            if value.is_zero() {
                *value = fallback;
            }
        }
        self
    }

    /// Use-count ceiling, if one applies.
    pub(crate) fn use_limit(&self) -> Option<usize> {
        self.max_uses.filter(|&uses| uses > 0)
    }
}
