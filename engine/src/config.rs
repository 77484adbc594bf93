//! Engine configuration.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Every knob can also be overridden in code via the `with_*` builders,
//! which the tests use to shrink timeouts.

use slotsync_runtime::retry::RetryPolicy;
use std::env;
use std::time::Duration;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// How long a reservation may stay unconfirmed before the engine gives
    /// up waiting and re-syncs from the server
    pub reserve_timeout: Duration,

    /// Consistency poller interval (full snapshot re-fetch cadence)
    pub poll_interval: Duration,

    /// Delay between an optimistic slot publish and its reconciling re-fetch
    pub publish_refetch_delay: Duration,

    /// First reconnect delay after a channel failure
    pub reconnect_initial_delay: Duration,

    /// Cap on the reconnect backoff
    pub reconnect_max_delay: Duration,

    /// Reconnect backoff multiplier
    pub reconnect_multiplier: f64,

    /// How long `shutdown` waits for in-flight effects before giving up
    pub shutdown_timeout: Duration,

    /// Store action broadcast capacity
    pub broadcast_capacity: usize,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            reserve_timeout: env_ms("SLOTSYNC_RESERVE_TIMEOUT_MS", defaults.reserve_timeout),
            poll_interval: env_ms("SLOTSYNC_POLL_INTERVAL_MS", defaults.poll_interval),
            publish_refetch_delay: env_ms(
                "SLOTSYNC_PUBLISH_REFETCH_DELAY_MS",
                defaults.publish_refetch_delay,
            ),
            reconnect_initial_delay: env_ms(
                "SLOTSYNC_RECONNECT_INITIAL_DELAY_MS",
                defaults.reconnect_initial_delay,
            ),
            reconnect_max_delay: env_ms(
                "SLOTSYNC_RECONNECT_MAX_DELAY_MS",
                defaults.reconnect_max_delay,
            ),
            reconnect_multiplier: env::var("SLOTSYNC_RECONNECT_MULTIPLIER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.reconnect_multiplier),
            shutdown_timeout: env_ms("SLOTSYNC_SHUTDOWN_TIMEOUT_MS", defaults.shutdown_timeout),
            broadcast_capacity: env::var("SLOTSYNC_BROADCAST_CAPACITY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.broadcast_capacity),
        }
    }

    /// Override the reservation timeout
    #[must_use]
    pub const fn with_reserve_timeout(mut self, timeout: Duration) -> Self {
        self.reserve_timeout = timeout;
        self
    }

    /// Override the poll interval
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Override the publish re-fetch delay
    #[must_use]
    pub const fn with_publish_refetch_delay(mut self, delay: Duration) -> Self {
        self.publish_refetch_delay = delay;
        self
    }

    /// Override the reconnect backoff bounds
    #[must_use]
    pub const fn with_reconnect_delays(mut self, initial: Duration, max: Duration) -> Self {
        self.reconnect_initial_delay = initial;
        self.reconnect_max_delay = max;
        self
    }

    /// Override the shutdown timeout
    #[must_use]
    pub const fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// The retry schedule the reconnect loop follows
    ///
    /// Jittered so a fleet of clients does not reconnect in lockstep after a
    /// server restart. The loop itself is unbounded; only delays grow.
    #[must_use]
    pub fn reconnect_policy(&self) -> RetryPolicy {
        RetryPolicy::builder()
            .initial_delay(self.reconnect_initial_delay)
            .max_delay(self.reconnect_max_delay)
            .multiplier(self.reconnect_multiplier)
            .jitter(true)
            .build()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reserve_timeout: Duration::from_secs(8),
            poll_interval: Duration::from_secs(30),
            publish_refetch_delay: Duration::from_secs(1),
            reconnect_initial_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(30),
            reconnect_multiplier: 2.0,
            shutdown_timeout: Duration::from_secs(5),
            broadcast_capacity: 64,
        }
    }
}

fn env_ms(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .map_or(default, Duration::from_millis)
}
