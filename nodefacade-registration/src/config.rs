//! Engine configuration.

use crate::backoff::BackoffConfig;
use crate::client::heartbeat_interval_in_range;
use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tuning for the registration lifecycle engine.
///
/// Durations are carried as milliseconds so the struct maps directly onto
/// the agent's JSON configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Heartbeat period used until a registry reports its own.
    pub default_heartbeat_interval_ms: u64,
    /// Upper bound on one registry request. A call that makes several
    /// requests gets this budget per request.
    pub request_timeout_ms: u64,
    /// Consecutive failures tolerated before abandoning a registry.
    pub failure_threshold: u32,
    /// A registration is presumed gone registry-side once this many lease
    /// intervals pass without a successful exchange.
    pub lease_expiry_factor: u32,
    /// Quiet period collecting store changes into one push.
    pub push_debounce_ms: u64,
    /// Snapshot push rounds allowed before abandoning a registry.
    pub max_registration_attempts: u32,
    /// How long an abandoned registry is passed over.
    pub cooldown_ms: u64,
    /// Budget for deregistering on shutdown.
    pub deregister_timeout_ms: u64,
    /// Retry pacing in DEGRADED and REGISTERING.
    pub backoff: BackoffConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_heartbeat_interval_ms: 5_000,
            request_timeout_ms: 1_000,
            failure_threshold: 3,
            lease_expiry_factor: 3,
            push_debounce_ms: 100,
            max_registration_attempts: 3,
            cooldown_ms: 30_000,
            deregister_timeout_ms: 3_000,
            backoff: BackoffConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn default_heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.default_heartbeat_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn push_debounce(&self) -> Duration {
        Duration::from_millis(self.push_debounce_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.cooldown_ms)
    }

    pub fn deregister_timeout(&self) -> Duration {
        Duration::from_millis(self.deregister_timeout_ms)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !heartbeat_interval_in_range(self.default_heartbeat_interval()) {
            return Err(EngineError::Config(
                "default_heartbeat_interval_ms must be between 1 s and 1 h".into(),
            ));
        }
        if self.request_timeout_ms == 0 {
            return Err(EngineError::Config("request_timeout_ms must be positive".into()));
        }
        if self.failure_threshold == 0 {
            return Err(EngineError::Config("failure_threshold must be at least 1".into()));
        }
        if self.lease_expiry_factor == 0 {
            return Err(EngineError::Config("lease_expiry_factor must be at least 1".into()));
        }
        if self.max_registration_attempts == 0 {
            return Err(EngineError::Config(
                "max_registration_attempts must be at least 1".into(),
            ));
        }
        if self.backoff.multiplier < 1.0 {
            return Err(EngineError::Config("backoff.multiplier must be >= 1.0".into()));
        }
        if self.backoff.initial_delay_ms > self.backoff.max_delay_ms {
            return Err(EngineError::Config(
                "backoff.initial_delay_ms exceeds backoff.max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}
