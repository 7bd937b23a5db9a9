//! Engine tuning knobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Flow engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a client call may go unanswered before it is resent
    #[serde(default = "default_reply_timeout")]
    pub reply_timeout_secs: u64,

    /// Resends before the owning flow is failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Factor applied to the reply timeout after each resend
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// How often the daemon checks for overdue calls
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Direct transitions allowed in a single dispatch before the flow is
    /// considered stuck
    #[serde(default = "default_max_transitions")]
    pub max_transitions_per_dispatch: usize,

    /// Finished flows kept in memory for inspection
    #[serde(default = "default_archive_capacity")]
    pub archive_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            reply_timeout_secs: default_reply_timeout(),
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            sweep_interval_secs: default_sweep_interval(),
            max_transitions_per_dispatch: default_max_transitions(),
            archive_capacity: default_archive_capacity(),
        }
    }
}

impl EngineConfig {
    pub fn reply_timeout(&self) -> Duration {
        Duration::from_secs(self.reply_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

fn default_reply_timeout() -> u64 {
    600
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_sweep_interval() -> u64 {
    30
}

fn default_max_transitions() -> usize {
    64
}

fn default_archive_capacity() -> usize {
    1000
}
