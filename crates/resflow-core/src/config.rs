//! Engine configuration.
//!
//! Every field has a default, so a config file only needs to name the
//! options it overrides. Loading from disk lives in `resflow-data`.

use serde::{Deserialize, Serialize};

use crate::conversion::DEFAULT_RETAINED_EXECUTIONS;
use crate::error::ValidationError;
use crate::fixed::{Fixed64, Millis, f64_to_fixed64};

/// Per-phase batch sizes for the optimizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSizes {
    /// Nodes per batch in the availability and demand phases.
    pub nodes: usize,
    /// Converters per batch in the converter phase.
    pub converters: usize,
    /// Connections per batch in the rate-assignment phase.
    pub connections: usize,
}

impl BatchSizes {
    /// The same batch size for every phase.
    pub fn uniform(size: usize) -> Self {
        Self {
            nodes: size,
            converters: size,
            connections: size,
        }
    }
}

impl Default for BatchSizes {
    fn default() -> Self {
        Self {
            nodes: 256,
            converters: 64,
            connections: 256,
        }
    }
}

/// Tunables for a [`crate::engine::FlowEngine`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// How long a cached resource state stays valid.
    pub cache_ttl_ms: Millis,
    pub batch_sizes: BatchSizes,
    /// Maximum number of transfer records retained by the history ledger.
    pub history_max_size: usize,
    /// Fraction of availability that may go unused before a resource type
    /// is reported as underutilized.
    pub underutilization_slack: f64,
    /// Terminal processes, and separately terminal chain executions, kept
    /// for status queries before the oldest are dropped.
    pub retained_executions: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_ttl_ms: 250,
            batch_sizes: BatchSizes::default(),
            history_max_size: 1024,
            underutilization_slack: 0.25,
            retained_executions: DEFAULT_RETAINED_EXECUTIONS,
        }
    }
}

impl EngineConfig {
    /// Reject configurations the engine cannot run with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let b = &self.batch_sizes;
        if b.nodes == 0 || b.converters == 0 || b.connections == 0 {
            return Err(ValidationError::InvalidConfig(
                "batch sizes must be at least 1".to_string(),
            ));
        }
        if self.history_max_size == 0 {
            return Err(ValidationError::InvalidConfig(
                "history_max_size must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.underutilization_slack) {
            return Err(ValidationError::InvalidConfig(format!(
                "underutilization_slack {} outside [0, 1]",
                self.underutilization_slack
            )));
        }
        Ok(())
    }

    /// The slack threshold in engine arithmetic.
    pub fn slack(&self) -> Fixed64 {
        f64_to_fixed64(self.underutilization_slack)
    }
}
