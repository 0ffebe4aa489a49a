//! Configuration types

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Event bus defaults, applied when a subscription leaves an option unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BusConfig {
    /// Per-attempt handler timeout
    pub default_timeout: Duration,
    /// Retries after the first failed attempt
    pub default_retries: u32,
    /// Linear backoff unit; the delay before attempt N+1 is `unit * N`
    pub backoff_unit: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(5),
            default_retries: 2,
            backoff_unit: Duration::from_millis(50),
        }
    }
}

/// Batch manager settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    /// How long a batch collects proposals before its deadline elapses
    pub collection_deadline: Duration,
    /// Default minimum distinct agents when no explicit quorum is given
    pub default_quorum_min: usize,
    /// Retained-history cap; oldest decided/cancelled batches are evicted
    pub history_cap: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            collection_deadline: Duration::from_secs(30),
            default_quorum_min: 2,
            history_cap: 64,
        }
    }
}

/// Tie-break policy for the panel's weighted vote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieBreak {
    /// The candidate first seen in evaluation submission order wins.
    FirstSeen,
}

/// Evaluator panel settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PanelConfig {
    /// Fraction of configured judges that must support the winner to avoid
    /// a "low consensus" concern
    pub consensus_threshold: f64,
    /// Runner-up weight within this margin of the winner raises a
    /// "close decision" concern
    pub close_margin: f64,
    /// Combined rationale is truncated to this many characters
    pub rationale_cap: usize,
    /// Weighted-vote tie-break policy
    pub tie_break: TieBreak,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            consensus_threshold: 0.75,
            close_margin: 0.5,
            rationale_cap: 600,
            tie_break: TieBreak::FirstSeen,
        }
    }
}

/// Orchestrator settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// When true, skip the panel and pick a winner uniformly at random.
    /// Decisions from this path are flagged non-authoritative.
    pub simplified_mode: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            simplified_mode: false,
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConclaveConfig {
    pub bus: BusConfig,
    pub batch: BatchConfig,
    pub panel: PanelConfig,
    pub engine: EngineConfig,
}
