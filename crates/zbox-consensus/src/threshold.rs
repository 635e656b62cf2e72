//! Agreement thresholds.
//!
//! An entry is accepted once
//! `ceil(threshold_percent * full_consensus / 100)` blobbers report it,
//! never fewer than one.

use serde::{Deserialize, Serialize};
use zbox_protocol::DEFAULT_CONSENSUS_THRESHOLD;

use crate::ConsensusError;

/// Threshold configuration for one listing.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusConfig {
    /// Percentage of `full_consensus` that must agree, in `(0, 100]`.
    pub threshold_percent: f64,
    /// Number of responses expected when every blobber answers.
    pub full_consensus: usize,
}

impl ConsensusConfig {
    pub fn new(threshold_percent: f64, full_consensus: usize) -> Result<Self, ConsensusError> {
        if !(threshold_percent > 0.0 && threshold_percent <= 100.0) {
            return Err(ConsensusError::InvalidThreshold(format!(
                "{} is not within (0, 100]",
                threshold_percent
            )));
        }
        if full_consensus == 0 {
            return Err(ConsensusError::InvalidThreshold(
                "full consensus must be at least 1".into(),
            ));
        }
        Ok(Self {
            threshold_percent,
            full_consensus,
        })
    }

    /// Default threshold over `full_consensus` blobbers.
    pub fn with_default_threshold(full_consensus: usize) -> Self {
        Self {
            threshold_percent: DEFAULT_CONSENSUS_THRESHOLD,
            full_consensus: full_consensus.max(1),
        }
    }

    /// Minimum number of agreeing responses.
    pub fn min_agreement(&self) -> usize {
        let required = (self.threshold_percent * self.full_consensus as f64 / 100.0).ceil();
        (required as usize).max(1)
    }

    pub fn is_met(&self, count: usize) -> bool {
        count >= self.min_agreement()
    }
}

/// Agreement counter of one merged entry, with the thresholds it is judged by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Consensus {
    pub count: usize,
    pub threshold_percent: f64,
    pub full_consensus: usize,
}

impl Consensus {
    pub fn new(config: &ConsensusConfig) -> Self {
        Self {
            count: 0,
            threshold_percent: config.threshold_percent,
            full_consensus: config.full_consensus,
        }
    }

    fn config(&self) -> ConsensusConfig {
        ConsensusConfig {
            threshold_percent: self.threshold_percent,
            full_consensus: self.full_consensus,
        }
    }

    /// Record one more agreeing response; returns the new count.
    pub fn increment(&mut self) -> usize {
        self.count += 1;
        self.count
    }

    pub fn min_agreement(&self) -> usize {
        self.config().min_agreement()
    }

    pub fn is_min_reached(&self) -> bool {
        self.config().is_met(self.count)
    }
}
