//! Demand configuration for requesting sinks.
//!
//! Sinks request elements in a window, GenStage style: they first pull
//! `max_demand` elements and, whenever the demand still outstanding falls to
//! `min_demand`, pull again to bring it back up to `max_demand`. The default
//! window of one element requests each element only after the previous one
//! was handled.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::cell::Cell;

use crate::core::{Error, Inlet, Result};

/// Demand window of a requesting sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DemandConfig {
    /// Maximum number of elements outstanding at any time
    pub max_demand: u64,
    /// Outstanding demand at or below which the window is refilled
    pub min_demand: u64,
}

impl Default for DemandConfig {
    fn default() -> Self {
        Self {
            max_demand: 1,
            min_demand: 0,
        }
    }
}

impl DemandConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum outstanding demand
    pub fn max_demand(mut self, max_demand: u64) -> Self {
        self.max_demand = max_demand;
        self
    }

    /// Set the refill threshold
    pub fn min_demand(mut self, min_demand: u64) -> Self {
        self.min_demand = min_demand;
        self
    }

    /// Check that the window can make progress.
    pub fn validate(&self) -> Result<()> {
        if self.max_demand == 0 {
            return Err(Error::invalid_config("max_demand must be greater than zero"));
        }
        if self.min_demand >= self.max_demand {
            return Err(Error::invalid_config(format!(
                "min_demand ({}) must be lower than max_demand ({})",
                self.min_demand, self.max_demand
            )));
        }
        Ok(())
    }
}

/// Per-logic bookkeeping of a [`DemandConfig`] window.
#[derive(Debug)]
pub struct DemandWindow {
    config: DemandConfig,
    outstanding: Cell<u64>,
}

impl DemandWindow {
    pub fn new(config: DemandConfig) -> Self {
        Self {
            config,
            outstanding: Cell::new(0),
        }
    }

    /// Demand requested and not yet delivered.
    pub fn outstanding(&self) -> u64 {
        self.outstanding.get()
    }

    /// Issue the initial request.
    pub fn start(&self, inlet: &Inlet) {
        self.outstanding.set(self.config.max_demand);
        inlet.pull(self.config.max_demand);
    }

    /// Account for one delivered element, refilling the window if needed.
    pub fn received(&self, inlet: &Inlet) {
        let left = self.outstanding.get().saturating_sub(1);
        if left > self.config.min_demand {
            self.outstanding.set(left);
            return;
        }
        // Bookkeeping first: the pull may deliver synchronously.
        self.outstanding.set(self.config.max_demand);
        inlet.pull(self.config.max_demand - left);
    }
}
