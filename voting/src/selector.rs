//! Random panel selection

use rand::seq::SliceRandom;
use rand::Rng;
use ras_core::{RasError, RasResult, ReviewerId};

/// Draws review panels uniformly at random, without replacement
#[derive(Debug, Clone, Copy)]
pub struct PanelSelector {
    panel_size: usize,
}

impl PanelSelector {
    pub fn new(panel_size: usize) -> Self {
        Self { panel_size }
    }

    /// Pick a panel using the thread-local RNG
    pub fn select(&self, pool: &[ReviewerId]) -> RasResult<Vec<ReviewerId>> {
        self.select_with(pool, &mut rand::thread_rng())
    }

    /// Pick a panel with a caller-supplied RNG.
    ///
    /// Duplicate ids are collapsed first, so a reviewer sits on a panel at
    /// most once.
    pub fn select_with<R: Rng + ?Sized>(
        &self,
        pool: &[ReviewerId],
        rng: &mut R,
    ) -> RasResult<Vec<ReviewerId>> {
        let mut eligible = pool.to_vec();
        eligible.sort_unstable();
        eligible.dedup();

        if eligible.len() < self.panel_size {
            return Err(RasError::InsufficientReviewers {
                required: self.panel_size,
                available: eligible.len(),
            });
        }

        Ok(eligible
            .choose_multiple(rng, self.panel_size)
            .copied()
            .collect())
    }
}
