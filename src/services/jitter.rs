//! Jittered rotation threshold
//!
//! Identities provisioned together get certificates with near-identical
//! lifetimes. Drawing a fresh threshold on every evaluation spreads their
//! rotation points across a band instead of a single instant.

use rand::Rng;

/// Randomize `percentage` upward by at most `percentage * max_factor`.
///
/// A non-positive `max_factor` is treated as `1.0`. The result lies in
/// `[percentage, percentage + percentage * max_factor)`.
pub fn jitter(percentage: f64, max_factor: f64) -> f64 {
    let max_factor = if max_factor <= 0.0 { 1.0 } else { max_factor };
    percentage + percentage * rand::thread_rng().gen::<f64>() * max_factor
}

/// Configured threshold band
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterPolicy {
    pub base_percentage: f64,
    pub spread_factor: f64,
}

impl JitterPolicy {
    pub fn new(base_percentage: f64, spread_factor: f64) -> Self {
        Self {
            base_percentage,
            spread_factor,
        }
    }

    /// Draw a threshold; never cached
    pub fn threshold(&self) -> f64 {
        jitter(self.base_percentage, self.spread_factor)
    }

    /// Lower bound of the band (inclusive)
    pub fn min_threshold(&self) -> f64 {
        self.base_percentage
    }

    /// Upper bound of the band (exclusive)
    pub fn max_threshold(&self) -> f64 {
        let factor = if self.spread_factor <= 0.0 {
            1.0
        } else {
            self.spread_factor
        };
        self.base_percentage + self.base_percentage * factor
    }
}

impl Default for JitterPolicy {
    fn default() -> Self {
        Self::new(0.2, 0.25)
    }
}
