//! Throughput statistics
//!
//! Provides `ThroughputStats` for summarising repeated throughput
//! observations of one test.

use serde::{Deserialize, Serialize};

/// Summary of a group of throughput observations
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputStats {
    /// Number of observations
    pub samples: usize,
    /// Arithmetic mean
    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    /// Smallest observation
    pub min: f64,
    /// Largest observation
    pub max: f64,
}

impl ThroughputStats {
    /// Compute statistics from a slice of observations.
    ///
    /// Values are sorted ascending before the summary is taken, so the
    /// result does not depend on input order. Every value counts; extremes
    /// are not trimmed.
    ///
    /// # Example
    /// ```
    /// use distbench_common::stats::ThroughputStats;
    ///
    /// let stats = ThroughputStats::from_values(&[405.0, 380.0, 391.0]);
    /// assert_eq!(stats.samples, 3);
    /// assert_eq!(stats.min, 380.0);
    /// assert_eq!(stats.max, 405.0);
    /// assert!((stats.mean - 392.0).abs() < 0.01);
    /// ```
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);

        let samples = sorted.len();
        let n = samples as f64;
        let mean = sorted.iter().sum::<f64>() / n;
        let variance = sorted.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

        Self {
            samples,
            mean,
            std: variance.sqrt(),
            min: sorted[0],
            max: sorted[samples - 1],
        }
    }

    /// Check if no observations were provided
    pub fn is_empty(&self) -> bool {
        self.samples == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_samples() {
        let stats = ThroughputStats::from_values(&[380.0, 391.0, 405.0]);
        assert_eq!(stats.samples, 3);
        assert!((stats.mean - 392.0).abs() < 0.01);
        assert_eq!(stats.min, 380.0);
        assert_eq!(stats.max, 405.0);
        // population std: sqrt(((-12)^2 + (-1)^2 + 13^2) / 3)
        assert!((stats.std - (314.0_f64 / 3.0).sqrt()).abs() < 1e-9);
    }

    #[test]
    fn test_single_sample_has_zero_std() {
        let stats = ThroughputStats::from_values(&[100.0]);
        assert_eq!(stats.samples, 1);
        assert_eq!(stats.std, 0.0);
        assert_eq!(stats.min, stats.max);
    }

    #[test]
    fn test_empty() {
        let stats = ThroughputStats::from_values(&[]);
        assert!(stats.is_empty());
        assert_eq!(stats, ThroughputStats::default());
    }

    #[test]
    fn test_order_independent() {
        let a = ThroughputStats::from_values(&[1.5, 9.0, 3.25, 7.0]);
        let b = ThroughputStats::from_values(&[7.0, 3.25, 9.0, 1.5]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_ten_samples_are_not_trimmed() {
        let values: Vec<f64> = (1..=10).map(f64::from).collect();
        let stats = ThroughputStats::from_values(&values);
        assert_eq!(stats.samples, 10);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 10.0);
        assert!((stats.mean - 5.5).abs() < 1e-12);
    }
}
