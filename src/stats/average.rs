//! Decaying averages.
//!
//! [`DiscExponentialAverage`] implements discontiguous exponential averaging
//! (John C. Gunther, 1998). Unlike a plain exponential moving average it
//! copes with gaps in the sample stream, and it has neither initial value
//! bias nor post-gap bias.

use serde::{Deserialize, Serialize};

use crate::clock::USEC_PER_SEC;

/// Decay parameters shared by every average of the same kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayParams {
    /// Factor by which old data decays per `time_unit_usec`. Range (0, 1):
    /// lower values forget faster.
    pub alpha: f64,
    /// Educated guess of how long it takes for the sampled sequence to change
    /// significantly. A single gap never contributes more weight than one
    /// window of this length would.
    pub max_age_usec: u64,
    /// Time after which data has decayed by exactly `alpha`.
    pub time_unit_usec: u64,
}

impl Default for DecayParams {
    fn default() -> Self {
        Self {
            alpha: 0.8,
            max_age_usec: 60 * USEC_PER_SEC,
            time_unit_usec: USEC_PER_SEC,
        }
    }
}

impl DecayParams {
    fn new_data_weight_upper_bound(&self) -> f64 {
        1.0 - self
            .alpha
            .powf(self.max_age_usec as f64 / self.time_unit_usec as f64)
    }

    fn decay_over(&self, elapsed_usec: u64) -> f64 {
        self.alpha
            .powf(elapsed_usec as f64 / self.time_unit_usec as f64)
    }
}

#[derive(Debug, Clone)]
pub struct DiscExponentialAverage {
    params: DecayParams,
    sum_of_weights: f64,
    sum_of_data: f64,
    sum_of_squared_data: f64,
    prev_time: u64,
}

impl DiscExponentialAverage {
    pub fn new(params: DecayParams) -> Self {
        Self {
            params,
            sum_of_weights: 0.0,
            sum_of_data: 0.0,
            sum_of_squared_data: 0.0,
            prev_time: 0,
        }
    }

    /// Folds `value` into the average. Time must move strictly forward per
    /// instance; a sample at or before the previous one is ignored.
    pub fn update(&mut self, value: f64, now: u64) {
        if now <= self.prev_time {
            return;
        }

        let weight_reduction_factor = self.params.decay_over(now - self.prev_time);
        let new_data_weight = (1.0 - weight_reduction_factor)
            .min(self.params.new_data_weight_upper_bound());

        self.sum_of_weights = weight_reduction_factor * self.sum_of_weights + new_data_weight;
        self.sum_of_data = weight_reduction_factor * self.sum_of_data + new_data_weight * value;
        self.sum_of_squared_data =
            weight_reduction_factor * self.sum_of_squared_data + new_data_weight * value * value;
        self.prev_time = now;
    }

    pub fn available(&self) -> bool {
        self.sum_of_weights > 0.0
    }

    /// How much of the accumulated weight is left at `now`. Approaches zero
    /// as the data goes stale.
    pub fn completeness(&self, now: u64) -> f64 {
        self.params.decay_over(now.saturating_sub(self.prev_time)) * self.sum_of_weights
    }

    /// Weighted mean; `0.0` until the first sample.
    pub fn average(&self) -> f64 {
        if !self.available() {
            return 0.0;
        }
        self.sum_of_data / self.sum_of_weights
    }

    pub fn stddev(&self) -> f64 {
        if !self.available() {
            return 0.0;
        }
        let average = self.average();
        // Rounding can push the variance a hair below zero.
        (self.sum_of_squared_data / self.sum_of_weights - average * average)
            .max(0.0)
            .sqrt()
    }

    pub fn last_update_time(&self) -> u64 {
        self.prev_time
    }

    pub fn params(&self) -> &DecayParams {
        &self.params
    }
}

/// Plain exponential moving average, insensitive to sample timing.
///
/// Seed the running average with `null_value`; while `prev_average` equals it
/// the current value is returned as-is.
pub fn exponential_moving_average(
    prev_average: f64,
    current_value: f64,
    alpha: f64,
    null_value: f64,
) -> f64 {
    debug_assert!((0.0..=1.0).contains(&alpha));
    if prev_average == null_value {
        current_value
    } else {
        alpha * current_value + (1.0 - alpha) * prev_average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T0: u64 = 1_700_000_000 * USEC_PER_SEC;

    fn approx_eq(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_single_update_bootstraps_to_value() {
        let mut avg = DiscExponentialAverage::new(DecayParams::default());
        assert!(!avg.available());

        avg.update(42.0, T0);
        assert!(avg.available());
        assert!(approx_eq(avg.average(), 42.0));
        assert!(approx_eq(avg.stddev(), 0.0));
    }

    #[test]
    fn test_same_timestamp_is_ignored() {
        let mut single = DiscExponentialAverage::new(DecayParams::default());
        single.update(10.0, T0);

        let mut double = DiscExponentialAverage::new(DecayParams::default());
        double.update(10.0, T0);
        double.update(10.0, T0);
        assert!(approx_eq(double.average(), single.average()));

        // A different value at the same instant is ignored too
        double.update(1000.0, T0);
        assert!(approx_eq(double.average(), 10.0));
    }

    #[test]
    fn test_time_going_backwards_is_ignored() {
        let mut avg = DiscExponentialAverage::new(DecayParams::default());
        avg.update(5.0, T0);
        avg.update(500.0, T0 - USEC_PER_SEC);
        assert!(approx_eq(avg.average(), 5.0));
        assert_eq!(avg.last_update_time(), T0);
    }

    #[test]
    fn test_recent_samples_dominate() {
        let mut avg = DiscExponentialAverage::new(DecayParams::default());
        for i in 0..10 {
            avg.update(0.0, T0 + i * USEC_PER_SEC);
        }
        for i in 10..40 {
            avg.update(1.0, T0 + i * USEC_PER_SEC);
        }
        assert!(avg.average() > 0.9, "average = {}", avg.average());
        assert!(avg.stddev() > 0.0);
    }

    #[test]
    fn test_mixed_values_mean_and_stddev() {
        let mut avg = DiscExponentialAverage::new(DecayParams::default());
        avg.update(0.0, T0);
        avg.update(1.0, T0 + USEC_PER_SEC);
        let mean = avg.average();
        assert!(mean > 0.0 && mean < 1.0);
        let expected_stddev = (mean - mean * mean).sqrt();
        assert!((avg.stddev() - expected_stddev).abs() < 1e-6);
    }

    #[test]
    fn test_completeness_decays() {
        let mut avg = DiscExponentialAverage::new(DecayParams::default());
        avg.update(1.0, T0);
        let fresh = avg.completeness(T0);
        let stale = avg.completeness(T0 + 30 * USEC_PER_SEC);
        assert!(fresh > 0.0);
        assert!(stale < fresh);
    }

    #[test]
    fn test_exponential_moving_average() {
        assert!(approx_eq(exponential_moving_average(-1.0, 7.0, 0.5, -1.0), 7.0));
        assert!(approx_eq(exponential_moving_average(10.0, 20.0, 0.5, -1.0), 15.0));
        assert!(approx_eq(exponential_moving_average(10.0, 20.0, 0.0, -1.0), 10.0));
        assert!(approx_eq(exponential_moving_average(10.0, 20.0, 1.0, -1.0), 20.0));
    }
}
