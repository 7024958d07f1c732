//! Exponential moving average used for the response-time metric.

/// A single-pole exponential moving average with a fixed smoothing factor.
///
/// `alpha = 0.2` weights the most recent sample at 20% and decays history
/// geometrically; it is not configurable because the metrics surface reports
/// one consistent number across layers.
#[derive(Debug, Clone, Copy)]
pub struct Ema {
    alpha: f64,
    value: Option<f64>,
}

const DEFAULT_ALPHA: f64 = 0.2;

impl Ema {
    #[must_use]
    pub fn new() -> Self {
        Self {
            alpha: DEFAULT_ALPHA,
            value: None,
        }
    }

    /// Folds a new sample (in milliseconds) into the running average.
    pub fn observe(&mut self, sample_ms: f64) {
        self.value = Some(match self.value {
            Some(prev) => self.alpha.mul_add(sample_ms - prev, prev),
            None => sample_ms,
        });
    }

    /// Current average, or `0.0` if no sample has been observed yet.
    #[must_use]
    pub fn get(&self) -> f64 {
        self.value.unwrap_or(0.0)
    }
}

impl Default for Ema {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_sample_is_returned_verbatim() {
        let mut ema = Ema::new();
        ema.observe(10.0);
        assert!((ema.get() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn converges_toward_repeated_sample() {
        let mut ema = Ema::new();
        ema.observe(10.0);
        for _ in 0..50 {
            ema.observe(20.0);
        }
        assert!((ema.get() - 20.0).abs() < 0.01);
    }

    #[test]
    fn weights_new_sample_at_alpha() {
        let mut ema = Ema::new();
        ema.observe(100.0);
        ema.observe(0.0);
        assert!((ema.get() - 80.0).abs() < 1e-9);
    }

    #[test]
    fn default_is_zero_until_first_observation() {
        let ema = Ema::new();
        assert_eq!(ema.get(), 0.0);
    }
}
