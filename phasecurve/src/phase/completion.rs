//! Target and duration completion detection.
//!
//! A phase completes when its observed quantity (the envelope value for
//! target phases, phase-elapsed time for duration phases) either lands
//! approximately on the target or crosses it strictly between two
//! consecutive observations. Crossing is detected in both directions, so
//! falling and rising phases behave the same way.

/// Whether `a` and `b` are equal within a relative `tolerance`.
///
/// The tolerance is scaled by the larger magnitude, with a floor of 1 so
/// values near zero compare with an absolute tolerance.
#[must_use]
pub fn approximately(a: f64, b: f64, tolerance: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= tolerance * scale
}

/// Whether moving from `previous` to `current` passed strictly through `target`.
#[must_use]
pub fn crossed(previous: f64, current: f64, target: f64) -> bool {
    (previous < target && current > target) || (previous > target && current < target)
}

/// One-observation-lagged crossing detector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossingDetector {
    last: f64,
}

impl CrossingDetector {
    /// Starts tracking from the observation made on phase entry.
    #[must_use]
    pub const fn new(entry: f64) -> Self {
        Self { last: entry }
    }

    /// Previous observation.
    #[must_use]
    pub const fn last(&self) -> f64 {
        self.last
    }

    /// Tests `current` against `target`.
    ///
    /// Returns `true` on a hit. On a miss the observation becomes the new
    /// lag for the next call.
    pub fn observe(&mut self, current: f64, target: f64, tolerance: f64) -> bool {
        if approximately(current, target, tolerance) || crossed(self.last, current, target) {
            return true;
        }
        self.last = current;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::phase::definition::DEFAULT_TOLERANCE;

    #[test]
    fn test_approximately_relative() {
        assert!(approximately(5.0, 5.0 + 1e-7, DEFAULT_TOLERANCE));
        assert!(approximately(1000.0, 1000.005, DEFAULT_TOLERANCE));
        assert!(!approximately(1000.0, 1000.05, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_approximately_absolute_floor_near_zero() {
        assert!(approximately(0.0, 1e-15, DEFAULT_TOLERANCE));
        assert!(approximately(0.0, -5e-6, DEFAULT_TOLERANCE));
        assert!(!approximately(0.0, 1e-3, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_crossed_both_directions() {
        assert!(crossed(4.0, 6.0, 5.0));
        assert!(crossed(6.0, 4.0, 5.0));
        assert!(!crossed(4.0, 4.5, 5.0));
        assert!(!crossed(5.0, 6.0, 5.0));
    }

    #[test]
    fn test_detector_hits_on_landing() {
        let mut detector = CrossingDetector::new(0.0);
        assert!(!detector.observe(4.0, 5.0, DEFAULT_TOLERANCE));
        assert_eq!(detector.last(), 4.0);
        assert!(detector.observe(5.0 + 1e-7, 5.0, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_detector_hits_on_overshoot() {
        let mut detector = CrossingDetector::new(0.0);
        assert!(!detector.observe(4.0, 5.0, DEFAULT_TOLERANCE));
        assert!(detector.observe(6.0, 5.0, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_detector_hits_on_understep() {
        let mut detector = CrossingDetector::new(10.0);
        assert!(!detector.observe(8.0, 4.0, DEFAULT_TOLERANCE));
        assert!(detector.observe(3.5, 4.0, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_detector_entry_observation_counts() {
        // Entering exactly on target is a hit without any movement.
        let mut detector = CrossingDetector::new(5.0);
        assert!(detector.observe(5.0, 5.0, DEFAULT_TOLERANCE));
    }

    #[test]
    fn test_detector_moving_away_never_hits() {
        let mut detector = CrossingDetector::new(0.0);
        for step in 1..100 {
            assert!(!detector.observe(-f64::from(step), 5.0, DEFAULT_TOLERANCE));
        }
    }
}
