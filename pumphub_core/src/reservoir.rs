//! Reservoir and battery threshold-crossing detection.
//!
//! Stateless comparison of a previous and a new reading against an ascending
//! threshold list. The list is walked once and only the first threshold
//! straddled downward fires, so each crossing yields at most one
//! notification.

/// Warning levels and replacement detection for the insulin reservoir.
#[derive(Debug, Clone)]
pub struct ReservoirCfg {
    /// Ascending warning levels in units.
    pub warning_levels: Vec<f64>,
    /// An increase larger than this many units counts as a reservoir swap.
    pub replacement_rise_units: f64,
}

impl Default for ReservoirCfg {
    fn default() -> Self {
        Self {
            warning_levels: vec![10.0, 20.0, 30.0],
            replacement_rise_units: 1.0,
        }
    }
}

/// First threshold in the ascending list that `new` is at or below while
/// `previous` was above it.
pub fn first_crossed_threshold(previous: f64, new: f64, thresholds: &[f64]) -> Option<f64> {
    thresholds
        .iter()
        .copied()
        .find(|&t| new <= t && previous > t)
}

/// What a new reservoir reading means relative to the previous one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReservoirObservation {
    /// Reservoir ran dry; supersedes any low-level warning.
    Empty,
    /// Volume rose by more than the replacement threshold; prior warnings
    /// no longer apply.
    Replaced,
    /// Crossed down through the given warning level.
    Low(f64),
    Unremarkable,
}

/// Classify a reservoir reading. `previous` is `None` on the first reading
/// after startup or a reservoir swap, which can never fire a crossing.
pub fn assess(previous: Option<f64>, new: f64, cfg: &ReservoirCfg) -> ReservoirObservation {
    if new <= 0.0 {
        return ReservoirObservation::Empty;
    }
    let Some(prev) = previous else {
        return ReservoirObservation::Unremarkable;
    };
    if new > prev + cfg.replacement_rise_units {
        return ReservoirObservation::Replaced;
    }
    match first_crossed_threshold(prev, new, &cfg.warning_levels) {
        Some(level) => ReservoirObservation::Low(level),
        None => ReservoirObservation::Unremarkable,
    }
}
