//! Consumed interface of the dosing-decision engine.
//!
//! The coordinator never computes a recommendation itself; it records
//! intents, appends device data, and asks the engine to evaluate. All
//! methods are synchronous because the coordinator only ever calls them
//! from its serial worker.

use chrono::{DateTime, FixedOffset, Utc};

use crate::error::{CoordinatorError, EngineError};
use crate::settings::TherapySettings;
use pumphub_traits::{BasalDeliveryState, GlucoseSample, PumpEvent};

/// Rounding capability the engine may consult while evaluating; backed by
/// the active pump driver, identity when none is set.
pub trait DoseRounder {
    fn round_basal_rate(&self, units_per_hour: f64) -> f64;
    fn round_bolus_volume(&self, units: f64) -> f64;
}

pub trait DosingEngine: Send {
    /// Record a bolus the coordinator is about to enact. Exactly one of
    /// `confirm_dose` / `report_dose_failure` follows.
    fn record_intended_dose(&mut self, units: f64, at: DateTime<Utc>);

    fn confirm_dose(&mut self, units: f64, at: DateTime<Utc>);

    /// Roll back the most recent intended dose.
    fn report_dose_failure(&mut self, error: &CoordinatorError);

    /// Append samples to the glucose archive; returns the stored samples
    /// (deduplicated) for optional remote upload.
    fn append_glucose_samples(
        &mut self,
        samples: Vec<GlucoseSample>,
    ) -> Result<Vec<GlucoseSample>, EngineError>;

    fn append_pump_events(
        &mut self,
        events: Vec<PumpEvent>,
        last_reconciliation: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError>;

    /// Append a reservoir reading; returns the previous reading's volume,
    /// if any, for threshold-crossing checks.
    fn append_reservoir_reading(
        &mut self,
        units: f64,
        at: DateTime<Utc>,
    ) -> Result<Option<f64>, EngineError>;

    /// Evaluate the control loop and enact its recommendation.
    fn run_control_loop(&mut self, rounder: &dyn DoseRounder);

    /// When the loop last completed successfully; None if it never has.
    fn last_loop_completed(&self) -> Option<DateTime<Utc>>;

    fn latest_glucose(&self) -> Option<GlucoseSample>;

    fn settings_mut(&mut self) -> &mut TherapySettings;

    fn set_basal_delivery_state(&mut self, state: BasalDeliveryState);

    /// Propagate the pump-reported time zone to the engine's schedules.
    fn set_schedule_time_zone(&mut self, tz: FixedOffset);
}
