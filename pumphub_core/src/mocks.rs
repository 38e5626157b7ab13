//! Test and helper mocks for pumphub_core

use chrono::{DateTime, FixedOffset, Utc};

use crate::engine::{DoseRounder, DosingEngine};
use crate::error::{CoordinatorError, EngineError};
use crate::settings::TherapySettings;
use pumphub_traits::{BasalDeliveryState, GlucoseSample, PumpEvent};

/// An engine that accepts everything and recommends nothing; useful for
/// wiring up a coordinator when only device plumbing is under test.
#[derive(Default)]
pub struct NoopEngine {
    settings: TherapySettings,
    latest: Option<GlucoseSample>,
    last_loop: Option<DateTime<Utc>>,
    last_reservoir: Option<f64>,
}

impl DosingEngine for NoopEngine {
    fn record_intended_dose(&mut self, _units: f64, _at: DateTime<Utc>) {}

    fn confirm_dose(&mut self, _units: f64, _at: DateTime<Utc>) {}

    fn report_dose_failure(&mut self, _error: &CoordinatorError) {}

    fn append_glucose_samples(
        &mut self,
        samples: Vec<GlucoseSample>,
    ) -> Result<Vec<GlucoseSample>, EngineError> {
        if let Some(last) = samples.last() {
            self.latest = Some(last.clone());
        }
        Ok(samples)
    }

    fn append_pump_events(
        &mut self,
        _events: Vec<PumpEvent>,
        _last_reconciliation: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError> {
        Ok(())
    }

    fn append_reservoir_reading(
        &mut self,
        units: f64,
        _at: DateTime<Utc>,
    ) -> Result<Option<f64>, EngineError> {
        Ok(self.last_reservoir.replace(units))
    }

    fn run_control_loop(&mut self, _rounder: &dyn DoseRounder) {}

    fn last_loop_completed(&self) -> Option<DateTime<Utc>> {
        self.last_loop
    }

    fn latest_glucose(&self) -> Option<GlucoseSample> {
        self.latest.clone()
    }

    fn settings_mut(&mut self) -> &mut TherapySettings {
        &mut self.settings
    }

    fn set_basal_delivery_state(&mut self, _state: BasalDeliveryState) {}

    fn set_schedule_time_zone(&mut self, _tz: FixedOffset) {}
}
