//! Simulated devices and a demo dosing engine for running the coordinator
//! without hardware.

use std::f64::consts::TAU;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Offset, Utc};

use pumphub_core::engine::{DoseRounder, DosingEngine};
use pumphub_core::error::{CoordinatorError, EngineError};
use pumphub_core::notify::{AlarmSink, AnalyticsSink, Notification, NotificationSink, UploadSink};
use pumphub_core::settings::TherapySettings;
use pumphub_traits::{
    BasalDeliveryState, Clock, DriverCompletion, FetchCompletion, GlucoseFetchResult,
    GlucoseMonitor, GlucoseSample, MonitorDelegate, Pump, PumpDelegate, PumpStatusSnapshot,
};

/// Sine period of the simulated glucose trace, in simulated seconds.
const GLUCOSE_PERIOD_SECS: f64 = 3.0 * 3600.0;
const GLUCOSE_BASELINE_MGDL: f64 = 120.0;
const GLUCOSE_AMPLITUDE_MGDL: f64 = 45.0;

/// CGM that synthesizes one fresh reading per fetch from a slow sine wave.
pub struct SimMonitor {
    clock: Arc<dyn Clock>,
    anchor: DateTime<Utc>,
}

impl SimMonitor {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let anchor = clock.now();
        Self { clock, anchor }
    }

    fn glucose_at(&self, at: DateTime<Utc>) -> f64 {
        let elapsed = (at - self.anchor).num_seconds() as f64;
        let phase = elapsed / GLUCOSE_PERIOD_SECS * TAU;
        GLUCOSE_BASELINE_MGDL + GLUCOSE_AMPLITUDE_MGDL * phase.sin()
    }
}

impl GlucoseMonitor for SimMonitor {
    fn device_id(&self) -> &str {
        "sim-cgm"
    }

    fn set_delegate(&mut self, _delegate: Option<Arc<dyn MonitorDelegate>>) {}

    fn fetch_if_needed(&mut self, completion: FetchCompletion) {
        let now = self.clock.now();
        let sample = GlucoseSample::new(now, self.glucose_at(now));
        completion(GlucoseFetchResult::NewData(vec![sample]));
    }
}

/// Shared, inspectable state of the simulated pump.
pub struct SimPumpState {
    pub reservoir_units: Mutex<f64>,
    pub battery_percent: Mutex<f64>,
}

pub struct SimPump {
    state: Arc<SimPumpState>,
}

impl SimPump {
    pub fn new(reservoir_units: f64) -> (Self, Arc<SimPumpState>) {
        let state = Arc::new(SimPumpState {
            reservoir_units: Mutex::new(reservoir_units),
            battery_percent: Mutex::new(100.0),
        });
        (
            Self {
                state: state.clone(),
            },
            state,
        )
    }
}

impl SimPumpState {
    pub fn snapshot(&self) -> PumpStatusSnapshot {
        PumpStatusSnapshot {
            battery_percent: Some(*lock_f64(&self.battery_percent)),
            basal_state: BasalDeliveryState::Active,
            time_zone: Utc.fix(),
        }
    }

    pub fn reservoir(&self) -> f64 {
        *lock_f64(&self.reservoir_units)
    }

    pub fn drain(&self, insulin_units: f64, battery_points: f64) {
        let mut reservoir = lock_f64(&self.reservoir_units);
        *reservoir = (*reservoir - insulin_units).max(0.0);
        drop(reservoir);
        let mut battery = lock_f64(&self.battery_percent);
        *battery = (*battery - battery_points).max(0.0);
    }
}

fn lock_f64(m: &Mutex<f64>) -> std::sync::MutexGuard<'_, f64> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

impl Pump for SimPump {
    fn device_id(&self) -> &str {
        "sim-pump"
    }

    fn set_delegate(&mut self, _delegate: Option<Arc<dyn PumpDelegate>>) {}

    fn status(&self) -> PumpStatusSnapshot {
        self.state.snapshot()
    }

    fn enact_bolus(&mut self, units: f64, _at: DateTime<Utc>, completion: DriverCompletion) {
        let mut reservoir = lock_f64(&self.state.reservoir_units);
        if *reservoir < units {
            completion(Err("insufficient insulin remaining".into()));
            return;
        }
        *reservoir -= units;
        tracing::info!(units, remaining = *reservoir, "sim pump delivered bolus");
        completion(Ok(()));
    }

    fn assert_current_data(&mut self) {}

    fn set_must_provide_heartbeat(&mut self, required: bool) {
        tracing::debug!(required, "sim pump heartbeat requirement updated");
    }

    fn round_basal_rate(&self, units_per_hour: f64) -> f64 {
        (units_per_hour / 0.05).floor() * 0.05
    }

    fn round_bolus_volume(&self, units: f64) -> f64 {
        (units / 0.05).floor() * 0.05
    }
}

/// Demo engine: archives everything in memory and logs a naive correction
/// recommendation on each loop.
pub struct InMemoryEngine {
    clock: Arc<dyn Clock>,
    settings: TherapySettings,
    samples: Vec<GlucoseSample>,
    reservoir: Vec<f64>,
    last_loop: Option<DateTime<Utc>>,
    basal_state: BasalDeliveryState,
}

impl InMemoryEngine {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            settings: TherapySettings::new(),
            samples: Vec::new(),
            reservoir: Vec::new(),
            last_loop: None,
            basal_state: BasalDeliveryState::Active,
        }
    }
}

impl DosingEngine for InMemoryEngine {
    fn record_intended_dose(&mut self, units: f64, at: DateTime<Utc>) {
        tracing::info!(units, %at, "dose intent recorded");
    }

    fn confirm_dose(&mut self, units: f64, _at: DateTime<Utc>) {
        tracing::info!(units, "dose confirmed");
    }

    fn report_dose_failure(&mut self, error: &CoordinatorError) {
        tracing::warn!(%error, "dose rolled back");
    }

    fn append_glucose_samples(
        &mut self,
        samples: Vec<GlucoseSample>,
    ) -> Result<Vec<GlucoseSample>, EngineError> {
        self.samples.extend(samples.clone());
        Ok(samples)
    }

    fn append_pump_events(
        &mut self,
        events: Vec<pumphub_traits::PumpEvent>,
        _last_reconciliation: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError> {
        tracing::debug!(count = events.len(), "pump events archived");
        Ok(())
    }

    fn append_reservoir_reading(
        &mut self,
        units: f64,
        _at: DateTime<Utc>,
    ) -> Result<Option<f64>, EngineError> {
        let previous = self.reservoir.last().copied();
        self.reservoir.push(units);
        Ok(previous)
    }

    fn run_control_loop(&mut self, rounder: &dyn DoseRounder) {
        let now = self.clock.now();
        let Some(latest) = self.samples.last() else {
            tracing::info!("loop ran with no glucose data; no recommendation");
            self.last_loop = Some(now);
            return;
        };
        // Naive correction toward the override (or default) upper target.
        let target = self
            .settings
            .active_override(now)
            .map_or(GLUCOSE_BASELINE_MGDL, |o| o.target_high_mgdl);
        let excess = latest.mgdl - target;
        if excess > 0.0 && !matches!(self.basal_state, BasalDeliveryState::Suspended) {
            let correction = rounder.round_bolus_volume(excess / 50.0);
            tracing::info!(
                glucose = latest.mgdl,
                target,
                correction,
                "loop recommends correction"
            );
        } else {
            tracing::info!(glucose = latest.mgdl, target, "loop recommends no action");
        }
        self.last_loop = Some(now);
    }

    fn last_loop_completed(&self) -> Option<DateTime<Utc>> {
        self.last_loop
    }

    fn latest_glucose(&self) -> Option<GlucoseSample> {
        self.samples.last().cloned()
    }

    fn settings_mut(&mut self) -> &mut TherapySettings {
        &mut self.settings
    }

    fn set_basal_delivery_state(&mut self, state: BasalDeliveryState) {
        tracing::info!(?state, "basal delivery state updated");
        self.basal_state = state;
    }

    fn set_schedule_time_zone(&mut self, tz: FixedOffset) {
        tracing::info!(%tz, "schedule time zone updated");
    }
}

/// Sinks that surface everything through the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleSinks;

impl NotificationSink for ConsoleSinks {
    fn deliver(&self, notification: Notification) {
        tracing::warn!(id = %notification.id, "{}", notification.body);
    }

    fn clear(&self, id: &str) {
        tracing::info!(id, "notification cleared");
    }
}

impl AnalyticsSink for ConsoleSinks {
    fn record(&self, event: &str) {
        tracing::debug!(event, "analytics");
    }
}

impl AlarmSink for ConsoleSinks {
    fn sound(&self, alarm: pumphub_core::alarm::GlucoseAlarm) {
        tracing::error!(?alarm, "GLUCOSE ALARM");
    }
}

impl UploadSink for ConsoleSinks {
    fn upload_glucose(&self, samples: &[GlucoseSample]) {
        tracing::info!(count = samples.len(), "glucose uploaded");
    }
}
