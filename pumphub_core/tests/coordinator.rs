use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, Utc};

use pumphub_core::alarm::GlucoseAlarm;
use pumphub_core::coordinator::{Coordinator, CoordinatorCfg, Sinks};
use pumphub_core::engine::{DoseRounder, DosingEngine};
use pumphub_core::error::{CoordinatorError, EngineError};
use pumphub_core::executor::InlineExecutor;
use pumphub_core::mocks::NoopEngine;
use pumphub_core::notify::{AlarmSink, AnalyticsSink, Notification, NotificationSink, UploadSink, ids};
use pumphub_core::reconciler::{RemoteTargetEvent, SourceError, TempTargetSource};
use pumphub_core::settings::TherapySettings;
use pumphub_traits::clock::test_clock::TestClock;
use pumphub_traits::{
    BasalDeliveryState, Clock, DriverCompletion, FetchCompletion, GlucoseFetchResult,
    GlucoseMonitor, GlucoseSample, MonitorDelegate, Pump, PumpDelegate, PumpEvent, PumpEventKind,
    PumpStatusSnapshot,
};

// ── doubles ──────────────────────────────────────────────────────────────────

/// Glucose monitor that replays a scripted result per fetch, or parks the
/// completion for the test to fire later when `defer` is set.
#[derive(Default)]
struct MonitorShared {
    fetches: AtomicUsize,
    results: Mutex<VecDeque<GlucoseFetchResult>>,
    pending: Mutex<Vec<FetchCompletion>>,
    delegate_detached: AtomicBool,
}

impl MonitorShared {
    fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn complete_next(&self, result: GlucoseFetchResult) {
        let completion = self.pending.lock().unwrap().remove(0);
        completion(result);
    }
}

struct ScriptedMonitor {
    id: String,
    shared: Arc<MonitorShared>,
    provides_heartbeat: bool,
    uploads: bool,
    acts_as_pump: bool,
    defer: bool,
}

impl ScriptedMonitor {
    fn new(id: &str) -> (Self, Arc<MonitorShared>) {
        let shared = Arc::new(MonitorShared::default());
        (
            Self {
                id: id.into(),
                shared: shared.clone(),
                provides_heartbeat: false,
                uploads: false,
                acts_as_pump: false,
                defer: false,
            },
            shared,
        )
    }

    fn scripted(id: &str, results: Vec<GlucoseFetchResult>) -> (Self, Arc<MonitorShared>) {
        let (monitor, shared) = Self::new(id);
        *shared.results.lock().unwrap() = results.into();
        (monitor, shared)
    }
}

impl GlucoseMonitor for ScriptedMonitor {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn set_delegate(&mut self, delegate: Option<Arc<dyn MonitorDelegate>>) {
        if delegate.is_none() {
            self.shared.delegate_detached.store(true, Ordering::SeqCst);
        }
    }

    fn fetch_if_needed(&mut self, completion: FetchCompletion) {
        self.shared.fetches.fetch_add(1, Ordering::SeqCst);
        if self.defer {
            self.shared.pending.lock().unwrap().push(completion);
            return;
        }
        let next = self.shared.results.lock().unwrap().pop_front();
        completion(next.unwrap_or(GlucoseFetchResult::NoData));
    }

    fn provides_heartbeat(&self) -> bool {
        self.provides_heartbeat
    }

    fn uploads_readings(&self) -> bool {
        self.uploads
    }

    fn acts_as_pump(&self) -> bool {
        self.acts_as_pump
    }
}

/// Pump spy: records boluses and heartbeat-requirement pushes, completes
/// each bolus with the next scripted outcome (default Ok).
#[derive(Default)]
struct PumpShared {
    boluses: Mutex<Vec<(f64, DateTime<Utc>)>>,
    outcomes: Mutex<VecDeque<Result<(), String>>>,
    heartbeat_required: Mutex<Vec<bool>>,
    data_checks: AtomicUsize,
}

struct SpyPump {
    id: String,
    shared: Arc<PumpShared>,
    bolus_step: f64,
}

impl SpyPump {
    fn new(id: &str) -> (Self, Arc<PumpShared>) {
        let shared = Arc::new(PumpShared::default());
        (
            Self {
                id: id.into(),
                shared: shared.clone(),
                bolus_step: 0.0,
            },
            shared,
        )
    }
}

impl Pump for SpyPump {
    fn device_id(&self) -> &str {
        &self.id
    }

    fn set_delegate(&mut self, _delegate: Option<Arc<dyn PumpDelegate>>) {}

    fn status(&self) -> PumpStatusSnapshot {
        snapshot(Some(100.0), BasalDeliveryState::Active, 0)
    }

    fn enact_bolus(&mut self, units: f64, at: DateTime<Utc>, completion: DriverCompletion) {
        self.shared.boluses.lock().unwrap().push((units, at));
        let outcome = self
            .shared
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        completion(outcome.map_err(Into::into));
    }

    fn assert_current_data(&mut self) {
        self.shared.data_checks.fetch_add(1, Ordering::SeqCst);
    }

    fn set_must_provide_heartbeat(&mut self, required: bool) {
        self.shared.heartbeat_required.lock().unwrap().push(required);
    }

    fn round_bolus_volume(&self, units: f64) -> f64 {
        if self.bolus_step > 0.0 {
            (units / self.bolus_step).floor() * self.bolus_step
        } else {
            units
        }
    }
}

/// Engine recorder with shared state the test can inspect after the
/// coordinator takes ownership.
#[derive(Default)]
struct EngineShared {
    samples: Mutex<Vec<GlucoseSample>>,
    intents: Mutex<Vec<(f64, DateTime<Utc>)>>,
    confirms: Mutex<Vec<(f64, DateTime<Utc>)>>,
    failures: Mutex<Vec<String>>,
    events: Mutex<Vec<PumpEvent>>,
    reservoir: Mutex<Vec<f64>>,
    loops: AtomicUsize,
    last_loop: Mutex<Option<DateTime<Utc>>>,
    basal_states: Mutex<Vec<BasalDeliveryState>>,
    time_zones: Mutex<Vec<FixedOffset>>,
    fail_appends: AtomicBool,
    scheduled_scales: Mutex<Vec<f64>>,
}

struct RecordingEngine {
    shared: Arc<EngineShared>,
    settings: TherapySettings,
}

impl RecordingEngine {
    fn new() -> (Self, Arc<EngineShared>) {
        let shared = Arc::new(EngineShared::default());
        (
            Self {
                shared: shared.clone(),
                settings: TherapySettings::new(),
            },
            shared,
        )
    }
}

impl DosingEngine for RecordingEngine {
    fn record_intended_dose(&mut self, units: f64, at: DateTime<Utc>) {
        self.shared.intents.lock().unwrap().push((units, at));
    }

    fn confirm_dose(&mut self, units: f64, at: DateTime<Utc>) {
        self.shared.confirms.lock().unwrap().push((units, at));
    }

    fn report_dose_failure(&mut self, error: &CoordinatorError) {
        self.shared.failures.lock().unwrap().push(error.to_string());
    }

    fn append_glucose_samples(
        &mut self,
        samples: Vec<GlucoseSample>,
    ) -> Result<Vec<GlucoseSample>, EngineError> {
        if self.shared.fail_appends.load(Ordering::SeqCst) {
            return Err(EngineError::GlucoseStore("disk full".into()));
        }
        self.shared.samples.lock().unwrap().extend(samples.clone());
        Ok(samples)
    }

    fn append_pump_events(
        &mut self,
        events: Vec<PumpEvent>,
        _last_reconciliation: Option<DateTime<Utc>>,
    ) -> Result<(), EngineError> {
        if self.shared.fail_appends.load(Ordering::SeqCst) {
            return Err(EngineError::EventLedger("disk full".into()));
        }
        self.shared.events.lock().unwrap().extend(events);
        Ok(())
    }

    fn append_reservoir_reading(
        &mut self,
        units: f64,
        _at: DateTime<Utc>,
    ) -> Result<Option<f64>, EngineError> {
        let mut readings = self.shared.reservoir.lock().unwrap();
        let previous = readings.last().copied();
        readings.push(units);
        Ok(previous)
    }

    fn run_control_loop(&mut self, _rounder: &dyn DoseRounder) {
        self.shared.loops.fetch_add(1, Ordering::SeqCst);
        let now = Utc::now();
        if let Some(active) = self.settings.active_override(now) {
            self.shared
                .scheduled_scales
                .lock()
                .unwrap()
                .push(active.insulin_needs_scale);
        }
    }

    fn last_loop_completed(&self) -> Option<DateTime<Utc>> {
        *self.shared.last_loop.lock().unwrap()
    }

    fn latest_glucose(&self) -> Option<GlucoseSample> {
        self.shared.samples.lock().unwrap().last().cloned()
    }

    fn settings_mut(&mut self) -> &mut TherapySettings {
        &mut self.settings
    }

    fn set_basal_delivery_state(&mut self, state: BasalDeliveryState) {
        self.shared.basal_states.lock().unwrap().push(state);
    }

    fn set_schedule_time_zone(&mut self, tz: FixedOffset) {
        self.shared.time_zones.lock().unwrap().push(tz);
    }
}

/// One recorder implementing every sink trait.
#[derive(Default)]
struct SinkState {
    delivered: Mutex<Vec<Notification>>,
    cleared: Mutex<Vec<String>>,
    analytics: Mutex<Vec<String>>,
    alarms: Mutex<Vec<GlucoseAlarm>>,
    uploaded: Mutex<Vec<usize>>,
}

#[derive(Default, Clone)]
struct Recorder(Arc<SinkState>);

impl NotificationSink for Recorder {
    fn deliver(&self, notification: Notification) {
        self.0.delivered.lock().unwrap().push(notification);
    }

    fn clear(&self, id: &str) {
        self.0.cleared.lock().unwrap().push(id.into());
    }
}

impl AnalyticsSink for Recorder {
    fn record(&self, event: &str) {
        self.0.analytics.lock().unwrap().push(event.into());
    }
}

impl AlarmSink for Recorder {
    fn sound(&self, alarm: GlucoseAlarm) {
        self.0.alarms.lock().unwrap().push(alarm);
    }
}

impl UploadSink for Recorder {
    fn upload_glucose(&self, samples: &[GlucoseSample]) {
        self.0.uploaded.lock().unwrap().push(samples.len());
    }
}

struct StaticTargetSource {
    events: Vec<RemoteTargetEvent>,
    fail: bool,
}

impl TempTargetSource for StaticTargetSource {
    fn fetch_recent(&self) -> Result<Vec<RemoteTargetEvent>, SourceError> {
        if self.fail {
            return Err("503 service unavailable".into());
        }
        Ok(self.events.clone())
    }
}

// ── harness ──────────────────────────────────────────────────────────────────

fn snapshot(battery: Option<f64>, basal: BasalDeliveryState, tz_secs: i32) -> PumpStatusSnapshot {
    PumpStatusSnapshot {
        battery_percent: battery,
        basal_state: basal,
        time_zone: FixedOffset::east_opt(tz_secs).unwrap(),
    }
}

struct Harness {
    coordinator: Coordinator,
    engine: Arc<EngineShared>,
    sinks: Recorder,
    clock: TestClock,
}

fn harness_with(source: Option<Arc<dyn TempTargetSource>>) -> Harness {
    let clock = TestClock::at(Utc::now());
    let (engine, shared) = RecordingEngine::new();
    let sinks = Recorder::default();
    let mut builder = Coordinator::builder()
        .with_engine(engine)
        .with_clock(Arc::new(clock.clone()))
        .with_cfg(CoordinatorCfg::default())
        .with_sinks(Sinks {
            notifications: Arc::new(sinks.clone()),
            analytics: Arc::new(sinks.clone()),
            alarm: Arc::new(sinks.clone()),
            upload: Arc::new(sinks.clone()),
        })
        .with_worker(Arc::new(InlineExecutor::new()))
        .with_background(Arc::new(InlineExecutor::new()));
    if let Some(source) = source {
        builder = builder.with_target_source(source);
    }
    Harness {
        coordinator: builder.build().unwrap(),
        engine: shared,
        sinks,
        clock,
    }
}

fn harness() -> Harness {
    harness_with(None)
}

fn new_data(samples: &[(i64, f64)], now: DateTime<Utc>) -> GlucoseFetchResult {
    GlucoseFetchResult::NewData(
        samples
            .iter()
            .map(|(age_min, mgdl)| GlucoseSample::new(now - Duration::minutes(*age_min), *mgdl))
            .collect(),
    )
}

// ── bolus paths ──────────────────────────────────────────────────────────────

#[test]
fn bolus_records_intent_then_confirms() {
    let h = harness();
    let (pump, pump_shared) = SpyPump::new("omni-1");
    h.coordinator.set_pump(Some(Box::new(pump)));

    let at = h.clock.now();
    let outcome = Arc::new(Mutex::new(None));
    let o = outcome.clone();
    h.coordinator
        .request_bolus(1.5, at, Box::new(move |r| *o.lock().unwrap() = Some(r)));

    assert_eq!(*pump_shared.boluses.lock().unwrap(), vec![(1.5, at)]);
    assert_eq!(*h.engine.intents.lock().unwrap(), vec![(1.5, at)]);
    assert_eq!(*h.engine.confirms.lock().unwrap(), vec![(1.5, at)]);
    assert!(h.engine.failures.lock().unwrap().is_empty());
    assert!(matches!(*outcome.lock().unwrap(), Some(Ok(()))));
}

#[test]
fn failed_bolus_rolls_back_and_notifies() {
    let h = harness();
    let (pump, pump_shared) = SpyPump::new("omni-1");
    pump_shared
        .outcomes
        .lock()
        .unwrap()
        .push_back(Err("occlusion detected".into()));
    h.coordinator.set_pump(Some(Box::new(pump)));

    let outcome = Arc::new(Mutex::new(None));
    let o = outcome.clone();
    h.coordinator
        .request_bolus(2.0, h.clock.now(), Box::new(move |r| *o.lock().unwrap() = Some(r)));

    assert_eq!(h.engine.intents.lock().unwrap().len(), 1);
    assert!(h.engine.confirms.lock().unwrap().is_empty());
    assert_eq!(h.engine.failures.lock().unwrap().len(), 1);
    let delivered = h.sinks.0.delivered.lock().unwrap();
    assert!(delivered.iter().any(|n| n.id == ids::BOLUS_FAILURE));
    assert!(matches!(
        *outcome.lock().unwrap(),
        Some(Err(CoordinatorError::Bolus(_)))
    ));
    assert!(h.coordinator.last_error().is_some());
}

#[test]
fn bolus_without_pump_fails_immediately() {
    let h = harness();
    let outcome = Arc::new(Mutex::new(None));
    let o = outcome.clone();
    h.coordinator
        .request_bolus(1.0, h.clock.now(), Box::new(move |r| *o.lock().unwrap() = Some(r)));

    assert!(matches!(
        *outcome.lock().unwrap(),
        Some(Err(CoordinatorError::NoActivePump))
    ));
    assert!(h.engine.intents.lock().unwrap().is_empty());
}

// ── heartbeat and fetch ──────────────────────────────────────────────────────

#[test]
fn heartbeat_fetches_and_appends_glucose() {
    let h = harness();
    let now = h.clock.now();
    let (monitor, shared) = ScriptedMonitor::scripted("dex-1", vec![new_data(&[(1, 110.0)], now)]);
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    h.coordinator.monitor_delegate().monitor_heartbeat();

    assert_eq!(shared.fetch_count(), 1);
    assert_eq!(h.engine.samples.lock().unwrap().len(), 1);
}

#[test]
fn second_heartbeat_inside_interval_is_throttled() {
    let h = harness();
    let (monitor, shared) = ScriptedMonitor::new("dex-1");
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    let delegate = h.coordinator.monitor_delegate();

    delegate.monitor_heartbeat();
    delegate.monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 1);

    // Loop has never completed, so the floor is five minutes.
    h.clock.advance(std::time::Duration::from_secs(5 * 60));
    delegate.monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 2);
}

#[test]
fn stale_loop_with_elapsed_drive_interval_fetches_again() {
    let h = harness();
    let (mut monitor, shared) = ScriptedMonitor::new("dex-1");
    monitor.defer = true;
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    let delegate = h.coordinator.monitor_delegate();

    delegate.monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 1);

    // Loop last succeeded 12 minutes ago (5-minute floor applies) and the
    // last driven update was 6 minutes ago, so the heartbeat gets through.
    h.clock.advance(std::time::Duration::from_secs(6 * 60));
    *h.engine.last_loop.lock().unwrap() = Some(h.clock.now() - Duration::minutes(12));
    delegate.monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 2);

    // The drive timestamp advanced before either fetch resolved; a third
    // heartbeat in the same instant is throttled.
    delegate.monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 2);
}

#[test]
fn heartbeat_is_suppressed_after_a_fresh_loop() {
    let h = harness();
    let (monitor, shared) = ScriptedMonitor::new("dex-1");
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    *h.engine.last_loop.lock().unwrap() = Some(h.clock.now() - Duration::minutes(2));

    h.coordinator.monitor_delegate().monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 0);
}

#[test]
fn fetched_samples_upload_when_monitor_opts_in() {
    let h = harness();
    let now = h.clock.now();
    let (mut monitor, _shared) =
        ScriptedMonitor::scripted("dex-1", vec![new_data(&[(2, 105.0), (1, 108.0)], now)]);
    monitor.uploads = true;
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    h.coordinator.monitor_delegate().monitor_heartbeat();
    assert_eq!(*h.sinks.0.uploaded.lock().unwrap(), vec![2]);
}

#[test]
fn fetch_result_from_replaced_monitor_is_dropped() {
    let h = harness();
    let (mut monitor, shared) = ScriptedMonitor::new("dex-1");
    monitor.defer = true;
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    h.coordinator.monitor_delegate().monitor_heartbeat();

    let (replacement, _) = ScriptedMonitor::new("dex-2");
    h.coordinator.set_glucose_monitor(Some(Box::new(replacement)));

    shared.complete_next(new_data(&[(1, 95.0)], h.clock.now()));
    assert!(h.engine.samples.lock().unwrap().is_empty());
}

#[test]
fn fetch_error_records_last_error() {
    let h = harness();
    let (monitor, _) =
        ScriptedMonitor::scripted("dex-1", vec![GlucoseFetchResult::Error("sensor warmup".into())]);
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    h.coordinator.monitor_delegate().monitor_heartbeat();
    let (_, message) = h.coordinator.last_error().unwrap();
    assert!(message.contains("sensor warmup"));
}

#[test]
fn direct_monitor_result_bypasses_throttle() {
    let h = harness();
    let (monitor, _) = ScriptedMonitor::new("dex-1");
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    let delegate = h.coordinator.monitor_delegate();

    let now = h.clock.now();
    delegate.monitor_result(new_data(&[(1, 130.0)], now));
    delegate.monitor_result(new_data(&[(0, 131.0)], now));
    assert_eq!(h.engine.samples.lock().unwrap().len(), 2);
}

// ── alarms ───────────────────────────────────────────────────────────────────

#[test]
fn stale_fetch_sounds_alarm_once_per_snooze() {
    let h = harness();
    let (monitor, _) = ScriptedMonitor::new("dex-1");
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    let delegate = h.coordinator.monitor_delegate();

    // No data at all counts as stale.
    delegate.monitor_heartbeat();
    assert_eq!(*h.sinks.0.alarms.lock().unwrap(), vec![GlucoseAlarm::StaleData]);

    // Still inside the snooze window five minutes later.
    h.clock.advance(std::time::Duration::from_secs(5 * 60));
    delegate.monitor_heartbeat();
    assert_eq!(h.sinks.0.alarms.lock().unwrap().len(), 1);
}

#[test]
fn low_glucose_sounds_low_alarm() {
    let h = harness();
    let now = h.clock.now();
    let (monitor, _) = ScriptedMonitor::scripted("dex-1", vec![new_data(&[(1, 52.0)], now)]);
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    h.coordinator.monitor_delegate().monitor_heartbeat();
    assert_eq!(
        *h.sinks.0.alarms.lock().unwrap(),
        vec![GlucoseAlarm::LowGlucose]
    );
}

// ── pump status ──────────────────────────────────────────────────────────────

#[test]
fn basal_state_change_reaches_engine() {
    let h = harness();
    let delegate = h.coordinator.pump_delegate();
    delegate.pump_status_changed(
        snapshot(Some(80.0), BasalDeliveryState::Suspended, 0),
        snapshot(Some(80.0), BasalDeliveryState::Active, 0),
    );
    assert_eq!(
        *h.engine.basal_states.lock().unwrap(),
        vec![BasalDeliveryState::Suspended]
    );
}

#[test]
fn battery_depletion_notifies() {
    let h = harness();
    h.coordinator.pump_delegate().pump_status_changed(
        snapshot(Some(0.0), BasalDeliveryState::Active, 0),
        snapshot(Some(8.0), BasalDeliveryState::Active, 0),
    );
    let delivered = h.sinks.0.delivered.lock().unwrap();
    assert!(delivered.iter().any(|n| n.id == ids::PUMP_BATTERY_LOW));
}

#[test]
fn battery_replacement_clears_and_records() {
    let h = harness();
    h.coordinator.pump_delegate().pump_status_changed(
        snapshot(Some(95.0), BasalDeliveryState::Active, 0),
        snapshot(Some(4.0), BasalDeliveryState::Active, 0),
    );
    assert_eq!(
        *h.sinks.0.cleared.lock().unwrap(),
        vec![ids::PUMP_BATTERY_LOW.to_string()]
    );
    assert_eq!(
        *h.sinks.0.analytics.lock().unwrap(),
        vec!["pump-battery-replaced".to_string()]
    );
}

#[test]
fn time_zone_change_propagates_to_engine() {
    let h = harness();
    h.coordinator.pump_delegate().pump_status_changed(
        snapshot(Some(80.0), BasalDeliveryState::Active, 3600),
        snapshot(Some(80.0), BasalDeliveryState::Active, 0),
    );
    assert_eq!(
        *h.engine.time_zones.lock().unwrap(),
        vec![FixedOffset::east_opt(3600).unwrap()]
    );
}

// ── pump events and reservoir ────────────────────────────────────────────────

#[test]
fn pump_events_append_and_signal_analytics() {
    let h = harness();
    let done = Arc::new(AtomicUsize::new(0));
    let d = done.clone();
    let events = vec![PumpEvent {
        at: h.clock.now(),
        kind: PumpEventKind::Bolus { units: 0.5 },
    }];
    h.coordinator.pump_delegate().pump_events(
        events,
        Some(h.clock.now()),
        Box::new(move |r| {
            assert!(r.is_ok());
            d.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(h.engine.events.lock().unwrap().len(), 1);
    assert!(
        h.sinks
            .0
            .analytics
            .lock()
            .unwrap()
            .contains(&"pump-events-added".to_string())
    );
}

#[test]
fn pump_event_append_failure_reaches_driver_completion() {
    let h = harness();
    h.engine.fail_appends.store(true, Ordering::SeqCst);
    let failed = Arc::new(AtomicBool::new(false));
    let f = failed.clone();
    h.coordinator.pump_delegate().pump_events(
        Vec::new(),
        None,
        Box::new(move |r| f.store(r.is_err(), Ordering::SeqCst)),
    );
    assert!(failed.load(Ordering::SeqCst));
    assert!(h.coordinator.last_error().is_some());
}

#[test]
fn reservoir_crossing_delivers_low_warning() {
    let h = harness();
    let delegate = h.coordinator.pump_delegate();
    delegate.pump_reservoir_reading(25.0, h.clock.now(), Box::new(|r| assert!(r.is_ok())));
    delegate.pump_reservoir_reading(18.0, h.clock.now(), Box::new(|r| assert!(r.is_ok())));

    let delivered = h.sinks.0.delivered.lock().unwrap();
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].id, ids::reservoir_low(20.0));
}

#[test]
fn empty_reservoir_notifies_and_replacement_clears() {
    let h = harness();
    let delegate = h.coordinator.pump_delegate();
    delegate.pump_reservoir_reading(3.0, h.clock.now(), Box::new(|_| {}));
    delegate.pump_reservoir_reading(0.0, h.clock.now(), Box::new(|_| {}));
    {
        let delivered = h.sinks.0.delivered.lock().unwrap();
        assert!(delivered.iter().any(|n| n.id == ids::RESERVOIR_EMPTY));
    }

    delegate.pump_reservoir_reading(200.0, h.clock.now(), Box::new(|_| {}));
    let cleared = h.sinks.0.cleared.lock().unwrap();
    assert!(cleared.contains(&ids::RESERVOIR_EMPTY.to_string()));
    assert!(cleared.contains(&ids::reservoir_low(10.0)));
    assert!(
        h.sinks
            .0
            .analytics
            .lock()
            .unwrap()
            .contains(&"reservoir-replaced".to_string())
    );
}

// ── loop recommendation and reconciliation ───────────────────────────────────

#[test]
fn loop_recommendation_without_source_runs_engine() {
    let h = harness();
    h.coordinator.pump_delegate().pump_recommends_loop();
    assert_eq!(h.engine.loops.load(Ordering::SeqCst), 1);
}

#[test]
fn loop_recommendation_applies_remote_target_first() {
    let now = Utc::now();
    let source = Arc::new(StaticTargetSource {
        events: vec![RemoteTargetEvent {
            created_at: now - Duration::minutes(1),
            duration_minutes: 60,
            target_low_mgdl: Some(140.0),
            target_high_mgdl: Some(160.0),
            note: Some("120".into()),
        }],
        fail: false,
    });
    let h = harness_with(Some(source));

    h.coordinator.pump_delegate().pump_recommends_loop();
    assert_eq!(h.engine.loops.load(Ordering::SeqCst), 1);
    // The loop observed the freshly activated override.
    assert_eq!(*h.engine.scheduled_scales.lock().unwrap(), vec![1.2]);
}

#[test]
fn remote_fetch_failure_still_runs_the_loop() {
    let source = Arc::new(StaticTargetSource {
        events: Vec::new(),
        fail: true,
    });
    let h = harness_with(Some(source));
    h.coordinator.pump_delegate().pump_recommends_loop();
    assert_eq!(h.engine.loops.load(Ordering::SeqCst), 1);
}

// ── slots and heartbeat requirement ──────────────────────────────────────────

#[test]
fn pump_must_heartbeat_unless_monitor_provides_one() {
    let h = harness();
    let (pump, pump_shared) = SpyPump::new("omni-1");
    h.coordinator.set_pump(Some(Box::new(pump)));
    assert_eq!(*pump_shared.heartbeat_required.lock().unwrap(), vec![true]);

    let (mut monitor, _) = ScriptedMonitor::new("dex-1");
    monitor.provides_heartbeat = true;
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));
    assert_eq!(
        *pump_shared.heartbeat_required.lock().unwrap(),
        vec![true, false]
    );

    h.coordinator.set_glucose_monitor(None);
    assert_eq!(
        *pump_shared.heartbeat_required.lock().unwrap(),
        vec![true, false, true]
    );
}

#[test]
fn installing_a_pump_evicts_a_combination_monitor() {
    let h = harness();
    let (mut monitor, shared) = ScriptedMonitor::new("combo-1");
    monitor.acts_as_pump = true;
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    let (pump, _) = SpyPump::new("omni-1");
    h.coordinator.set_pump(Some(Box::new(pump)));
    assert!(shared.delegate_detached.load(Ordering::SeqCst));

    // The evicted monitor no longer receives fetches.
    h.coordinator.monitor_delegate().monitor_heartbeat();
    assert_eq!(shared.fetch_count(), 0);
}

#[test]
fn every_fetch_asks_pump_to_verify_its_data() {
    let h = harness();
    let (pump, pump_shared) = SpyPump::new("omni-1");
    h.coordinator.set_pump(Some(Box::new(pump)));
    let now = Utc::now();
    let (monitor, _) = ScriptedMonitor::scripted("dex-1", vec![new_data(&[(1, 120.0)], now)]);
    h.coordinator.set_glucose_monitor(Some(Box::new(monitor)));

    h.coordinator.monitor_delegate().monitor_heartbeat();
    assert_eq!(pump_shared.data_checks.load(Ordering::SeqCst), 1);
}

#[test]
fn rounding_goes_through_the_active_pump() {
    let h = harness();
    assert!((h.coordinator.round_bolus_volume(1.37) - 1.37).abs() < 1e-9);

    let (mut pump, _) = SpyPump::new("omni-1");
    pump.bolus_step = 0.05;
    h.coordinator.set_pump(Some(Box::new(pump)));
    assert!((h.coordinator.round_bolus_volume(1.37) - 1.35).abs() < 1e-9);
}

// ── builder validation ───────────────────────────────────────────────────────

#[test]
fn builder_requires_an_engine() {
    let err = Coordinator::builder().build().unwrap_err();
    assert!(err.to_string().contains("missing dosing engine"));
}

#[test]
fn builder_rejects_unordered_warning_levels() {
    let mut cfg = CoordinatorCfg::default();
    cfg.reservoir.warning_levels = vec![30.0, 10.0];
    let err = Coordinator::builder()
        .with_engine(NoopEngine::default())
        .with_cfg(cfg)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("ascending"));
}

#[test]
fn builder_rejects_an_empty_clamp_band() {
    let mut cfg = CoordinatorCfg::default();
    cfg.reconcile.clamp_low_mgdl = 400.0;
    cfg.reconcile.clamp_high_mgdl = 50.0;
    let err = Coordinator::builder()
        .with_engine(NoopEngine::default())
        .with_cfg(cfg)
        .build()
        .unwrap_err();
    assert!(err.to_string().contains("clamp band"));
}
