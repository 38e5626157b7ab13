//! The device event coordinator.
//!
//! Owns the two device slots (glucose monitor, pump), serializes every
//! device callback onto one worker queue, and is the single entry point the
//! dosing engine calls back into for rounding. Slot replacement happens on
//! the coordinating (caller) context; everything else runs on the worker.
//! Both contracts are asserted, and a violation is a programming error.
//!
//! The inner state sits behind a mutex for soundness, but the lock is never
//! contended in practice: worker jobs take it one at a time, and the
//! coordinating context only takes it inside the slot setters and read
//! accessors, which the worker-queue discipline keeps disjoint.

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use chrono::{DateTime, Utc};

use crate::alarm::{AlarmCfg, AlarmEvaluator};
use crate::engine::{DoseRounder, DosingEngine};
use crate::error::{BuildError, CoordinatorError, Result};
use crate::executor::{Executor, SerialExecutor, SpawnExecutor};
use crate::notify::{AlarmSink, AnalyticsSink, Notification, NotificationSink, NullSink, UploadSink, ids};
use crate::reconciler::{ReconcileCfg, TempTargetSource, reconcile};
use crate::reservoir::{ReservoirCfg, ReservoirObservation, assess, first_crossed_threshold};
use crate::throttle::{LoopPollInterval, required_interval};
use pumphub_traits::{
    Clock, DriverCompletion, DriverError, GlucoseFetchResult, GlucoseMonitor, MonitorDelegate,
    Pump, PumpDelegate, PumpEvent, PumpStatusSnapshot, SystemClock,
};

/// Battery threshold list: the only boundary is total depletion.
const BATTERY_THRESHOLDS: [f64; 1] = [0.0];

/// Completion for a coordinator-level bolus request; fires exactly once.
pub type BolusCompletion = Box<dyn FnOnce(std::result::Result<(), CoordinatorError>) + Send>;

/// Injected side-effect sinks. Explicit dependencies, never ambient
/// globals, so tests can substitute recorders.
pub struct Sinks {
    pub notifications: Arc<dyn NotificationSink>,
    pub analytics: Arc<dyn AnalyticsSink>,
    pub alarm: Arc<dyn AlarmSink>,
    pub upload: Arc<dyn UploadSink>,
}

impl Default for Sinks {
    fn default() -> Self {
        Self {
            notifications: Arc::new(NullSink),
            analytics: Arc::new(NullSink),
            alarm: Arc::new(NullSink),
            upload: Arc::new(NullSink),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CoordinatorCfg {
    pub alarm: AlarmCfg,
    pub reservoir: ReservoirCfg,
    pub battery: BatteryCfg,
    pub reconcile: ReconcileCfg,
}

#[derive(Debug, Clone)]
pub struct BatteryCfg {
    /// A battery-percent rise of at least this much reads as a battery
    /// replacement.
    pub replacement_rise_percent: f64,
}

impl Default for BatteryCfg {
    fn default() -> Self {
        Self {
            replacement_rise_percent: 50.0,
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    match inner.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub(crate) struct Inner {
    pub(crate) cgm: Option<Box<dyn GlucoseMonitor>>,
    pub(crate) pump: Option<Box<dyn Pump>>,
    pub(crate) engine: Box<dyn DosingEngine>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) cfg: CoordinatorCfg,
    pub(crate) sinks: Sinks,
    pub(crate) target_source: Option<Arc<dyn TempTargetSource>>,
    /// Advanced before a heartbeat-driven fetch is issued so a second
    /// heartbeat cannot start a duplicate concurrent poll.
    pub(crate) last_driven_update: Option<DateTime<Utc>>,
    pub(crate) last_error: Option<(DateTime<Utc>, String)>,
    pub(crate) alarm: AlarmEvaluator,
    pub(crate) worker: Arc<dyn Executor>,
    pub(crate) background: Arc<dyn Executor>,
}

impl Inner {
    pub(crate) fn record_error(&mut self, message: &str) {
        tracing::error!(message, "device error recorded");
        self.last_error = Some((self.clock.now(), message.to_owned()));
    }

    /// The pump must tick its own heartbeat unless the active monitor
    /// declares it supplies a reliable one.
    pub(crate) fn refresh_heartbeat_requirement(&mut self) {
        let required = !self.cgm.as_ref().is_some_and(|m| m.provides_heartbeat());
        if let Some(pump) = self.pump.as_mut() {
            pump.set_must_provide_heartbeat(required);
        }
    }

    fn handle_heartbeat(&mut self, handle: &CoordinatorHandle) {
        self.worker.assert_current();
        let now = self.clock.now();
        let elapsed = self.engine.last_loop_completed().map(|t| now - t);
        let min_interval = match required_interval(elapsed) {
            LoopPollInterval::Suppress => {
                tracing::trace!("heartbeat suppressed: loop completed recently");
                return;
            }
            LoopPollInterval::Every(d) => d,
        };
        if let Some(last) = self.last_driven_update
            && now - last < min_interval
        {
            tracing::trace!("heartbeat throttled: polled too recently");
            return;
        }
        // Advance before the fetch resolves to block duplicate polls.
        self.last_driven_update = Some(now);
        let Some(monitor) = self.cgm.as_mut() else {
            tracing::trace!("heartbeat with no glucose monitor installed");
            return;
        };
        let device = monitor.device_id().to_owned();
        let h = handle.clone();
        monitor.fetch_if_needed(Box::new(move |result| {
            h.with_inner(move |inner, handle| {
                let current = inner.cgm.as_ref().map(|m| m.device_id().to_owned());
                if current.as_deref() != Some(device.as_str()) {
                    tracing::debug!(device, "dropping fetch result from replaced monitor");
                    return;
                }
                inner.process_cgm_result(result);
                inner.evaluate_alarm(handle);
            });
        }));
    }

    fn handle_monitor_result(&mut self, result: GlucoseFetchResult) {
        self.worker.assert_current();
        self.process_cgm_result(result);
    }

    pub(crate) fn evaluate_alarm(&mut self, _handle: &CoordinatorHandle) {
        let now = self.clock.now();
        let latest = self.engine.latest_glucose();
        if let Some(alarm) = self.alarm.evaluate(latest.as_ref(), now) {
            tracing::warn!(?alarm, "raising glucose alarm");
            // The alarm action blocks; keep it off the worker.
            let sink = Arc::clone(&self.sinks.alarm);
            self.background.post(Box::new(move || sink.sound(alarm)));
        }
    }

    fn request_bolus(
        &mut self,
        units: f64,
        at: DateTime<Utc>,
        completion: BolusCompletion,
        handle: &CoordinatorHandle,
    ) {
        self.worker.assert_current();
        let Some(pump) = self.pump.as_mut() else {
            tracing::warn!(units, "bolus requested with no active pump");
            completion(Err(CoordinatorError::NoActivePump));
            return;
        };
        self.engine.record_intended_dose(units, at);
        let h = handle.clone();
        pump.enact_bolus(
            units,
            at,
            Box::new(move |outcome| {
                h.with_inner(move |inner, _| match outcome {
                    Ok(()) => {
                        inner.engine.confirm_dose(units, at);
                        tracing::info!(units, "bolus confirmed");
                        completion(Ok(()));
                    }
                    Err(e) => {
                        let err = CoordinatorError::Bolus(e.to_string());
                        inner.engine.report_dose_failure(&err);
                        inner.record_error(&err.to_string());
                        inner.sinks.notifications.deliver(Notification::new(
                            ids::BOLUS_FAILURE,
                            format!("Bolus of {units} U was not delivered"),
                        ));
                        completion(Err(err));
                    }
                });
            }),
        );
    }

    fn handle_pump_status(&mut self, new: PumpStatusSnapshot, old: PumpStatusSnapshot) {
        self.worker.assert_current();
        if new.basal_state != old.basal_state {
            self.engine.set_basal_delivery_state(new.basal_state.clone());
        }
        if let (Some(prev), Some(cur)) = (old.battery_percent, new.battery_percent) {
            if first_crossed_threshold(prev, cur, &BATTERY_THRESHOLDS).is_some() {
                self.sinks.notifications.deliver(Notification::new(
                    ids::PUMP_BATTERY_LOW,
                    "Pump battery depleted",
                ));
            } else if cur - prev >= self.cfg.battery.replacement_rise_percent {
                self.sinks.notifications.clear(ids::PUMP_BATTERY_LOW);
                self.sinks.analytics.record("pump-battery-replaced");
            }
        }
        if new.time_zone != old.time_zone {
            self.engine.set_schedule_time_zone(new.time_zone);
        }
    }

    fn handle_pump_events(
        &mut self,
        events: Vec<PumpEvent>,
        last_reconciliation: Option<DateTime<Utc>>,
        completion: DriverCompletion,
    ) {
        self.worker.assert_current();
        match self.engine.append_pump_events(events, last_reconciliation) {
            Ok(()) => {
                self.sinks.analytics.record("pump-events-added");
                completion(Ok(()));
            }
            Err(e) => {
                tracing::error!(error = %e, "pump event append failed");
                self.record_error(&e.to_string());
                completion(Err(Box::new(e) as DriverError));
            }
        }
    }

    fn handle_reservoir_reading(
        &mut self,
        units: f64,
        at: DateTime<Utc>,
        completion: DriverCompletion,
    ) {
        self.worker.assert_current();
        match self.engine.append_reservoir_reading(units, at) {
            Ok(previous) => {
                self.observe_reservoir(previous, units);
                completion(Ok(()));
            }
            Err(e) => {
                tracing::error!(error = %e, "reservoir append failed");
                self.record_error(&e.to_string());
                completion(Err(Box::new(e) as DriverError));
            }
        }
    }

    fn observe_reservoir(&mut self, previous: Option<f64>, new: f64) {
        match assess(previous, new, &self.cfg.reservoir) {
            ReservoirObservation::Empty => {
                self.sinks.notifications.deliver(Notification::new(
                    ids::RESERVOIR_EMPTY,
                    "Insulin reservoir is empty",
                ));
            }
            ReservoirObservation::Replaced => {
                self.sinks.notifications.clear(ids::RESERVOIR_EMPTY);
                for level in self.cfg.reservoir.warning_levels.clone() {
                    self.sinks.notifications.clear(&ids::reservoir_low(level));
                }
                self.sinks.analytics.record("reservoir-replaced");
            }
            ReservoirObservation::Low(level) => {
                self.sinks.notifications.deliver(Notification::new(
                    ids::reservoir_low(level),
                    format!("Insulin reservoir below {level} U"),
                ));
            }
            ReservoirObservation::Unremarkable => {}
        }
    }

    fn pump_recommends_loop(&mut self, handle: &CoordinatorHandle) {
        self.worker.assert_current();
        let Some(source) = self.target_source.clone() else {
            self.run_control_loop();
            return;
        };
        let h = handle.clone();
        // The fetch blocks on the network; run it on the background context
        // and re-enter the worker with the decoded events.
        self.background.post(Box::new(move || {
            let fetched = source.fetch_recent();
            h.with_inner(move |inner, _| {
                let now = inner.clock.now();
                match fetched {
                    Ok(events) => {
                        let outcome = reconcile(
                            inner.engine.settings_mut(),
                            &events,
                            now,
                            &inner.cfg.reconcile,
                        );
                        tracing::debug!(?outcome, "remote target reconciled");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "remote target fetch failed; continuing");
                    }
                }
                inner.run_control_loop();
            });
        }));
    }

    pub(crate) fn run_control_loop(&mut self) {
        let Inner { engine, pump, .. } = self;
        let rounder = PumpRounder {
            pump: pump.as_deref(),
        };
        engine.run_control_loop(&rounder);
    }
}

/// Rounding backed by the active pump, identity when none is set.
struct PumpRounder<'a> {
    pump: Option<&'a dyn Pump>,
}

impl DoseRounder for PumpRounder<'_> {
    fn round_basal_rate(&self, units_per_hour: f64) -> f64 {
        self.pump
            .map_or(units_per_hour, |p| p.round_basal_rate(units_per_hour))
    }

    fn round_bolus_volume(&self, units: f64) -> f64 {
        self.pump.map_or(units, |p| p.round_bolus_volume(units))
    }
}

/// Cloneable handle the coordinator hands to drivers as their delegate.
/// Every delegate callback hops onto the serial worker before touching
/// coordinator state.
#[derive(Clone)]
pub struct CoordinatorHandle {
    inner: Weak<Mutex<Inner>>,
    worker: Arc<dyn Executor>,
}

impl CoordinatorHandle {
    fn with_inner<F>(&self, f: F)
    where
        F: FnOnce(&mut Inner, &CoordinatorHandle) + Send + 'static,
    {
        let weak = self.inner.clone();
        let handle = self.clone();
        self.worker.post(Box::new(move || {
            let Some(strong) = weak.upgrade() else {
                tracing::debug!("coordinator gone; dropping queued callback");
                return;
            };
            let mut guard = lock(&strong);
            f(&mut guard, &handle);
        }));
    }
}

impl MonitorDelegate for CoordinatorHandle {
    fn monitor_heartbeat(&self) {
        self.with_inner(|inner, handle| inner.handle_heartbeat(handle));
    }

    fn monitor_result(&self, result: GlucoseFetchResult) {
        self.with_inner(move |inner, _| inner.handle_monitor_result(result));
    }
}

impl PumpDelegate for CoordinatorHandle {
    fn pump_status_changed(&self, new: PumpStatusSnapshot, old: PumpStatusSnapshot) {
        self.with_inner(move |inner, _| inner.handle_pump_status(new, old));
    }

    fn pump_events(
        &self,
        events: Vec<PumpEvent>,
        last_reconciliation: Option<DateTime<Utc>>,
        completion: DriverCompletion,
    ) {
        self.with_inner(move |inner, _| {
            inner.handle_pump_events(events, last_reconciliation, completion);
        });
    }

    fn pump_reservoir_reading(&self, units: f64, at: DateTime<Utc>, completion: DriverCompletion) {
        self.with_inner(move |inner, _| inner.handle_reservoir_reading(units, at, completion));
    }

    fn pump_recommends_loop(&self) {
        self.with_inner(|inner, handle| inner.pump_recommends_loop(handle));
    }
}

pub struct Coordinator {
    inner: Arc<Mutex<Inner>>,
    handle: Arc<CoordinatorHandle>,
    worker: Arc<dyn Executor>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator").finish_non_exhaustive()
    }
}

impl Coordinator {
    pub fn builder() -> CoordinatorBuilder {
        CoordinatorBuilder::default()
    }

    /// Replace the glucose-monitor slot. Coordinating context only.
    pub fn set_glucose_monitor(&self, monitor: Option<Box<dyn GlucoseMonitor>>) {
        self.worker.assert_not_current();
        let mut inner = lock(&self.inner);
        if let Some(mut old) = inner.cgm.take() {
            old.set_delegate(None);
        }
        match monitor {
            Some(mut monitor) => {
                monitor.set_delegate(Some(self.monitor_delegate()));
                tracing::info!(device = monitor.device_id(), "glucose monitor installed");
                inner.cgm = Some(monitor);
            }
            None => tracing::info!("glucose monitor slot cleared"),
        }
        inner.refresh_heartbeat_requirement();
    }

    /// Replace the pump slot. Coordinating context only. A combination
    /// device cannot occupy both roles, so installing a pump while such a
    /// monitor holds the CGM slot clears that slot first.
    pub fn set_pump(&self, pump: Option<Box<dyn Pump>>) {
        self.worker.assert_not_current();
        let mut inner = lock(&self.inner);
        if pump.is_some()
            && inner.cgm.as_ref().is_some_and(|m| m.acts_as_pump())
            && let Some(mut old) = inner.cgm.take()
        {
            old.set_delegate(None);
            tracing::info!("combination monitor cleared before pump install");
        }
        if let Some(mut old) = inner.pump.take() {
            old.set_delegate(None);
        }
        match pump {
            Some(mut pump) => {
                pump.set_delegate(Some(self.pump_delegate()));
                tracing::info!(device = pump.device_id(), "pump installed");
                inner.pump = Some(pump);
            }
            None => tracing::info!("pump slot cleared"),
        }
        inner.refresh_heartbeat_requirement();
    }

    /// Deliver a bolus through the active pump. Fails immediately when no
    /// pump is set; otherwise the completion fires exactly once after the
    /// dose is confirmed or rolled back.
    pub fn request_bolus(&self, units: f64, at: DateTime<Utc>, completion: BolusCompletion) {
        self.handle
            .with_inner(move |inner, handle| inner.request_bolus(units, at, completion, handle));
    }

    pub fn round_basal_rate(&self, units_per_hour: f64) -> f64 {
        let inner = lock(&self.inner);
        inner
            .pump
            .as_ref()
            .map_or(units_per_hour, |p| p.round_basal_rate(units_per_hour))
    }

    pub fn round_bolus_volume(&self, units: f64) -> f64 {
        let inner = lock(&self.inner);
        inner
            .pump
            .as_ref()
            .map_or(units, |p| p.round_bolus_volume(units))
    }

    /// Most recent device/driver error, timestamped.
    pub fn last_error(&self) -> Option<(DateTime<Utc>, String)> {
        lock(&self.inner).last_error.clone()
    }

    pub fn monitor_delegate(&self) -> Arc<dyn MonitorDelegate> {
        self.handle.clone()
    }

    pub fn pump_delegate(&self) -> Arc<dyn PumpDelegate> {
        self.handle.clone()
    }
}

/// Builder for `Coordinator`. The dosing engine is mandatory; everything
/// else has production defaults.
#[derive(Default)]
pub struct CoordinatorBuilder {
    engine: Option<Box<dyn DosingEngine>>,
    clock: Option<Arc<dyn Clock>>,
    cfg: CoordinatorCfg,
    sinks: Sinks,
    worker: Option<Arc<dyn Executor>>,
    background: Option<Arc<dyn Executor>>,
    target_source: Option<Arc<dyn TempTargetSource>>,
}

impl CoordinatorBuilder {
    pub fn with_engine(mut self, engine: impl DosingEngine + 'static) -> Self {
        self.engine = Some(Box::new(engine));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_cfg(mut self, cfg: CoordinatorCfg) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_sinks(mut self, sinks: Sinks) -> Self {
        self.sinks = sinks;
        self
    }

    pub fn with_worker(mut self, worker: Arc<dyn Executor>) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn with_background(mut self, background: Arc<dyn Executor>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_target_source(mut self, source: Arc<dyn TempTargetSource>) -> Self {
        self.target_source = Some(source);
        self
    }

    pub fn build(self) -> Result<Coordinator> {
        let engine = self
            .engine
            .ok_or_else(|| eyre::Report::new(BuildError::MissingEngine))?;

        let cfg = self.cfg;
        if !cfg
            .reservoir
            .warning_levels
            .windows(2)
            .all(|w| w[0] < w[1])
        {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "reservoir warning levels must be strictly ascending",
            )));
        }
        if cfg.reconcile.clamp_low_mgdl >= cfg.reconcile.clamp_high_mgdl {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "remote target clamp band is empty",
            )));
        }
        if cfg.battery.replacement_rise_percent <= 0.0 {
            return Err(eyre::Report::new(BuildError::InvalidConfig(
                "battery replacement rise must be > 0",
            )));
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let worker = self
            .worker
            .unwrap_or_else(|| Arc::new(SerialExecutor::spawn("pumphub-coordinator")));
        let background = self.background.unwrap_or_else(|| Arc::new(SpawnExecutor));

        let now = clock.now();
        let alarm = AlarmEvaluator::new(cfg.alarm.clone(), now);

        let inner = Arc::new(Mutex::new(Inner {
            cgm: None,
            pump: None,
            engine,
            clock,
            cfg,
            sinks: self.sinks,
            target_source: self.target_source,
            last_driven_update: None,
            last_error: None,
            alarm,
            worker: worker.clone(),
            background,
        }));
        let handle = Arc::new(CoordinatorHandle {
            inner: Arc::downgrade(&inner),
            worker: worker.clone(),
        });

        Ok(Coordinator {
            inner,
            handle,
            worker,
        })
    }
}
