//! Glucose alarm evaluation with a snooze window.
//!
//! Checks the latest glucose reading for staleness and low value. The alarm
//! side effect itself is a blocking physical-feedback action and must run on
//! a context other than the coordinator's worker; the evaluator only decides.

use chrono::{DateTime, Duration, Utc};
use pumphub_traits::GlucoseSample;

/// Alarm raised against the latest glucose reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GlucoseAlarm {
    /// No recent-enough reading is available.
    StaleData,
    /// The latest reading is below the low threshold.
    LowGlucose,
}

#[derive(Debug, Clone)]
pub struct AlarmCfg {
    /// Minimum time between raised alarms.
    pub snooze: Duration,
    /// A reading older than this is stale.
    pub stale_after: Duration,
    /// Readings below this value (mg/dL) raise a low-glucose alarm.
    pub low_threshold_mgdl: f64,
}

impl Default for AlarmCfg {
    fn default() -> Self {
        Self {
            snooze: Duration::minutes(30),
            stale_after: Duration::minutes(45),
            low_threshold_mgdl: 60.0,
        }
    }
}

#[derive(Debug)]
pub struct AlarmEvaluator {
    cfg: AlarmCfg,
    last_alarm: DateTime<Utc>,
}

impl AlarmEvaluator {
    /// `now` is process start; the snooze window starts expired so the first
    /// real condition can alarm immediately.
    pub fn new(cfg: AlarmCfg, now: DateTime<Utc>) -> Self {
        Self {
            cfg,
            last_alarm: now - Duration::hours(24),
        }
    }

    /// Evaluate the latest reading. Advances the snooze timestamp when an
    /// alarm fires; a missing reading counts as stale.
    pub fn evaluate(
        &mut self,
        latest: Option<&GlucoseSample>,
        now: DateTime<Utc>,
    ) -> Option<GlucoseAlarm> {
        if now - self.last_alarm < self.cfg.snooze {
            tracing::trace!("alarm snoozed");
            return None;
        }
        let alarm = match latest {
            None => Some(GlucoseAlarm::StaleData),
            Some(sample) if now - sample.at > self.cfg.stale_after => Some(GlucoseAlarm::StaleData),
            Some(sample) if sample.mgdl < self.cfg.low_threshold_mgdl => {
                Some(GlucoseAlarm::LowGlucose)
            }
            Some(_) => None,
        };
        if alarm.is_some() {
            self.last_alarm = now;
        }
        alarm
    }
}
