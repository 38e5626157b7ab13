//! Fire-and-forget notification, analytics, alarm, and upload sinks.
//!
//! All sinks are injected dependencies so tests can substitute recorders;
//! none of them returns a result to the coordinator. Notification ids are
//! stable strings so a later event can clear a previously delivered one.

use crate::alarm::GlucoseAlarm;
use pumphub_traits::GlucoseSample;

/// Stable notification identifiers.
pub mod ids {
    pub const RESERVOIR_EMPTY: &str = "reservoir-empty";
    pub const PUMP_BATTERY_LOW: &str = "pump-battery-low";
    pub const BOLUS_FAILURE: &str = "bolus-failure";

    /// Id for a low-reservoir warning at the given level.
    pub fn reservoir_low(level: f64) -> String {
        format!("reservoir-low-{}", level as i64)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub id: String,
    pub body: String,
}

impl Notification {
    pub fn new(id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn deliver(&self, notification: Notification);
    fn clear(&self, id: &str);
}

pub trait AnalyticsSink: Send + Sync {
    fn record(&self, event: &str);
}

/// Physical alarm feedback. Implementations may block; the coordinator
/// always dispatches this on its background context.
pub trait AlarmSink: Send + Sync {
    fn sound(&self, alarm: GlucoseAlarm);
}

/// Remote sync for archived glucose samples. Best-effort: failures are the
/// sink's problem and never surface to the coordinator.
pub trait UploadSink: Send + Sync {
    fn upload_glucose(&self, samples: &[GlucoseSample]);
}

/// Default no-op sink, usable for every sink trait.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl NotificationSink for NullSink {
    fn deliver(&self, _notification: Notification) {}
    fn clear(&self, _id: &str) {}
}

impl AnalyticsSink for NullSink {
    fn record(&self, _event: &str) {}
}

impl AlarmSink for NullSink {
    fn sound(&self, _alarm: GlucoseAlarm) {}
}

impl UploadSink for NullSink {
    fn upload_glucose(&self, _samples: &[GlucoseSample]) {}
}
