//! Shared device vocabulary exchanged between drivers and the coordinator.

use chrono::{DateTime, FixedOffset, Utc};

use crate::DriverError;

/// A single glucose reading in mg/dL, stamped by the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct GlucoseSample {
    pub at: DateTime<Utc>,
    pub mgdl: f64,
}

impl GlucoseSample {
    pub fn new(at: DateTime<Utc>, mgdl: f64) -> Self {
        Self { at, mgdl }
    }
}

/// Outcome of a glucose-monitor fetch, produced once per driver callback.
///
/// `NewData` samples are chronological and non-empty by driver contract.
#[derive(Debug)]
pub enum GlucoseFetchResult {
    NewData(Vec<GlucoseSample>),
    NoData,
    Error(DriverError),
}

/// How the pump is currently delivering basal insulin.
#[derive(Debug, Clone, PartialEq)]
pub enum BasalDeliveryState {
    Active,
    Suspended,
    TempBasal {
        units_per_hour: f64,
        ends: DateTime<Utc>,
    },
}

/// Point-in-time pump state reported with every status callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpStatusSnapshot {
    /// Battery charge in percent (0..=100), if the pump reports one.
    pub battery_percent: Option<f64>,
    pub basal_state: BasalDeliveryState,
    /// Time zone the pump's internal schedule clock is set to.
    pub time_zone: FixedOffset,
}

/// An entry from the pump's internal event history.
#[derive(Debug, Clone, PartialEq)]
pub struct PumpEvent {
    pub at: DateTime<Utc>,
    pub kind: PumpEventKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PumpEventKind {
    Bolus { units: f64 },
    TempBasal { units_per_hour: f64, minutes: u32 },
    Suspend,
    Resume,
    Rewind,
    Prime,
    Alarm(String),
}
