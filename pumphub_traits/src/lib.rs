//! Driver seam for the pumphub coordinator.
//!
//! Peripheral drivers (glucose monitors and insulin pumps) implement the
//! traits here; the coordinator implements the delegate traits and wires
//! itself in when a device is installed into a slot. All driver action
//! entry points take exactly one completion callback; `FnOnce` makes a
//! second invocation unrepresentable.

pub mod clock;
pub mod types;

pub use clock::{Clock, SystemClock};
pub use types::{
    BasalDeliveryState, GlucoseFetchResult, GlucoseSample, PumpEvent, PumpEventKind,
    PumpStatusSnapshot,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};

pub type DriverError = Box<dyn std::error::Error + Send + Sync>;

/// Completion for a driver action; guaranteed to fire exactly once per call.
pub type DriverCompletion = Box<dyn FnOnce(Result<(), DriverError>) + Send>;

/// Completion for a glucose fetch; receives the classified result.
pub type FetchCompletion = Box<dyn FnOnce(GlucoseFetchResult) + Send>;

pub trait GlucoseMonitor: Send {
    /// Stable identity of the paired device; used to drop stale callbacks
    /// after a slot replacement.
    fn device_id(&self) -> &str;

    /// Attach (Some) or detach (None) the delegate receiving this driver's
    /// callbacks.
    fn set_delegate(&mut self, delegate: Option<Arc<dyn MonitorDelegate>>);

    /// Ask the driver for fresh glucose data if it has any to offer.
    fn fetch_if_needed(&mut self, completion: FetchCompletion);

    /// True when the device ticks a reliable hardware heartbeat on its own.
    fn provides_heartbeat(&self) -> bool {
        false
    }

    /// True when readings from this device should be synced to a remote
    /// service.
    fn uploads_readings(&self) -> bool {
        false
    }

    /// True for combination devices that can also occupy the pump slot.
    fn acts_as_pump(&self) -> bool {
        false
    }
}

pub trait Pump: Send {
    fn device_id(&self) -> &str;

    fn set_delegate(&mut self, delegate: Option<Arc<dyn PumpDelegate>>);

    /// Current status snapshot.
    fn status(&self) -> PumpStatusSnapshot;

    /// Deliver a bolus. The completion fires exactly once.
    fn enact_bolus(&mut self, units: f64, at: DateTime<Utc>, completion: DriverCompletion);

    /// Ask the pump to verify the freshness of its cached state, fetching
    /// from hardware if stale.
    fn assert_current_data(&mut self);

    /// Tell the pump whether it must supply its own heartbeat because no
    /// monitor in the system provides one.
    fn set_must_provide_heartbeat(&mut self, required: bool);

    /// Round a basal rate to the pump's deliverable resolution.
    fn round_basal_rate(&self, units_per_hour: f64) -> f64 {
        units_per_hour
    }

    /// Round a bolus volume to the pump's deliverable resolution.
    fn round_bolus_volume(&self, units: f64) -> f64 {
        units
    }
}

/// Callbacks a glucose monitor issues. Implemented by the coordinator;
/// every method re-enters its serial worker queue.
pub trait MonitorDelegate: Send + Sync {
    /// Reliable hardware tick; may trigger a throttled fetch.
    fn monitor_heartbeat(&self);

    /// Direct data push from the driver, bypassing heartbeat throttling.
    fn monitor_result(&self, result: GlucoseFetchResult);
}

/// Callbacks a pump issues. Implemented by the coordinator.
pub trait PumpDelegate: Send + Sync {
    fn pump_status_changed(&self, new: PumpStatusSnapshot, old: PumpStatusSnapshot);

    fn pump_events(
        &self,
        events: Vec<PumpEvent>,
        last_reconciliation: Option<DateTime<Utc>>,
        completion: DriverCompletion,
    );

    fn pump_reservoir_reading(&self, units: f64, at: DateTime<Utc>, completion: DriverCompletion);

    /// The pump believes now is a good moment to evaluate the control loop.
    fn pump_recommends_loop(&self);
}
