#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Core coordination logic for a closed-loop insulin delivery setup
//! (hardware-agnostic).
//!
//! This crate coordinates a continuous glucose monitor and an insulin pump
//! around a pluggable dosing engine. All device interaction goes through the
//! `pumphub_traits::GlucoseMonitor` and `pumphub_traits::Pump` traits.
//!
//! ## Architecture
//!
//! - **Coordinator**: device slots, serial worker queue, delegate wiring
//!   (`coordinator` module)
//! - **Throttling**: heartbeat-driven poll intervals keyed off loop
//!   freshness (`throttle` module)
//! - **Reconciliation**: remote temporary-target mirroring with local
//!   precedence (`reconciler` module)
//! - **Monitoring**: glucose alarms, reservoir and battery thresholds
//!   (`alarm`, `reservoir` modules)
//! - **Engine seam**: the dosing-decision interface the coordinator drives
//!   (`engine` module)
//!
//! ## Threading
//!
//! Every device callback is re-posted onto one serial worker; blocking work
//! (alarms, network fetches) runs on a separate background context. See
//! `executor` for the contracts.

// Module declarations
pub mod alarm;
mod cgm;
mod conversions;
pub mod coordinator;
pub mod engine;
pub mod error;
pub mod executor;
pub mod mocks;
pub mod notify;
pub mod reconciler;
pub mod reservoir;
pub mod settings;
pub mod throttle;

pub use coordinator::{
    BatteryCfg, BolusCompletion, Coordinator, CoordinatorBuilder, CoordinatorCfg,
    CoordinatorHandle, Sinks,
};
pub use engine::{DoseRounder, DosingEngine};
pub use error::{BuildError, CoordinatorError, EngineError, Result};
