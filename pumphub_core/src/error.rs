use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum CoordinatorError {
    #[error("configuration error: no active pump")]
    NoActivePump,
    #[error("device error: {0}")]
    Device(String),
    #[error("bolus failed: {0}")]
    Bolus(String),
    #[error("store error: {0}")]
    Store(String),
}

/// Failures reported by the dosing engine's append/ledger operations.
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("glucose store: {0}")]
    GlucoseStore(String),
    #[error("dose store: {0}")]
    DoseStore(String),
    #[error("event ledger: {0}")]
    EventLedger(String),
}

#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("missing dosing engine")]
    MissingEngine,
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
