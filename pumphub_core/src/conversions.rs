//! `From` implementations bridging `pumphub_config` types to `pumphub_core`
//! types.
//!
//! Config values use plain numbers (minutes, units, percent); the core types
//! carry `chrono::Duration`s. These impls are the only place that mapping
//! lives.

use chrono::Duration;

use crate::alarm::AlarmCfg;
use crate::coordinator::{BatteryCfg, CoordinatorCfg};
use crate::reconciler::ReconcileCfg;
use crate::reservoir::ReservoirCfg;

// ── AlarmCfg ─────────────────────────────────────────────────────────────────

impl From<&pumphub_config::AlarmCfg> for AlarmCfg {
    fn from(c: &pumphub_config::AlarmCfg) -> Self {
        Self {
            snooze: Duration::minutes(c.snooze_minutes as i64),
            stale_after: Duration::minutes(c.stale_after_minutes as i64),
            low_threshold_mgdl: c.low_threshold_mgdl,
        }
    }
}

// ── ReservoirCfg ─────────────────────────────────────────────────────────────

impl From<&pumphub_config::ReservoirCfg> for ReservoirCfg {
    fn from(c: &pumphub_config::ReservoirCfg) -> Self {
        Self {
            warning_levels: c.warning_levels.clone(),
            replacement_rise_units: c.replacement_rise_units,
        }
    }
}

// ── BatteryCfg ───────────────────────────────────────────────────────────────

impl From<&pumphub_config::BatteryCfg> for BatteryCfg {
    fn from(c: &pumphub_config::BatteryCfg) -> Self {
        Self {
            replacement_rise_percent: c.replacement_rise_percent,
        }
    }
}

// ── ReconcileCfg ─────────────────────────────────────────────────────────────

impl From<&pumphub_config::RemoteCfg> for ReconcileCfg {
    fn from(c: &pumphub_config::RemoteCfg) -> Self {
        let defaults = ReconcileCfg::default();
        Self {
            clamp_low_mgdl: c.clamp_low_mgdl.unwrap_or(defaults.clamp_low_mgdl),
            clamp_high_mgdl: c.clamp_high_mgdl.unwrap_or(defaults.clamp_high_mgdl),
            ..defaults
        }
    }
}

// ── CoordinatorCfg ───────────────────────────────────────────────────────────

impl From<&pumphub_config::Config> for CoordinatorCfg {
    fn from(c: &pumphub_config::Config) -> Self {
        Self {
            alarm: (&c.alarm).into(),
            reservoir: (&c.reservoir).into(),
            battery: (&c.battery).into(),
            reconcile: (&c.remote).into(),
        }
    }
}
