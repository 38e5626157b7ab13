#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the pump coordinator.
//!
//! `Config` and sub-structs are deserialized from TOML and validated.
//! Every section is optional with safe defaults, so an empty file is a
//! valid configuration.
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AlarmCfg {
    /// Minimum minutes between two sounded alarms.
    pub snooze_minutes: u64,
    /// A newest reading older than this counts as stale.
    pub stale_after_minutes: u64,
    /// Glucose below this (mg/dL) sounds the low alarm.
    pub low_threshold_mgdl: f64,
}

impl Default for AlarmCfg {
    fn default() -> Self {
        Self {
            snooze_minutes: 30,
            stale_after_minutes: 45,
            low_threshold_mgdl: 60.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReservoirCfg {
    /// Ascending warning levels in units; a reading crossing below one
    /// delivers a low-reservoir notification.
    pub warning_levels: Vec<f64>,
    /// A volume rise of at least this many units reads as a reservoir swap.
    pub replacement_rise_units: f64,
}

impl Default for ReservoirCfg {
    fn default() -> Self {
        Self {
            warning_levels: vec![10.0, 20.0, 30.0],
            replacement_rise_units: 1.0,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct BatteryCfg {
    /// A battery-percent rise of at least this much reads as a replacement.
    pub replacement_rise_percent: f64,
}

impl Default for BatteryCfg {
    fn default() -> Self {
        Self {
            replacement_rise_percent: 50.0,
        }
    }
}

/// Remote temporary-target polling.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct RemoteCfg {
    /// Base URL of the remote therapy service. Polling is disabled when
    /// absent.
    pub url: Option<String>,
    /// Optional API secret sent with each request.
    pub api_secret: Option<String>,
    /// Safety clamp applied to remote-declared targets (mg/dL).
    pub clamp_low_mgdl: Option<f64>,
    pub clamp_high_mgdl: Option<f64>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub alarm: AlarmCfg,
    pub reservoir: ReservoirCfg,
    pub battery: BatteryCfg,
    pub remote: RemoteCfg,
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Reject configurations that parse but cannot be operated safely.
    pub fn validate(&self) -> eyre::Result<()> {
        if self.alarm.low_threshold_mgdl <= 0.0 {
            eyre::bail!(
                "alarm.low_threshold_mgdl must be positive, got {}",
                self.alarm.low_threshold_mgdl
            );
        }
        if self.alarm.stale_after_minutes == 0 {
            eyre::bail!("alarm.stale_after_minutes must be at least 1");
        }
        if !self
            .reservoir
            .warning_levels
            .windows(2)
            .all(|w| w[0] < w[1])
        {
            eyre::bail!("reservoir.warning_levels must be strictly ascending");
        }
        if self.reservoir.warning_levels.iter().any(|l| *l <= 0.0) {
            eyre::bail!("reservoir.warning_levels must all be positive");
        }
        if self.reservoir.replacement_rise_units <= 0.0 {
            eyre::bail!("reservoir.replacement_rise_units must be positive");
        }
        if self.battery.replacement_rise_percent <= 0.0 {
            eyre::bail!("battery.replacement_rise_percent must be positive");
        }
        if let (Some(low), Some(high)) = (self.remote.clamp_low_mgdl, self.remote.clamp_high_mgdl)
            && low >= high
        {
            eyre::bail!("remote clamp band is empty: {low} >= {high}");
        }
        if let Some(url) = &self.remote.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            eyre::bail!("remote.url must be an http(s) URL, got {url}");
        }
        Ok(())
    }
}
