//! Local therapy-override store.
//!
//! Presets are named, user- or reconciler-authored parameter bundles; an
//! active override is a time-bounded activation of one of them. The remote
//! reconciler owns exactly one preset (`REMOTE_PRESET_NAME`) and must never
//! disturb an activation with any other origin.

use chrono::{DateTime, Duration, Utc};

/// Name of the preset the remote reconciler creates and maintains.
pub const REMOTE_PRESET_NAME: &str = "remote-origin";

/// Where an active override came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideOrigin {
    /// Activated from a named preset.
    Preset(String),
    /// Ad-hoc pre-meal target.
    PreMeal,
    /// Ad-hoc custom target entered directly by the user.
    Custom,
}

impl OverrideOrigin {
    pub fn is_remote(&self) -> bool {
        matches!(self, OverrideOrigin::Preset(name) if name == REMOTE_PRESET_NAME)
    }
}

/// A named override parameter bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct OverridePreset {
    pub name: String,
    pub target_low_mgdl: f64,
    pub target_high_mgdl: f64,
    /// Insulin-needs scale factor; 1.0 means unchanged.
    pub insulin_needs_scale: f64,
    pub duration: Duration,
}

/// A time-bounded activation of override parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveOverride {
    pub origin: OverrideOrigin,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub target_low_mgdl: f64,
    pub target_high_mgdl: f64,
    pub insulin_needs_scale: f64,
}

impl ActiveOverride {
    pub fn end_date(&self) -> DateTime<Utc> {
        self.end
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.end > now
    }
}

/// Override state inside the dosing engine's settings.
#[derive(Debug, Default)]
pub struct TherapySettings {
    presets: Vec<OverridePreset>,
    active: Option<ActiveOverride>,
}

impl TherapySettings {
    pub fn new() -> Self {
        Self::default()
    }

    /// The currently scheduled override, if it has not yet expired.
    pub fn active_override(&self, now: DateTime<Utc>) -> Option<&ActiveOverride> {
        self.active.as_ref().filter(|o| o.is_active(now))
    }

    pub fn preset(&self, name: &str) -> Option<&OverridePreset> {
        self.presets.iter().find(|p| p.name == name)
    }

    /// Insert or update a preset by name.
    pub fn upsert_preset(&mut self, preset: OverridePreset) {
        match self.presets.iter_mut().find(|p| p.name == preset.name) {
            Some(existing) => *existing = preset,
            None => self.presets.push(preset),
        }
    }

    /// Replace whatever is scheduled with the given activation.
    pub fn schedule_override(&mut self, active: ActiveOverride) {
        tracing::debug!(origin = ?active.origin, end = %active.end, "override scheduled");
        self.active = Some(active);
    }

    pub fn cancel_active(&mut self) {
        if let Some(o) = self.active.take() {
            tracing::debug!(origin = ?o.origin, "override cancelled");
        }
    }
}
