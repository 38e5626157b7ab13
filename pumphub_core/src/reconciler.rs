//! Remote temporary-target reconciliation.
//!
//! Polls a remote source for temporary therapy targets and idempotently
//! mirrors the most recent one into the local override store. Local intent
//! always wins: an activation the reconciler did not author blocks it
//! entirely, with a deliberate carve-out for ad-hoc pre-meal and custom
//! targets which are allowed to be superseded.
//!
//! Fetch and decode failures are swallowed by the caller; reconciliation
//! then behaves as if no remote update occurred.

use chrono::{DateTime, Duration, Utc};

use crate::settings::{
    ActiveOverride, OverrideOrigin, OverridePreset, REMOTE_PRESET_NAME, TherapySettings,
};

pub type SourceError = Box<dyn std::error::Error + Send + Sync>;

/// Source of remotely-declared temporary targets, ordered newest first and
/// filtered to the trailing 24 hours. Implementations block; the coordinator
/// calls this on its background context, never on the worker.
pub trait TempTargetSource: Send + Sync {
    fn fetch_recent(&self) -> Result<Vec<RemoteTargetEvent>, SourceError>;
}

/// A decoded remote target event. Reconstructed on every poll, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteTargetEvent {
    pub created_at: DateTime<Utc>,
    pub duration_minutes: i64,
    pub target_low_mgdl: Option<f64>,
    pub target_high_mgdl: Option<f64>,
    /// Optional percent note, e.g. "120" or "120%", scaling insulin needs.
    pub note: Option<String>,
}

/// Safety clamps and idempotence tolerances.
#[derive(Debug, Clone)]
pub struct ReconcileCfg {
    /// Target bounds are clamped into this band (mg/dL) no matter what the
    /// remote declares.
    pub clamp_low_mgdl: f64,
    pub clamp_high_mgdl: f64,
    /// Idempotent-skip tolerances against the already-active override.
    pub scale_tolerance: f64,
    pub bound_tolerance_mgdl: f64,
    pub deadline_tolerance: Duration,
}

impl Default for ReconcileCfg {
    fn default() -> Self {
        Self {
            clamp_low_mgdl: 50.0,
            clamp_high_mgdl: 400.0,
            scale_tolerance: 0.01,
            bound_tolerance_mgdl: 1.0,
            deadline_tolerance: Duration::minutes(10),
        }
    }
}

/// What a reconciliation pass did, for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciliation {
    /// A non-remote override is active; local precedence holds.
    LocalPrecedence,
    /// The source returned no events.
    NoEvents,
    /// The newest event was rejected (missing/inverted bounds or already
    /// past its deadline).
    Rejected,
    /// A sub-minute duration cancelled the remote override.
    Cancelled,
    /// A new remote override was activated.
    Activated,
    /// The active remote override was replaced with updated parameters.
    Replaced,
    /// The active remote override already matches within tolerance.
    Unchanged,
}

/// Apply the newest remote event to the local override store.
///
/// Idempotent under repeated identical inputs; never touches an activation
/// it did not author unless that activation has already expired.
pub fn reconcile(
    settings: &mut TherapySettings,
    events: &[RemoteTargetEvent],
    now: DateTime<Utc>,
    cfg: &ReconcileCfg,
) -> Reconciliation {
    if let Some(active) = settings.active_override(now)
        && !active.origin.is_remote()
        && !matches!(
            active.origin,
            OverrideOrigin::PreMeal | OverrideOrigin::Custom
        )
    {
        tracing::trace!(origin = ?active.origin, "local override active; skipping remote target");
        return Reconciliation::LocalPrecedence;
    }

    let Some(event) = events.iter().max_by_key(|e| e.created_at) else {
        return Reconciliation::NoEvents;
    };

    // A sub-minute duration is the remote way of saying "cancel".
    if event.duration_minutes < 1 {
        let remote_active = settings
            .active_override(now)
            .is_some_and(|o| o.origin.is_remote());
        if remote_active {
            settings.cancel_active();
            tracing::info!("remote target cancelled active remote override");
            return Reconciliation::Cancelled;
        }
        return Reconciliation::Unchanged;
    }

    let (Some(low), Some(high)) = (event.target_low_mgdl, event.target_high_mgdl) else {
        tracing::warn!("remote target missing a bound; ignored");
        return Reconciliation::Rejected;
    };
    if high < low {
        tracing::warn!(low, high, "remote target bounds inverted; ignored");
        return Reconciliation::Rejected;
    }

    let deadline = event.created_at + Duration::minutes(event.duration_minutes);
    if deadline <= now {
        tracing::trace!(%deadline, "remote target already expired; ignored");
        return Reconciliation::Rejected;
    }

    let low = low.clamp(cfg.clamp_low_mgdl, cfg.clamp_high_mgdl);
    let high = high.clamp(cfg.clamp_low_mgdl, cfg.clamp_high_mgdl);
    let scale = parse_scale_note(event.note.as_deref());

    if let Some(active) = settings.active_override(now)
        && active.origin.is_remote()
    {
        let matches = (active.insulin_needs_scale - scale).abs() <= cfg.scale_tolerance
            && (active.target_high_mgdl - high).abs() <= cfg.bound_tolerance_mgdl
            && (active.target_low_mgdl - low).abs() <= cfg.bound_tolerance_mgdl
            && within(active.end_date(), deadline, cfg.deadline_tolerance);
        if matches {
            tracing::trace!("remote target unchanged within tolerance");
            return Reconciliation::Unchanged;
        }
        activate(settings, event, low, high, scale, deadline, now);
        tracing::info!(low, high, scale, %deadline, "remote override replaced");
        return Reconciliation::Replaced;
    }

    activate(settings, event, low, high, scale, deadline, now);
    tracing::info!(low, high, scale, %deadline, "remote override activated");
    Reconciliation::Activated
}

fn activate(
    settings: &mut TherapySettings,
    event: &RemoteTargetEvent,
    low: f64,
    high: f64,
    scale: f64,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) {
    settings.upsert_preset(OverridePreset {
        name: REMOTE_PRESET_NAME.into(),
        target_low_mgdl: low,
        target_high_mgdl: high,
        insulin_needs_scale: scale,
        duration: deadline - now,
    });
    settings.schedule_override(ActiveOverride {
        origin: OverrideOrigin::Preset(REMOTE_PRESET_NAME.into()),
        start: event.created_at,
        end: deadline,
        target_low_mgdl: low,
        target_high_mgdl: high,
        insulin_needs_scale: scale,
    });
}

fn within(a: DateTime<Utc>, b: DateTime<Utc>, tolerance: Duration) -> bool {
    let delta = if a >= b { a - b } else { b - a };
    delta <= tolerance
}

/// Parse an optional percent note into an insulin-needs scale factor.
///
/// Accepts "120" or "120%". Values outside [10, 300] percent collapse to
/// 100%, as does anything unparsable or absent.
pub fn parse_scale_note(note: Option<&str>) -> f64 {
    let Some(raw) = note else {
        return 1.0;
    };
    let trimmed = raw.trim().trim_end_matches('%').trim();
    match trimmed.parse::<f64>() {
        Ok(percent) if (10.0..=300.0).contains(&percent) => percent / 100.0,
        Ok(percent) => {
            tracing::warn!(percent, "scale note out of range; using 100%");
            1.0
        }
        Err(_) => {
            if !trimmed.is_empty() {
                tracing::warn!(note = raw, "unparsable scale note; using 100%");
            }
            1.0
        }
    }
}
