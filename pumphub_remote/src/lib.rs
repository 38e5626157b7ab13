#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! HTTP source for remotely-declared temporary therapy targets.
//!
//! Talks to a Nightscout-compatible treatments API and decodes
//! "Temporary Target" entries into `RemoteTargetEvent`s for the core
//! reconciler. Decoding is fail-closed: one malformed record fails the
//! whole fetch, and the reconciler then treats the poll as a miss.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use thiserror::Error;

use pumphub_core::reconciler::{RemoteTargetEvent, SourceError, TempTargetSource};

/// Treatment records younger than this are requested, in hours.
const LOOKBACK_HOURS: i64 = 24;
/// Upper bound on records per poll; the reconciler only uses the newest.
const FETCH_LIMIT: u32 = 10;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("remote polling is not configured")]
    NotConfigured,
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("decode: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("bad timestamp {0:?}")]
    BadTimestamp(String),
}

/// Wire shape of a Nightscout temporary-target treatment.
#[derive(Debug, Deserialize)]
struct WireTarget {
    created_at: String,
    /// Duration in minutes; may be fractional.
    #[serde(default)]
    duration: f64,
    #[serde(rename = "targetBottom")]
    target_bottom: Option<f64>,
    #[serde(rename = "targetTop")]
    target_top: Option<f64>,
    #[serde(default)]
    notes: Option<String>,
}

/// Decode a treatments payload into reconciler events.
pub fn decode_targets(body: &str) -> Result<Vec<RemoteTargetEvent>, RemoteError> {
    let wire: Vec<WireTarget> = serde_json::from_str(body)?;
    wire.into_iter()
        .map(|t| {
            let created_at = DateTime::parse_from_rfc3339(&t.created_at)
                .map_err(|_| RemoteError::BadTimestamp(t.created_at.clone()))?
                .with_timezone(&Utc);
            Ok(RemoteTargetEvent {
                created_at,
                duration_minutes: t.duration as i64,
                target_low_mgdl: t.target_bottom,
                target_high_mgdl: t.target_top,
                note: t.notes,
            })
        })
        .collect()
}

/// Blocking HTTP target source.
pub struct HttpTargetSource {
    client: reqwest::blocking::Client,
    base_url: String,
    api_secret: Option<String>,
}

impl HttpTargetSource {
    pub fn new(base_url: impl Into<String>, api_secret: Option<String>) -> Result<Self, RemoteError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_secret,
        })
    }

    /// Build a source from config; `Err(NotConfigured)` when no URL is set.
    pub fn from_config(cfg: &pumphub_config::RemoteCfg) -> Result<Self, RemoteError> {
        let url = cfg.url.as_deref().ok_or(RemoteError::NotConfigured)?;
        Self::new(url, cfg.api_secret.clone())
    }

    fn fetch(&self) -> Result<Vec<RemoteTargetEvent>, RemoteError> {
        let since = (Utc::now() - Duration::hours(LOOKBACK_HOURS)).to_rfc3339();
        let url = format!("{}/api/v1/treatments.json", self.base_url);
        let count = FETCH_LIMIT.to_string();
        let mut request = self.client.get(&url).query(&[
            ("find[eventType]", "Temporary Target"),
            ("find[created_at][$gte]", since.as_str()),
            ("count", count.as_str()),
        ]);
        if let Some(secret) = &self.api_secret {
            request = request.header("api-secret", secret);
        }
        let body = request.send()?.error_for_status()?.text()?;
        let events = decode_targets(&body)?;
        tracing::debug!(count = events.len(), "remote targets fetched");
        Ok(events)
    }
}

impl TempTargetSource for HttpTargetSource {
    fn fetch_recent(&self) -> Result<Vec<RemoteTargetEvent>, SourceError> {
        self.fetch().map_err(|e| Box::new(e) as SourceError)
    }
}
