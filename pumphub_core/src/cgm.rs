//! Glucose fetch-result processing.
//!
//! Whatever the fetch produced, the pump is asked to verify its own data
//! currency and the heartbeat requirement is refreshed, so a monitor that
//! stops producing data cannot silently starve the pump of heartbeats.

use std::sync::Arc;

use pumphub_traits::GlucoseFetchResult;

use crate::coordinator::Inner;

impl Inner {
    pub(crate) fn process_cgm_result(&mut self, result: GlucoseFetchResult) {
        self.worker.assert_current();
        match result {
            GlucoseFetchResult::NewData(samples) => {
                let count = samples.len();
                match self.engine.append_glucose_samples(samples) {
                    Ok(stored) => {
                        tracing::debug!(received = count, stored = stored.len(), "glucose appended");
                        let uploads = self.cgm.as_ref().is_some_and(|m| m.uploads_readings());
                        if uploads && !stored.is_empty() {
                            // Best-effort sync; runs off the worker.
                            let sink = Arc::clone(&self.sinks.upload);
                            self.background
                                .post(Box::new(move || sink.upload_glucose(&stored)));
                        }
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "glucose append failed");
                        self.record_error(&e.to_string());
                    }
                }
            }
            GlucoseFetchResult::NoData => {
                tracing::trace!("glucose fetch returned no new data");
            }
            GlucoseFetchResult::Error(e) => {
                tracing::warn!(error = %e, "glucose fetch failed");
                self.record_error(&e.to_string());
            }
        }
        if let Some(pump) = self.pump.as_mut() {
            pump.assert_current_data();
        }
        self.refresh_heartbeat_requirement();
    }
}
