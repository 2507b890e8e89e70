use crate::alerts::alert_cache::{AggregatedAlert, AlertCache};
use crate::alerts::notifier::{format_alert_message, Notifier};
use crate::error::AlertError;
use crate::events::LogEvent;
use chrono::Utc;
use log::{debug, error, info};
use std::sync::Arc;

/// Largest message body handed to a notifier, in bytes
pub const MAX_BODY_BYTES: usize = 4096;

/// Feeds events through the alert cache and delivers the alerts it lets through
///
/// The cache decides whether an occurrence deserves a notification; the dispatcher
/// renders and truncates the message and hands it to the configured channel. Only a
/// successful delivery is recorded as a send. A failed delivery is reported to the
/// caller and never retried here; the next occurrence of the same anomaly is
/// evaluated against the last delivery that actually went out.
pub struct AlertDispatcher {
    cache: AlertCache,
    notifier: Arc<dyn Notifier>,
    max_body_bytes: usize,
}

impl AlertDispatcher {
    /// Create a dispatcher
    ///
    /// # Arguments
    ///
    /// * `cache` - Aggregation state and send policy
    /// * `notifier` - Delivery channel
    pub fn new(cache: AlertCache, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cache,
            notifier,
            max_body_bytes: MAX_BODY_BYTES,
        }
    }

    /// Record an occurrence and send an alert if the policy calls for one
    ///
    /// # Returns
    ///
    /// `Ok(Some(alert))` when a notification was delivered, `Ok(None)` when the
    /// occurrence was only aggregated
    ///
    /// # Errors
    ///
    /// Returns the notifier's error when delivery fails.
    pub async fn dispatch(
        &self,
        event: &LogEvent,
        analysis: &str,
    ) -> Result<Option<AggregatedAlert>, AlertError> {
        let now = Utc::now();
        let decision = self.cache.add_or_update_at(event, analysis, now);
        if !decision.send {
            debug!(
                "Aggregated occurrence {} of {} without notification",
                decision.alert.count, decision.alert.key
            );
            return Ok(None);
        }

        let body = truncate_text(
            &format_alert_message(&decision.alert, now),
            self.max_body_bytes,
        );

        match self.notifier.send(&body).await {
            Ok(()) => {
                self.cache.mark_sent(&decision.alert.key, now);
                info!(
                    "Sent {} alert for {} (severity {}, {} occurrence(s))",
                    self.notifier.name(),
                    decision.alert.key,
                    decision.alert.max_severity,
                    decision.alert.count
                );
                Ok(Some(decision.alert))
            }
            Err(e) => {
                error!("Failed to send {} alert: {}", self.notifier.name(), e);
                Err(e)
            }
        }
    }

    /// Drop idle aggregates
    pub fn cleanup(&self) -> usize {
        self.cache.cleanup()
    }

    pub fn cache(&self) -> &AlertCache {
        &self.cache
    }
}

/// Truncate text to at most `max_length` bytes, ending with `...` when shortened
///
/// Cuts only on UTF-8 character boundaries.
pub fn truncate_text(text: &str, max_length: usize) -> String {
    if text.len() <= max_length {
        return text.to_string();
    }

    let mut truncate_at = max_length.saturating_sub(3);
    while truncate_at > 0 && !text.is_char_boundary(truncate_at) {
        truncate_at -= 1;
    }
    format!("{}...", &text[..truncate_at])
}
