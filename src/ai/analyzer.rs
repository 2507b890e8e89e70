use crate::ai::backends::{DisabledBackend, Summarizer};
use crate::error::AnalysisError;
use crate::events::LogEvent;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;

/// Default deadline for one analysis, retries included
pub const DEFAULT_ANALYSIS_TIMEOUT: Duration = Duration::from_secs(30);

/// AI-powered log analysis coordinator
///
/// Wraps a [`Summarizer`] with an overall deadline and a small number of attempts.
/// Backoff between attempts grows linearly with the attempt number.
pub struct AIAnalyzer {
    backend: Arc<dyn Summarizer>,
    timeout: Duration,
    max_attempts: u32,
    base_retry_delay: Duration,
}

impl AIAnalyzer {
    /// Create an analyzer with a specific backend
    pub fn with_backend(backend: Arc<dyn Summarizer>) -> Self {
        Self {
            backend,
            timeout: DEFAULT_ANALYSIS_TIMEOUT,
            max_attempts: 3,
            base_retry_delay: Duration::from_secs(1),
        }
    }

    /// Analyzer that answers every request with the disabled placeholder
    pub fn disabled() -> Self {
        Self::with_backend(Arc::new(DisabledBackend))
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.base_retry_delay = delay;
        self
    }

    /// Analyze one event
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Timeout`] when the deadline passes, otherwise the error
    /// of the last failed attempt.
    pub async fn analyze(&self, event: &LogEvent) -> Result<String, AnalysisError> {
        let prompt = format_prompt(event);
        match tokio::time::timeout(self.timeout, self.analyze_with_retries(&prompt)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Analysis of {} timed out after {:?}",
                    event.event_id, self.timeout
                );
                Err(AnalysisError::Timeout)
            }
        }
    }

    async fn analyze_with_retries(&self, prompt: &str) -> Result<String, AnalysisError> {
        let mut last_error = AnalysisError::BackendError("no attempts made".to_string());

        for attempt in 1..=self.max_attempts {
            match self.backend.summarize(prompt).await {
                Ok(text) => {
                    debug!("Analysis succeeded on attempt {}", attempt);
                    return Ok(text);
                }
                Err(e) => {
                    warn!(
                        "Analysis attempt {}/{} failed: {}",
                        attempt, self.max_attempts, e
                    );
                    last_error = e;
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.base_retry_delay * attempt).await;
            }
        }

        Err(last_error)
    }
}

/// Build the user prompt for one event
pub fn format_prompt(event: &LogEvent) -> String {
    let mut prompt = format!(
        "Host: {}\nFile: {} (line {})\nSeverity: {}/10\nTags: {}\n\nLog content:\n{}\n",
        event.host,
        event.file_path,
        event.line_number,
        event.severity_score,
        event.tags.join(", "),
        event.raw_text
    );

    if !event.context_lines.is_empty() {
        prompt.push_str("\nFollowing context:\n");
        prompt.push_str(&event.context_lines.join("\n"));
        prompt.push('\n');
    }

    prompt
}
