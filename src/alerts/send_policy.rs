use chrono::Duration;

/// Severity band that selects a notification cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeverityTier {
    /// Severity 8 and above
    High,
    /// Severity 5 to 7
    Medium,
    /// Severity below 5
    Low,
}

impl SeverityTier {
    pub fn of(severity: u8) -> Self {
        match severity {
            8..=u8::MAX => SeverityTier::High,
            5..=7 => SeverityTier::Medium,
            _ => SeverityTier::Low,
        }
    }
}

/// Tiered policy deciding whether an aggregated alert should be sent
///
/// High and medium severities send their first few occurrences unconditionally and
/// are then throttled to a fixed interval measured from the last actual send. Low
/// severities send every Nth occurrence or after a long quiet interval.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendPolicy {
    /// Occurrences of a high-severity alert always sent
    pub high_burst: u64,
    /// Resend interval for high-severity alerts after the burst
    pub high_interval: Duration,
    /// Occurrences of a medium-severity alert always sent
    pub medium_burst: u64,
    /// Resend interval for medium-severity alerts after the burst
    pub medium_interval: Duration,
    /// Low-severity alerts send on every multiple of this count
    pub low_every: u64,
    /// Resend interval for low-severity alerts
    pub low_interval: Duration,
}

impl Default for SendPolicy {
    fn default() -> Self {
        Self {
            high_burst: 3,
            high_interval: Duration::minutes(5),
            medium_burst: 2,
            medium_interval: Duration::minutes(10),
            low_every: 10,
            low_interval: Duration::minutes(30),
        }
    }
}

impl SendPolicy {
    /// Decide for a freshly created aggregate
    pub fn should_send_new(&self, severity: u8, is_cell_trace: bool) -> bool {
        match SeverityTier::of(severity) {
            SeverityTier::High | SeverityTier::Medium => true,
            SeverityTier::Low => is_cell_trace,
        }
    }

    /// Decide for an aggregate that has just been updated
    ///
    /// # Arguments
    ///
    /// * `severity` - Severity of the incoming occurrence
    /// * `count` - Occurrence count after the update
    /// * `since_last_send` - Time since the aggregate was last sent (or created, if never)
    pub fn should_send_repeat(&self, severity: u8, count: u64, since_last_send: Duration) -> bool {
        match SeverityTier::of(severity) {
            SeverityTier::High => count <= self.high_burst || since_last_send >= self.high_interval,
            SeverityTier::Medium => {
                count <= self.medium_burst || since_last_send >= self.medium_interval
            }
            SeverityTier::Low => {
                (self.low_every > 0 && count % self.low_every == 0)
                    || since_last_send >= self.low_interval
            }
        }
    }
}
