//! Outcome bookkeeping shared by the exporters.

use serde::{Deserialize, Serialize};

/// Terminal status of one export job (a table or a bucket).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Skipped,
    Failed,
}

/// Counts per status. `successful + skipped + failed == total` holds by
/// construction since each recorded job lands in exactly one bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub successful: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl Tally {
    pub fn record(&mut self, status: JobStatus) {
        match status {
            JobStatus::Success => self.successful += 1,
            JobStatus::Skipped => self.skipped += 1,
            JobStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.successful + self.skipped + self.failed
    }
}

impl FromIterator<JobStatus> for Tally {
    fn from_iter<I: IntoIterator<Item = JobStatus>>(iter: I) -> Self {
        let mut tally = Tally::default();
        for status in iter {
            tally.record(status);
        }
        tally
    }
}

/// Export phase, as named in the master summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Data,
    Auth,
    Storage,
}

impl Phase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Auth => "auth",
            Self::Storage => "storage",
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error recorded against a phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseError {
    pub phase: Phase,
    pub message: String,
}

impl PhaseError {
    pub fn new(phase: Phase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
        }
    }
}

pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Seconds with millisecond precision, for summaries.
pub fn seconds(elapsed: std::time::Duration) -> f64 {
    (elapsed.as_millis() as f64) / 1000.0
}
