/// Frontier entry states
///
/// Entries move `pending → processing → {completed, failed, skipped}`. A failed
/// attempt with attempts left goes back to `pending` with a retry time.
use std::fmt;

/// Status of one URL in a job's frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    /// Waiting to be claimed
    Pending,

    /// Claimed by a fetch task
    Processing,

    // ===== Terminal States =====
    /// Fetched and recorded as a page
    Completed,

    /// Out of attempts, or a non-retryable error
    Failed,

    /// Deliberately not fetched (robots, cancel)
    Skipped,
}

impl EntryStatus {
    /// Returns true for `completed`, `failed` and `skipped`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    /// Converts the entry status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    /// Parses an entry status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

impl fmt::Display for EntryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
