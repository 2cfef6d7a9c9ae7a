/// Job lifecycle states
///
/// A job moves `idle → queued → running → {paused, completed, failed, cancelled}`.
/// `paused` can go back to `running` or on to `cancelled`. The last three are terminal.
use std::fmt;

/// Lifecycle status of a crawl job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created but never started
    Idle,

    /// Waiting for a scheduler (on-demand start or recurring dispatch)
    Queued,

    /// A scheduler is pulling from the frontier
    Running,

    /// No new work is dequeued; frontier state is kept for resume
    Paused,

    // ===== Terminal States =====
    /// Frontier exhausted or page limit reached
    Completed,

    /// Failure threshold crossed or no progress possible
    Failed,

    /// Stopped by request; remaining pending entries were discarded
    Cancelled,
}

impl JobStatus {
    /// Returns true for `completed`, `failed` and `cancelled`
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns true if the job state machine allows moving to `next`
    ///
    /// # Arguments
    ///
    /// * `next` - The requested target state
    ///
    /// # Returns
    ///
    /// * `true` - If the transition is legal
    /// * `false` - Otherwise (including every transition out of a terminal state)
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        match (self, next) {
            (Idle, Queued) => true,
            (Idle | Queued, Running) => true,
            (Running, Paused | Completed | Failed) => true,
            (Paused, Running) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }

    /// Converts the job status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parses a job status from its database string representation
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "idle" => Some(Self::Idle),
            "queued" => Some(Self::Queued),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Returns all job states
    pub fn all_states() -> [Self; 7] {
        [
            Self::Idle,
            Self::Queued,
            Self::Running,
            Self::Paused,
            Self::Completed,
            Self::Failed,
            Self::Cancelled,
        ]
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
