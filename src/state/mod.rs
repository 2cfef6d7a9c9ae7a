//! State module for tracking crawl progress
//!
//! # Components
//!
//! - `JobStatus`: The job lifecycle state machine (idle, queued, running, paused, terminal)
//! - `EntryStatus`: The state of one URL in a job's frontier
//! - `DomainState`: Per-domain politeness spacing and 429 cooldowns
//! - `PolitenessTable`: The process-wide map of `DomainState`s shared by all jobs

mod domain_state;
mod entry_state;
mod job_state;
mod politeness;

// Re-export main types
pub use domain_state::DomainState;
pub use entry_state::EntryStatus;
pub use job_state::JobStatus;
pub use politeness::PolitenessTable;
