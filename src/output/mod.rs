//! Output module for job status reporting
//!
//! This module handles:
//! - Projecting job counters and live frontier counts into a status view
//! - Printing status reports for the CLI

mod status;

pub use status::{compute_status, print_status, JobStatusReport};
pub use crate::storage::FrontierCounts;
