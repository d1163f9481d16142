//! State module for tracking page job progress
//!
//! # Components
//!
//! - `JobState`: where a page job is in the fetch-and-persist sequence
//! - `FailureReason`: why a job stopped early

mod job_state;

pub use job_state::{FailureReason, JobState};
