//! Critical path method over the task graph.
//!
//! A forward pass computes earliest start/finish, a backward pass computes
//! latest start/finish from the project horizon, and total float decides
//! criticality. Results are written back onto the graph nodes.

mod calculation;
mod types;

pub use calculation::{
    apply_timings, calculate_critical_path, compute_timings, CriticalPathError, TimingInputs,
};
pub use types::{CriticalPathResult, TaskTiming, SLACK_EPSILON};
