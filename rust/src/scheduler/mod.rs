//! List scheduling of ready tasks onto resources.
//!
//! Tasks are committed in selection order once all their active
//! dependencies are committed, with the leveler resolving resource overload.

mod constraints;
mod core;
mod sorting;

pub use constraints::{resolve_windows, timing_inputs, NodeWindow};
pub use self::core::{ListScheduler, ScheduleOutcome, SchedulerError};
pub use sorting::SelectionKey;
