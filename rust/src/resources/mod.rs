//! Resource pool, per-role occupancy timelines and the leveler.

mod leveler;
mod pool;
mod schedule;

pub use leveler::{AlternatePreference, LevelRequest, Leveler, LevelingError, Placement};
pub use pool::{effective_limit, PoolEntry, ResourcePool, RoleCapacity};
pub use schedule::{Commitment, ResourceSchedule};
