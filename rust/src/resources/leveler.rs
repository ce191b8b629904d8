//! Bounded resource leveling.
//!
//! Given a task that would overload its resource, the leveler first looks for
//! a later start inside the task's slack, then for an alternate role holding
//! the required specialisations. Every candidate probe counts against
//! `LevelingConfig::max_iterations`; running out is reported, not retried.

use thiserror::Error;

use crate::config::LevelingConfig;

use super::pool::{PoolEntry, ResourcePool};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum LevelingError {
    #[error(
        "No valid slot or alternate resource for task {task_id} on {resource_id} after {iterations} probes"
    )]
    Exhausted {
        task_id: String,
        resource_id: String,
        iterations: usize,
    },
}

/// What the leveler is asked to place.
#[derive(Clone, Debug)]
pub struct LevelRequest<'a> {
    pub task_id: &'a str,
    pub resource_id: &'a str,
    pub earliest_start: f64,
    pub duration: f64,
    /// Hours the start may slip without moving the project horizon.
    pub slack: f64,
    /// False for tasks pinned against delays.
    pub allow_delay: bool,
    pub specializations: &'a [String],
}

/// A feasible placement.
#[derive(Clone, Debug, PartialEq)]
pub struct Placement {
    pub resource_id: String,
    pub start: f64,
    /// Hours past the requested earliest start.
    pub delay: f64,
    /// Set when the task moved away from its requested role.
    pub reassigned_from: Option<String>,
}

/// Which alternate to prefer when several are feasible.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum AlternatePreference {
    /// Earliest finish, then lowest cost.
    #[default]
    Speed,
    /// Highest cost rate (senior/specialist), then earliest finish.
    Quality,
}

pub struct Leveler<'a> {
    config: &'a LevelingConfig,
    preference: AlternatePreference,
    verbosity: u8,
}

impl<'a> Leveler<'a> {
    pub fn new(config: &'a LevelingConfig, preference: AlternatePreference, verbosity: u8) -> Self {
        Self {
            config,
            preference,
            verbosity,
        }
    }

    /// Find a placement for `request`, or report exhaustion.
    pub fn level(
        &self,
        pool: &ResourcePool,
        request: &LevelRequest<'_>,
    ) -> Result<Placement, LevelingError> {
        let mut iterations = 0usize;
        let exhausted = |iterations| LevelingError::Exhausted {
            task_id: request.task_id.to_string(),
            resource_id: request.resource_id.to_string(),
            iterations,
        };

        let Some(home) = pool.get(request.resource_id) else {
            // Untracked roles never overload.
            return Ok(Placement {
                resource_id: request.resource_id.to_string(),
                start: request.earliest_start,
                delay: 0.0,
                reassigned_from: None,
            });
        };

        let window = if request.allow_delay {
            request.slack.max(0.0)
        } else {
            0.0
        };

        match self.earliest_fit(home, request, window, &mut iterations) {
            Probe::Found(start) => {
                let delay = start - request.earliest_start;
                if delay > 0.0 {
                    log_changes!(
                        self.verbosity,
                        task_id = request.task_id,
                        resource = request.resource_id,
                        delay,
                        "leveling delayed task within slack"
                    );
                }
                return Ok(Placement {
                    resource_id: request.resource_id.to_string(),
                    start,
                    delay,
                    reassigned_from: None,
                });
            }
            Probe::OutOfBudget => return Err(exhausted(iterations)),
            Probe::NotFound => {}
        }

        let mut best: Option<(&PoolEntry, f64)> = None;
        for alternate in pool.alternates(request.resource_id, request.specializations) {
            match self.earliest_fit(alternate, request, window, &mut iterations) {
                Probe::Found(start) => {
                    log_checks!(
                        self.verbosity,
                        task_id = request.task_id,
                        alternate = alternate.resource_id(),
                        start,
                        "alternate resource feasible"
                    );
                    if best.map_or(true, |(current, s)| self.prefer(alternate, start, current, s)) {
                        best = Some((alternate, start));
                    }
                }
                Probe::OutOfBudget => break,
                Probe::NotFound => {}
            }
        }

        match best {
            Some((entry, start)) => {
                log_changes!(
                    self.verbosity,
                    task_id = request.task_id,
                    from = request.resource_id,
                    to = entry.resource_id(),
                    "leveling reassigned task"
                );
                Ok(Placement {
                    resource_id: entry.resource_id().to_string(),
                    start,
                    delay: start - request.earliest_start,
                    reassigned_from: Some(request.resource_id.to_string()),
                })
            }
            None => Err(exhausted(iterations)),
        }
    }

    fn earliest_fit(
        &self,
        entry: &PoolEntry,
        request: &LevelRequest<'_>,
        window: f64,
        iterations: &mut usize,
    ) -> Probe {
        let from = request.earliest_start;
        let step = self.config.time_step_hours;
        for candidate in entry.schedule.candidate_starts(from, from + window) {
            // Delays are whole steps past the earliest start.
            let start = if step > 0.0 && candidate > from {
                from + ((candidate - from) / step).ceil() * step
            } else {
                candidate
            };
            if start > from + window {
                break;
            }
            if *iterations >= self.config.max_iterations {
                return Probe::OutOfBudget;
            }
            *iterations += 1;
            if entry.schedule.fits(start, request.duration, entry.limit) {
                return Probe::Found(start);
            }
        }
        Probe::NotFound
    }

    fn prefer(&self, a: &PoolEntry, a_start: f64, b: &PoolEntry, b_start: f64) -> bool {
        let by_finish = a_start.total_cmp(&b_start);
        let by_cost = a.capacity.cost_per_hour.total_cmp(&b.capacity.cost_per_hour);
        let ordering = match self.preference {
            AlternatePreference::Quality => by_cost.reverse().then(by_finish),
            AlternatePreference::Speed => by_finish.then(by_cost),
        };
        ordering.then_with(|| a.resource_id().cmp(b.resource_id())).is_lt()
    }
}

enum Probe {
    Found(f64),
    NotFound,
    OutOfBudget,
}
