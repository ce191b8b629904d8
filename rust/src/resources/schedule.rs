//! Occupancy timeline for one resource role.
//!
//! Times are hours from the run anchor. Commitments are kept sorted by start
//! so overlap queries can stop at the first commitment past the window.

/// One task holding a slot on the resource over `[start, end)`.
#[derive(Clone, Debug, PartialEq)]
pub struct Commitment {
    pub task_id: String,
    pub start: f64,
    pub end: f64,
}

/// Commitments plus availability windows for a resource.
///
/// Invariants: `commitments` is sorted by start; `windows` is sorted and
/// non-overlapping. An empty window list means always available.
#[derive(Clone, Debug, Default)]
pub struct ResourceSchedule {
    pub resource_id: String,
    commitments: Vec<Commitment>,
    windows: Vec<(f64, f64)>,
}

impl ResourceSchedule {
    pub fn new(resource_id: impl Into<String>, windows: Vec<(f64, f64)>) -> Self {
        Self {
            resource_id: resource_id.into(),
            commitments: Vec::new(),
            windows: Self::merge_windows(windows),
        }
    }

    /// Merge overlapping or touching windows into a sorted, disjoint list.
    fn merge_windows(mut windows: Vec<(f64, f64)>) -> Vec<(f64, f64)> {
        windows.retain(|(from, to)| to > from);
        if windows.is_empty() {
            return Vec::new();
        }

        windows.sort_by(|a, b| a.0.total_cmp(&b.0));
        let mut merged: Vec<(f64, f64)> = Vec::with_capacity(windows.len());
        for (from, to) in windows {
            match merged.last_mut() {
                Some(last) if from <= last.1 => last.1 = last.1.max(to),
                _ => merged.push((from, to)),
            }
        }
        merged
    }

    pub fn commitments(&self) -> &[Commitment] {
        &self.commitments
    }

    pub fn windows(&self) -> &[(f64, f64)] {
        &self.windows
    }

    pub fn commit(&mut self, task_id: impl Into<String>, start: f64, end: f64) {
        let idx = self.commitments.partition_point(|c| c.start <= start);
        self.commitments.insert(
            idx,
            Commitment {
                task_id: task_id.into(),
                start,
                end,
            },
        );
    }

    /// Drop the commitment held by `task_id`, returning it.
    pub fn release(&mut self, task_id: &str) -> Option<Commitment> {
        let idx = self.commitments.iter().position(|c| c.task_id == task_id)?;
        Some(self.commitments.remove(idx))
    }

    /// Highest number of concurrent commitments anywhere in `[start, end)`.
    pub fn peak_load(&self, start: f64, end: f64) -> u32 {
        if end <= start {
            return self.load_at(start);
        }
        // Load only rises at commitment starts, so probing the window start
        // and every start inside the window finds the peak.
        let mut peak = self.load_at(start);
        for c in &self.commitments {
            if c.start >= end {
                break;
            }
            if c.start > start {
                peak = peak.max(self.load_at(c.start));
            }
        }
        peak
    }

    fn load_at(&self, t: f64) -> u32 {
        self.commitments
            .iter()
            .take_while(|c| c.start <= t)
            .filter(|c| c.end > t || (c.start == t && c.end == t))
            .count() as u32
    }

    /// True when `[start, end)` lies inside one availability window.
    pub fn within_windows(&self, start: f64, end: f64) -> bool {
        if self.windows.is_empty() {
            return true;
        }
        let idx = self.windows.partition_point(|(_, to)| *to < end);
        match self.windows.get(idx) {
            Some(&(from, to)) => from <= start && end <= to,
            None => false,
        }
    }

    /// True when one more commitment over `[start, start+duration)` stays
    /// within `limit` and inside the availability windows.
    pub fn fits(&self, start: f64, duration: f64, limit: u32) -> bool {
        let end = start + duration;
        self.within_windows(start, end) && self.peak_load(start, end) < limit
    }

    /// Candidate start times in `[from, until]` where the load can change:
    /// `from` itself, every commitment end and every window start, ascending.
    pub fn candidate_starts(&self, from: f64, until: f64) -> Vec<f64> {
        let mut points: Vec<f64> = std::iter::once(from)
            .chain(self.commitments.iter().map(|c| c.end))
            .chain(self.windows.iter().map(|w| w.0))
            .filter(|&t| t >= from && t <= until)
            .collect();
        points.sort_by(f64::total_cmp);
        points.dedup();
        points
    }

    /// Sum of committed hours.
    pub fn committed_hours(&self) -> f64 {
        self.commitments.iter().map(|c| c.end - c.start).sum()
    }

    /// Maximal intervals where the load exceeds `limit`, with the excess.
    ///
    /// Adjacent intervals with the same excess are merged.
    pub fn overallocated_periods(&self, limit: u32) -> Vec<(f64, f64, u32)> {
        let mut events: Vec<(f64, i32)> = Vec::with_capacity(self.commitments.len() * 2);
        for c in &self.commitments {
            if c.end > c.start {
                events.push((c.start, 1));
                events.push((c.end, -1));
            }
        }
        // Ends before starts at the same instant: [s, e) intervals touch.
        events.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut periods: Vec<(f64, f64, u32)> = Vec::new();
        let mut load: i32 = 0;
        let mut i = 0;
        while i < events.len() {
            let t = events[i].0;
            while i < events.len() && events[i].0 == t {
                load += events[i].1;
                i += 1;
            }
            let Some(&(next, _)) = events.get(i) else {
                break;
            };
            let excess = load - limit as i32;
            if excess > 0 && next > t {
                let excess = excess as u32;
                match periods.last_mut() {
                    Some(last) if last.1 == t && last.2 == excess => last.1 = next,
                    _ => periods.push((t, next, excess)),
                }
            }
        }
        periods
    }
}
