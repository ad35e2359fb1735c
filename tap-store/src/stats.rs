//! Connection-manager metrics.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};

/// One periodic sample of manager state.
#[derive(Debug, Clone)]
pub struct StatsSample {
    pub at: DateTime<Utc>,
    pub open_connections: usize,
}

/// Snapshot returned by `ConnectionManager::stats`.
#[derive(Debug, Clone)]
pub struct ManagerStats {
    /// Connections currently registered
    pub open_connections: usize,
    /// Connections opened since the manager was created
    pub total_opened: u64,
    /// Connections closed by cleanup since the manager was created
    pub total_closed: u64,
    /// Recent periodic samples, oldest first
    pub history: Vec<StatsSample>,
}

/// Bounded ring of recent samples; the oldest sample falls off once the
/// capacity is reached.
#[derive(Debug)]
pub(crate) struct SampleRing {
    capacity: usize,
    samples: VecDeque<StatsSample>,
}

impl SampleRing {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            samples: VecDeque::new(),
        }
    }

    pub(crate) fn push(&mut self, sample: StatsSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    pub(crate) fn snapshot(&self) -> Vec<StatsSample> {
        self.samples.iter().cloned().collect()
    }
}
