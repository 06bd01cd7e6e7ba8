//! Progress estimation against an uncertain total
//!
//! A seed estimate (typically the test count of the previous run) is shown
//! until the discovered count can replace it without the displayed fraction
//! jumping backwards noticeably.

use tracing::debug;

/// Share of the seed that must complete before switching to the actual count
const SWITCH_RATIO: f64 = 0.9;

#[derive(Debug, Clone, Default)]
pub struct ProgressEstimator {
    seed: Option<usize>,
    actual: usize,
    completed: usize,
    using_estimate: bool,
    finished: bool,
}

impl ProgressEstimator {
    pub fn new(seed: Option<usize>) -> Self {
        let seed = seed.filter(|&s| s > 0);
        Self {
            seed,
            using_estimate: seed.is_some(),
            ..Self::default()
        }
    }

    /// A test or subtest received a run event
    pub fn record_run(&mut self) {
        self.actual += 1;
        self.maybe_switch();
    }

    /// A test or subtest received a terminal event
    pub fn record_completed(&mut self) {
        self.completed += 1;
        self.maybe_switch();
    }

    fn maybe_switch(&mut self) {
        let Some(seed) = self.seed else { return };
        if !self.using_estimate {
            return;
        }
        if self.actual > seed || self.completed as f64 > seed as f64 * SWITCH_RATIO {
            debug!(seed, actual = self.actual, completed = self.completed, "switching to discovered test count");
            self.using_estimate = false;
        }
    }

    /// Force the displayed fraction to 100%
    pub fn finish(&mut self) {
        self.finished = true;
    }

    pub fn using_estimate(&self) -> bool {
        self.using_estimate
    }

    pub fn actual(&self) -> usize {
        self.actual
    }

    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Total shown to the user; `None` while still discovering
    pub fn total(&self) -> Option<usize> {
        if self.using_estimate {
            return self.seed;
        }
        (self.actual > 0).then_some(self.actual)
    }

    pub fn fraction(&self) -> f64 {
        if self.finished {
            return 1.0;
        }
        match self.total() {
            Some(total) if total > 0 => (self.completed as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }

    pub fn label(&self) -> String {
        match self.total() {
            None => "discovering…".to_string(),
            Some(total) if self.using_estimate => format!("{}/~{}", self.completed, total),
            Some(total) => format!("{}/{}", self.completed, total),
        }
    }
}
