//! Run-scoped state
//!
//! Counters, progress, viewport and the external resources of one run live
//! in a single `RunState` owned by the driving loop and lent to the event
//! processor and renderer.

use std::time::{Duration, Instant};

use tracing::debug;

use crate::progress::ProgressEstimator;
use crate::replay::ReplayFile;
use crate::subprocess::{LineReader, Subprocess, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS};
use crate::test_model::ResultStore;

/// Scroll position of the output viewport
#[derive(Debug, Clone)]
pub struct Viewport {
    pub offset: usize,
    pub height: usize,
    /// Stick to the bottom as new lines arrive
    pub follow: bool,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            offset: 0,
            height: 0,
            follow: true,
        }
    }
}

impl Viewport {
    pub fn max_offset(&self, content_len: usize) -> usize {
        content_len.saturating_sub(self.height)
    }

    pub fn scroll_up(&mut self, amount: usize) {
        self.offset = self.offset.saturating_sub(amount);
        self.follow = false;
    }

    pub fn scroll_down(&mut self, amount: usize, content_len: usize) {
        let max = self.max_offset(content_len);
        self.offset = (self.offset + amount).min(max);
        self.follow = self.offset == max;
    }

    pub fn scroll_to_top(&mut self) {
        self.offset = 0;
        self.follow = false;
    }

    pub fn scroll_to_bottom(&mut self, content_len: usize) {
        self.offset = self.max_offset(content_len);
        self.follow = true;
    }

    /// Re-clamp after content or size changed
    pub fn clamp(&mut self, content_len: usize) {
        let max = self.max_offset(content_len);
        if self.follow || self.offset > max {
            self.offset = max;
        }
    }
}

/// Everything that belongs to a single run
#[derive(Debug)]
pub struct RunState {
    pub store: ResultStore,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Terminal events seen (tests and subtests)
    pub completed: usize,
    pub progress: ProgressEstimator,
    /// Most recent test that received a run event
    pub current_test: Option<String>,
    pub viewport: Viewport,
    pub started: Instant,
    pub finished: Option<Instant>,
    pub done: bool,
    pub aborted: bool,
    pub exit_code: Option<i32>,
    pub process: Option<Subprocess>,
    pub reader: Option<LineReader>,
    pub replay: Option<ReplayFile>,
}

impl RunState {
    pub fn new(seed_estimate: Option<usize>) -> Self {
        Self {
            store: ResultStore::new(),
            passed: 0,
            failed: 0,
            skipped: 0,
            completed: 0,
            progress: ProgressEstimator::new(seed_estimate),
            current_test: None,
            viewport: Viewport::default(),
            started: Instant::now(),
            finished: None,
            done: false,
            aborted: false,
            exit_code: None,
            process: None,
            reader: None,
            replay: None,
        }
    }

    pub fn total_recorded(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn elapsed(&self) -> Duration {
        self.finished
            .unwrap_or_else(Instant::now)
            .duration_since(self.started)
    }

    /// Exit code surfaced to the caller
    pub fn final_exit_code(&self) -> i32 {
        if self.aborted {
            return EXIT_INTERRUPTED;
        }
        match self.exit_code {
            Some(code) => code,
            None if self.failed > 0 => EXIT_FAILURE,
            None => EXIT_SUCCESS,
        }
    }

    /// Kill the child and close the replay file. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(process) = self.process.as_ref() {
            process.kill();
        }
        self.reader = None;
        self.close_replay();
    }

    /// Close the replay file; only the first call has an effect
    pub fn close_replay(&mut self) -> bool {
        let closed = self.replay.as_ref().map(ReplayFile::close).unwrap_or(false);
        if closed {
            debug!("replay file released");
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_scroll_is_clamped() {
        let mut viewport = Viewport {
            height: 10,
            ..Viewport::default()
        };

        viewport.scroll_down(50, 25);
        assert_eq!(viewport.offset, 15);
        assert!(viewport.follow);

        viewport.scroll_up(4);
        assert_eq!(viewport.offset, 11);
        assert!(!viewport.follow);

        viewport.scroll_up(100);
        assert_eq!(viewport.offset, 0);

        viewport.scroll_to_bottom(25);
        assert_eq!(viewport.offset, 15);
        viewport.clamp(40);
        assert_eq!(viewport.offset, 30);
    }

    #[test]
    fn test_viewport_short_content() {
        let mut viewport = Viewport {
            height: 10,
            ..Viewport::default()
        };
        viewport.scroll_down(3, 4);
        assert_eq!(viewport.offset, 0);
    }

    #[test]
    fn test_final_exit_code() {
        let mut state = RunState::new(None);
        assert_eq!(state.final_exit_code(), EXIT_SUCCESS);

        state.failed = 1;
        assert_eq!(state.final_exit_code(), EXIT_FAILURE);

        state.aborted = true;
        assert_eq!(state.final_exit_code(), EXIT_INTERRUPTED);
    }

    #[test]
    fn test_release_twice() {
        let dir = tempfile::tempdir().unwrap();
        let mut state = RunState::new(None);
        state.replay = Some(ReplayFile::create(&dir.path().join("r.json")).unwrap());

        assert!(state.close_replay());
        state.release();
        assert!(!state.close_replay());
        assert!(state.replay.as_ref().unwrap().is_closed());
    }
}
