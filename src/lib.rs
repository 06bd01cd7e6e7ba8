//! teststream - streaming test runner
//!
//! A library for running `go test -json` style event streams with:
//! - Incremental aggregation into a package/test/subtest result tree
//! - Progress estimation against an uncertain total
//! - A raw replay file of every line received
//! - Terminal UI with scrollback, filters and a progress footer
//! - Headless stream mode for pipes and CI logs

pub mod config;
pub mod coverage;
pub mod display;
pub mod error;
pub mod event;
pub mod headless;
pub mod logging;
pub mod processor;
pub mod progress;
pub mod replay;
pub mod state;
pub mod subprocess;
pub mod test_model;
pub mod tui;

pub use config::Config;
pub use display::{Formatter, RunSummary};
pub use error::RunError;
pub use event::{Action, Event};
pub use state::RunState;
pub use subprocess::CommandSpec;
pub use test_model::{FilterMode, PackageResult, TestResult, TestStatus, Verbosity};
