//! Error types for a test stream run
//!
//! Only transport failures (launch, missing pipe, replay file) abort a run.
//! Stream lines that fail to parse never become errors.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error("failed to start '{command}': {source}")]
    Launch {
        command: String,
        #[source]
        source: io::Error,
    },

    #[error("output pipe of '{0}' is unavailable")]
    PipeUnavailable(String),

    #[error("failed to create replay file {}: {source}", path.display())]
    ReplayOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to read from test process: {0}")]
    Read(#[source] io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to read coverage report {}: {source}", path.display())]
    Coverage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
