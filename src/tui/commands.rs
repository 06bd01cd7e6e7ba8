//! Messages and commands of the run loop
//!
//! The loop handles one `Msg` at a time. Anything that blocks is expressed
//! as a `Command`, executed by a one-shot task whose result comes back as
//! a `Msg` on the same queue.

use std::io::Write;
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tracing::warn;

use super::events::KeyAction;
use crate::error::RunError;
use crate::replay::ReplayFile;
use crate::subprocess::{CommandSpec, ExitWaiter, LineReader, Subprocess};

/// Input to `App::update`
#[derive(Debug)]
pub enum Msg {
    Started {
        process: Subprocess,
        reader: LineReader,
    },
    StartFailed(RunError),
    /// One line, already persisted as raw bytes, with the reader handed back
    Line {
        line: String,
        reader: LineReader,
    },
    StreamEnded,
    ReadFailed(RunError),
    Exited(i32),
    Key(KeyAction),
    /// New terminal height
    Resize(u16),
    Tick,
    Quit,
}

/// Side effects requested by `App::update`
#[derive(Debug)]
pub enum Command {
    Start(CommandSpec),
    /// Read exactly one line; persist it before posting it back
    ReadLine {
        reader: LineReader,
        replay: Option<ReplayFile>,
    },
    AwaitExit(ExitWaiter),
    Bell,
    QuitAfter(Duration),
}

/// Execute a command. Results are posted to `tx`.
pub fn dispatch(command: Command, tx: &UnboundedSender<Msg>) {
    let tx = tx.clone();
    match command {
        Command::Start(spec) => {
            tokio::spawn(async move {
                let msg = match Subprocess::spawn(&spec) {
                    Ok((process, reader)) => Msg::Started { process, reader },
                    Err(e) => Msg::StartFailed(e),
                };
                let _ = tx.send(msg);
            });
        }
        Command::ReadLine { mut reader, replay } => {
            tokio::spawn(async move {
                let msg = match reader.next_line().await {
                    Ok(Some(raw)) => {
                        if let Some(replay) = &replay {
                            if let Err(e) = replay.write_line(&raw) {
                                warn!(error = %e, "failed to write replay line");
                            }
                        }
                        let line = String::from_utf8_lossy(&raw).into_owned();
                        Msg::Line { line, reader }
                    }
                    Ok(None) => Msg::StreamEnded,
                    Err(e) => Msg::ReadFailed(e),
                };
                let _ = tx.send(msg);
            });
        }
        Command::AwaitExit(waiter) => {
            tokio::spawn(async move {
                let code = waiter.wait().await;
                let _ = tx.send(Msg::Exited(code));
            });
        }
        Command::Bell => {
            let mut stderr = std::io::stderr();
            let _ = stderr.write_all(b"\x07");
            let _ = stderr.flush();
        }
        Command::QuitAfter(delay) => {
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(Msg::Quit);
            });
        }
    }
}
