//! Headless stream mode
//!
//! Drives the same run state machine without a terminal UI: finished
//! package blocks are written to stderr as they are flushed and Ctrl-C
//! acts as the abort key.

use std::io::{self, Write};

use anyhow::Result;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::mpsc::{self, UnboundedSender};
use tracing::debug;

use crate::display::to_ansi;
use crate::tui::{dispatch, App, KeyAction, Msg};

/// One item per interrupt delivered to the process
pub type Interrupts = BoxStream<'static, ()>;

pub async fn run_headless(mut app: App) -> Result<App> {
    let mut stderr = io::stderr();
    drive(&mut app, &mut stderr, interrupts()?).await?;
    Ok(app)
}

/// SIGINT listener, registered once for the whole run
#[cfg(unix)]
pub fn interrupts() -> io::Result<Interrupts> {
    use tokio::signal::unix::{signal, SignalKind};

    let sigint = signal(SignalKind::interrupt())?;
    Ok(stream::unfold(sigint, |mut sigint| async move {
        sigint.recv().await.map(|()| ((), sigint))
    })
    .boxed())
}

#[cfg(not(unix))]
pub fn interrupts() -> io::Result<Interrupts> {
    let ctrl_c = tokio::signal::windows::ctrl_c()?;
    Ok(stream::unfold(ctrl_c, |mut ctrl_c| async move {
        ctrl_c.recv().await.map(|()| ((), ctrl_c))
    })
    .boxed())
}

/// Post every interrupt to the loop as an abort key
fn forward_interrupts(mut interrupts: Interrupts, tx: UnboundedSender<Msg>) {
    tokio::spawn(async move {
        while interrupts.next().await.is_some() {
            debug!("interrupt received");
            if tx.send(Msg::Key(KeyAction::Abort)).is_err() {
                break;
            }
        }
    });
}

/// Run the message loop, writing flushed blocks to `out`
pub async fn drive<W: Write>(app: &mut App, out: &mut W, interrupts: Interrupts) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    forward_interrupts(interrupts, tx.clone());

    for command in app.init() {
        dispatch(command, &tx);
    }

    while !app.should_quit() {
        let Some(msg) = rx.recv().await else {
            break;
        };

        for command in app.update(msg) {
            dispatch(command, &tx);
        }

        let lines = app.take_new_lines();
        if !lines.is_empty() {
            out.write_all(to_ansi(&lines).as_bytes())?;
            out.flush()?;
        }
    }

    Ok(())
}
