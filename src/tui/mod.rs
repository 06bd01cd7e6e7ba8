//! Terminal User Interface module
//!
//! Provides:
//! - The run state machine (`App`) and its message/command protocol
//! - Live scrollback of finished packages with a progress footer
//! - Keyboard controls for abort, scrolling and filter cycling

mod app;
mod commands;
mod events;
mod ui;
mod widgets;

pub use app::*;
pub use commands::*;
pub use events::*;
pub use ui::*;
pub use widgets::*;

use anyhow::Result;
use crossterm::{
    event::{Event, EventStream},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use futures::StreamExt;
use ratatui::prelude::*;
use std::io;
use std::time::Duration;
use tokio::sync::mpsc;

/// Spinner and progress animation rate
pub const TICK_RATE: Duration = Duration::from_millis(100);

/// Run the interactive view until the run ends and the grace period passes
pub async fn run_tui(mut app: App) -> Result<App> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result.map(|_| app)
}

/// Main application loop
async fn run_app<B: Backend>(terminal: &mut Terminal<B>, app: &mut App) -> Result<()> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut events = EventStream::new();
    let mut ticker = tokio::time::interval(TICK_RATE);
    let mut input_open = true;

    app.resize(terminal.size()?.height);
    for command in app.init() {
        dispatch(command, &tx);
    }

    while !app.should_quit() {
        terminal.draw(|f| ui::draw(f, app))?;

        let msg = tokio::select! {
            Some(msg) = rx.recv() => msg,
            maybe_event = events.next(), if input_open => match maybe_event {
                Some(Ok(Event::Key(key))) => match key_action(key) {
                    Some(action) => Msg::Key(action),
                    None => continue,
                },
                Some(Ok(Event::Resize(_, height))) => Msg::Resize(height),
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(e.into()),
                None => {
                    input_open = false;
                    continue;
                }
            },
            _ = ticker.tick() => Msg::Tick,
        };

        for command in app.update(msg) {
            dispatch(command, &tx);
        }
    }

    // Last frame with the final state
    terminal.draw(|f| ui::draw(f, app))?;
    Ok(())
}
