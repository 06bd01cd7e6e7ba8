//! TUI rendering

use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        Block, Borders, Gauge, Paragraph,
    },
};

use super::app::{App, Phase};
use super::widgets::OutputView;

/// Rows taken by borders and the footer
pub const CHROME_HEIGHT: u16 = 5;

const SPINNER_FRAMES: [&str; super::app::SPINNER_FRAME_COUNT] =
    ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];

/// Visible scrollback rows for a terminal of this height
pub fn output_height(terminal_height: u16) -> usize {
    terminal_height.saturating_sub(CHROME_HEIGHT) as usize
}

/// Draw the entire UI
pub fn draw(frame: &mut Frame, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(3),    // Scrollback
            Constraint::Length(3), // Progress
        ])
        .split(frame.size());

    draw_output(frame, app, chunks[0]);
    draw_footer(frame, app, chunks[1]);
}

fn draw_output(frame: &mut Frame, app: &App, area: Rect) {
    let title = format!(
        " teststream │ filter: {} │ verbosity: {} ",
        app.formatter.filter,
        app.formatter.verbosity.label()
    );
    let hints = Title::from(" [q]uit [Tab]filter [v]erbosity [↑↓/PgUp/PgDn]scroll [G]follow ")
        .position(Position::Bottom);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(title)
        .title(hints);

    if app.scrollback.is_empty() {
        let inner = block.inner(area);
        frame.render_widget(block, area);
        let waiting = Paragraph::new("Waiting for the first package to finish...")
            .style(Style::default().fg(Color::DarkGray));
        frame.render_widget(waiting, inner);
        return;
    }

    let view = OutputView::new(&app.scrollback, app.state.viewport.offset).block(block);
    frame.render_widget(view, area);
}

fn draw_footer(frame: &mut Frame, app: &App, area: Rect) {
    let state = &app.state;

    let status = match app.phase {
        Phase::Completed => "✓ Done".to_string(),
        Phase::Aborted => "✗ Aborted".to_string(),
        _ => SPINNER_FRAMES[app.spinner_frame % SPINNER_FRAMES.len()].to_string(),
    };

    let mut label = format!(
        "{} {} │ ✓ {} ✗ {} ⊘ {}",
        status,
        state.progress.label(),
        state.passed,
        state.failed,
        state.skipped
    );
    if !state.done {
        if let Some(test) = &state.current_test {
            label.push_str(&format!(" │ {}", test));
        }
    }

    let color = if state.failed > 0 { Color::Red } else { Color::Green };
    let gauge = Gauge::default()
        .block(Block::default().borders(Borders::ALL))
        .gauge_style(Style::default().fg(color).bg(Color::DarkGray))
        .ratio(app.progress())
        .label(label);

    frame.render_widget(gauge, area);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::Formatter;
    use crate::subprocess::{CommandSpec, LineReader};
    use crate::tui::app::AppOptions;
    use crate::tui::commands::Msg;
    use ratatui::backend::TestBackend;
    use std::path::PathBuf;
    use std::time::Duration;

    fn screen(app: &App, width: u16, height: u16) -> String {
        let mut terminal = Terminal::new(TestBackend::new(width, height)).unwrap();
        terminal.draw(|f| draw(f, app)).unwrap();
        let buffer = terminal.backend().buffer();
        let mut text = String::new();
        for y in 0..height {
            for x in 0..width {
                text.push_str(buffer.get(x, y).symbol());
            }
            text.push('\n');
        }
        text
    }

    fn app() -> App {
        let mut app = App::new(AppOptions {
            command: CommandSpec::new("unused", vec![]),
            replay_path: PathBuf::from("unused.json"),
            cover_profile: None,
            seed_estimate: Some(40),
            formatter: Formatter::default(),
            alert: false,
            grace_period: Duration::ZERO,
        });
        app.init();
        app
    }

    fn line(app: &mut App, record: &str) {
        app.update(Msg::Line {
            line: record.to_string(),
            reader: LineReader::new(&b""[..]),
        });
    }

    #[test]
    fn test_output_height() {
        assert_eq!(output_height(24), 19);
        assert_eq!(output_height(2), 0);
    }

    #[test]
    fn test_draw_waiting_frame() {
        let app = app();
        let text = screen(&app, 80, 10);
        assert!(text.contains("filter: all"));
        assert!(text.contains("Waiting for the first package"));
        assert!(text.contains("0/~40"));
    }

    #[test]
    fn test_draw_flushed_package() {
        let mut app = app();
        line(&mut app, r#"{"Action":"run","Package":"example.com/pkg","Test":"TestVisible"}"#);
        line(&mut app, r#"{"Action":"pass","Package":"example.com/pkg","Test":"TestVisible"}"#);
        line(&mut app, r#"{"Action":"pass","Package":"example.com/pkg"}"#);
        app.resize(20);

        let text = screen(&app, 80, 20);
        assert!(text.contains("▶ example.com/pkg"));
        assert!(text.contains("✓ TestVisible"));
        assert!(text.contains("✓ 1 ✗ 0 ⊘ 0"));
    }

    #[test]
    fn test_draw_completed_frame() {
        let mut app = app();
        app.update(Msg::StreamEnded);
        let text = screen(&app, 80, 10);
        assert!(text.contains("✓ Done"));
    }
}
