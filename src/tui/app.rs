//! Run view application state
//!
//! `App::update` is the single place where run state changes. It consumes
//! one message and returns the commands to execute next.

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use ratatui::text::Line;
use tracing::{debug, error, info, warn};

use super::commands::{Command, Msg};
use super::events::KeyAction;
use crate::coverage;
use crate::display::{Formatter, RunSummary};
use crate::error::RunError;
use crate::event::parse_line;
use crate::processor::{process_event, reconcile};
use crate::replay::ReplayFile;
use crate::state::RunState;
use crate::subprocess::{
    CommandSpec, LineReader, Subprocess, EXIT_FAILURE, EXIT_INTERRUPTED, EXIT_SUCCESS,
};

/// Number of spinner frames the footer cycles through
pub const SPINNER_FRAME_COUNT: usize = 10;

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running,
    Completed,
    Aborted,
}

/// Inputs for a run
#[derive(Debug, Clone)]
pub struct AppOptions {
    pub command: CommandSpec,
    pub replay_path: PathBuf,
    pub cover_profile: Option<PathBuf>,
    pub seed_estimate: Option<usize>,
    pub formatter: Formatter,
    /// Ring the bell on completion
    pub alert: bool,
    /// Delay between completion and quitting
    pub grace_period: Duration,
}

/// Run view application state
pub struct App {
    /// Counters, result store and external handles
    pub state: RunState,
    /// Active filter and verbosity
    pub formatter: Formatter,
    pub phase: Phase,
    /// Rendered blocks of every flushed package
    pub scrollback: Vec<Line<'static>>,
    pub spinner_frame: usize,
    /// Fatal error that ended the run
    pub error: Option<RunError>,
    /// Taken when the start command is issued
    command: Option<CommandSpec>,
    replay_path: PathBuf,
    cover_profile: Option<PathBuf>,
    alert: bool,
    grace_period: Duration,
    /// Flushed packages in display order
    flushed: Vec<String>,
    flushed_set: HashSet<String>,
    /// Scrollback lines already handed out by `take_new_lines`
    printed: usize,
    quit: bool,
}

impl App {
    pub fn new(options: AppOptions) -> Self {
        Self {
            state: RunState::new(options.seed_estimate),
            formatter: options.formatter,
            phase: Phase::Initializing,
            scrollback: Vec::new(),
            spinner_frame: 0,
            error: None,
            command: Some(options.command),
            replay_path: options.replay_path,
            cover_profile: options.cover_profile,
            alert: options.alert,
            grace_period: options.grace_period,
            flushed: Vec::new(),
            flushed_set: HashSet::new(),
            printed: 0,
            quit: false,
        }
    }

    /// Commands that start the run
    pub fn init(&mut self) -> Vec<Command> {
        self.phase = Phase::Running;
        match self.command.take() {
            Some(command) => vec![Command::Start(command)],
            None => Vec::new(),
        }
    }

    pub fn should_quit(&self) -> bool {
        self.quit
    }

    pub fn is_done(&self) -> bool {
        self.state.done
    }

    /// Handle one message
    pub fn update(&mut self, msg: Msg) -> Vec<Command> {
        match msg {
            Msg::Started { process, reader } => self.on_started(process, reader),
            Msg::StartFailed(e) => self.fail(e),
            Msg::Line { line, reader } => self.on_line(&line, reader),
            Msg::StreamEnded => self.on_stream_end(),
            Msg::ReadFailed(e) => {
                warn!(error = %e, "stream read failed, treating as end of stream");
                self.on_stream_end()
            }
            Msg::Exited(code) => self.complete(code),
            Msg::Key(action) => self.on_key(action),
            Msg::Resize(height) => {
                self.resize(height);
                Vec::new()
            }
            Msg::Tick => {
                if !self.state.done {
                    self.spinner_frame = (self.spinner_frame + 1) % SPINNER_FRAME_COUNT;
                }
                Vec::new()
            }
            Msg::Quit => {
                self.quit = true;
                Vec::new()
            }
        }
    }

    fn on_started(&mut self, process: Subprocess, reader: LineReader) -> Vec<Command> {
        if self.phase != Phase::Running {
            // Aborted before the child came up
            process.kill();
            return Vec::new();
        }

        debug!(pid = ?process.pid(), command = process.command(), "test process started");
        self.state.process = Some(process);

        match ReplayFile::create(&self.replay_path) {
            Ok(replay) => self.state.replay = Some(replay),
            Err(e) => return self.fail(e),
        }

        self.state.reader = Some(reader);
        self.next_read()
    }

    /// Issue the single in-flight read
    fn next_read(&mut self) -> Vec<Command> {
        match self.state.reader.take() {
            Some(reader) => vec![Command::ReadLine {
                reader,
                replay: self.state.replay.clone(),
            }],
            None => Vec::new(),
        }
    }

    fn on_line(&mut self, line: &str, reader: LineReader) -> Vec<Command> {
        if self.phase != Phase::Running {
            return Vec::new();
        }

        if let Some(event) = parse_line(line) {
            process_event(&mut self.state, &event);
            self.flush_finished();
        }

        self.state.reader = Some(reader);
        self.next_read()
    }

    fn on_stream_end(&mut self) -> Vec<Command> {
        if self.phase != Phase::Running {
            return Vec::new();
        }
        self.state.reader = None;

        match self.state.process.as_mut().and_then(|p| p.take_exit()) {
            Some(waiter) => vec![Command::AwaitExit(waiter)],
            None => self.complete(EXIT_SUCCESS),
        }
    }

    fn complete(&mut self, child_code: i32) -> Vec<Command> {
        if self.phase != Phase::Running {
            return Vec::new();
        }

        let reconciled = reconcile(&mut self.state);
        if !reconciled.is_empty() {
            debug!(packages = ?reconciled, "reconciled unfinished packages");
        }

        if self.merge_coverage() {
            self.rerender();
        }
        self.flush_finished();

        // Recorded failures win over the child's own status
        let exit_code = if self.state.failed > 0 {
            EXIT_FAILURE
        } else {
            child_code
        };
        self.state.exit_code = Some(exit_code);
        self.state.close_replay();
        self.state.progress.finish();
        self.state.finished = Some(Instant::now());
        self.state.done = true;
        self.phase = Phase::Completed;

        info!(
            passed = self.state.passed,
            failed = self.state.failed,
            skipped = self.state.skipped,
            child_code,
            exit_code,
            "run completed"
        );

        let mut commands = Vec::new();
        if self.alert {
            commands.push(Command::Bell);
        }
        commands.push(Command::QuitAfter(self.grace_period));
        commands
    }

    fn merge_coverage(&mut self) -> bool {
        let Some(path) = self.cover_profile.as_ref().filter(|p| p.exists()) else {
            return false;
        };
        match coverage::load(path) {
            Ok(report) => coverage::merge_into(&report, &mut self.state.store) > 0,
            Err(e) => {
                warn!(error = %e, "coverage report unavailable");
                false
            }
        }
    }

    /// Kill the child, release the replay file and quit now
    pub fn abort(&mut self) -> Vec<Command> {
        if self.phase == Phase::Aborted {
            return Vec::new();
        }
        info!("run aborted by user");

        self.state.aborted = true;
        self.state.release();
        self.state.exit_code = Some(EXIT_INTERRUPTED);
        self.state.finished = Some(Instant::now());
        self.state.done = true;
        self.phase = Phase::Aborted;
        self.quit = true;
        Vec::new()
    }

    fn fail(&mut self, e: RunError) -> Vec<Command> {
        error!(error = %e, "run failed");
        self.state.release();
        self.state.finished = Some(Instant::now());
        self.state.done = true;
        self.phase = Phase::Aborted;
        self.error = Some(e);
        self.quit = true;
        Vec::new()
    }

    fn on_key(&mut self, action: KeyAction) -> Vec<Command> {
        match action {
            KeyAction::Abort if self.phase == Phase::Completed => {
                self.quit = true;
                return Vec::new();
            }
            KeyAction::Abort => return self.abort(),
            KeyAction::CycleFilter => {
                self.formatter.filter = self.formatter.filter.cycle_next();
                self.rerender();
                return Vec::new();
            }
            KeyAction::CycleVerbosity => {
                self.formatter.verbosity = self.formatter.verbosity.cycle_next();
                self.rerender();
                return Vec::new();
            }
            _ => {}
        }

        let content_len = self.scrollback.len();
        let viewport = &mut self.state.viewport;
        let page = viewport.height.max(1);
        match action {
            KeyAction::ScrollUp => viewport.scroll_up(1),
            KeyAction::ScrollDown => viewport.scroll_down(1, content_len),
            KeyAction::PageUp => viewport.scroll_up(page),
            KeyAction::PageDown => viewport.scroll_down(page, content_len),
            KeyAction::Top => viewport.scroll_to_top(),
            KeyAction::Bottom => viewport.scroll_to_bottom(content_len),
            _ => {}
        }
        Vec::new()
    }

    /// Set the viewport height from the terminal height
    pub fn resize(&mut self, terminal_height: u16) {
        self.state.viewport.height = super::ui::output_height(terminal_height);
        self.state.viewport.clamp(self.scrollback.len());
    }

    /// Render every package that became terminal and was not shown yet
    fn flush_finished(&mut self) {
        let ready: Vec<String> = self
            .state
            .store
            .ordered_packages()
            .filter(|p| p.end_time.is_some() && !self.flushed_set.contains(&p.name))
            .map(|p| p.name.clone())
            .collect();

        for name in ready {
            if let Some(pkg) = self.state.store.package(&name) {
                self.scrollback.extend(self.formatter.render_package(pkg));
                self.scrollback.push(Line::default());
            }
            self.flushed_set.insert(name.clone());
            self.flushed.push(name);
        }

        self.state.viewport.clamp(self.scrollback.len());
    }

    /// Rebuild the scrollback under the current formatter
    fn rerender(&mut self) {
        self.scrollback.clear();
        for name in &self.flushed {
            if let Some(pkg) = self.state.store.package(name) {
                self.scrollback.extend(self.formatter.render_package(pkg));
                self.scrollback.push(Line::default());
            }
        }
        self.printed = self.scrollback.len();
        self.state.viewport.clamp(self.scrollback.len());
    }

    /// Scrollback lines appended since the last call
    pub fn take_new_lines(&mut self) -> Vec<Line<'static>> {
        let start = self.printed.min(self.scrollback.len());
        self.printed = self.scrollback.len();
        self.scrollback[start..].to_vec()
    }

    /// Gauge ratio in 0.0..=1.0
    pub fn progress(&self) -> f64 {
        self.state.progress.fraction().clamp(0.0, 1.0)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary::from_state(&self.state)
    }

    /// Final summary, or the fatal error that ended the run
    pub fn finish(mut self) -> Result<RunSummary, RunError> {
        self.state.release();
        match self.error.take() {
            Some(e) => Err(e),
            None => Ok(self.summary()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::display::line_text;
    use crate::test_model::{FilterMode, Verbosity};
    use tokio::sync::mpsc;

    fn options(command: CommandSpec, replay_path: PathBuf) -> AppOptions {
        AppOptions {
            command,
            replay_path,
            cover_profile: None,
            seed_estimate: None,
            formatter: Formatter::default(),
            alert: false,
            grace_period: Duration::ZERO,
        }
    }

    fn offline_app() -> App {
        let mut app = App::new(options(
            CommandSpec::new("unused", vec![]),
            PathBuf::from("unused.json"),
        ));
        app.init();
        app
    }

    fn feed(app: &mut App, lines: &[&str]) {
        for line in lines {
            let commands = app.update(Msg::Line {
                line: line.to_string(),
                reader: LineReader::new(&b""[..]),
            });
            assert!(matches!(commands.as_slice(), [Command::ReadLine { .. }]));
        }
    }

    fn rendered(app: &App) -> String {
        app.scrollback
            .iter()
            .map(line_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    const SCENARIO: &[&str] = &[
        r#"{"Action":"start","Package":"example.com/a"}"#,
        r#"{"Action":"start","Package":"example.com/b"}"#,
        r#"{"Action":"run","Package":"example.com/a","Test":"TestAlpha"}"#,
        r#"{"Action":"run","Package":"example.com/b","Test":"TestTable/one"}"#,
        r#"{"Action":"run","Package":"example.com/b","Test":"TestTable"}"#,
        r#"{"Action":"pass","Package":"example.com/a","Test":"TestAlpha","Elapsed":0.01}"#,
        r#"{"Action":"run","Package":"example.com/a","Test":"TestBeta"}"#,
        r#"{"Action":"pass","Package":"example.com/a","Test":"TestBeta","Elapsed":0.02}"#,
        r#"{"Action":"pass","Package":"example.com/a","Elapsed":0.1}"#,
        r#"{"Action":"run","Package":"example.com/b","Test":"TestTable/two"}"#,
        r#"{"Action":"run","Package":"example.com/b","Test":"TestTable/three"}"#,
        r#"{"Action":"pass","Package":"example.com/b","Test":"TestTable/one"}"#,
        r#"{"Action":"output","Package":"example.com/b","Test":"TestTable/three","Output":"    table_test.go:20: boom\n"}"#,
        r#"{"Action":"fail","Package":"example.com/b","Test":"TestTable/three"}"#,
        "# example.com/b build noise that is not a record",
        r#"{"Action":"pass","Package":"example.com/b","Test":"TestTable/two"}"#,
        r#"{"Action":"fail","Package":"example.com/b","Elapsed":0.3}"#,
        r#"{"Action":"output","Package":"example.com/c","Output":"?   \texample.com/c\t[no test files]\n"}"#,
        r#"{"Action":"skip","Package":"example.com/c"}"#,
    ];

    #[test]
    fn test_end_to_end_scenario() {
        let mut app = offline_app();
        feed(&mut app, SCENARIO);

        assert_eq!(app.state.passed, 4);
        assert_eq!(app.state.failed, 1);
        assert_eq!(app.state.skipped, 0);

        let commands = app.update(Msg::StreamEnded);
        assert!(matches!(commands.as_slice(), [Command::QuitAfter(_)]));
        assert_eq!(app.phase, Phase::Completed);
        assert_eq!(app.state.final_exit_code(), EXIT_FAILURE);
        assert_eq!(app.state.progress.fraction(), 1.0);

        let text = rendered(&app);
        for name in [
            "TestAlpha",
            "TestBeta",
            "TestTable ",
            "TestTable/one",
            "TestTable/two",
            "TestTable/three",
        ] {
            assert!(text.contains(name), "{} missing from:\n{}", name, text);
        }
        assert!(text.contains("No tests"));
        assert!(text.contains("table_test.go:20: boom"));

        // Packages appear in the order they finished
        let a = text.find("▶ example.com/a").unwrap();
        let b = text.find("▶ example.com/b").unwrap();
        let c = text.find("▶ example.com/c").unwrap();
        assert!(a < b && b < c);
    }

    #[test]
    fn test_child_exit_code_used_without_failures() {
        let mut app = offline_app();
        feed(
            &mut app,
            &[
                r#"{"Action":"run","Package":"p","Test":"TestOk"}"#,
                r#"{"Action":"pass","Package":"p","Test":"TestOk"}"#,
            ],
        );
        app.update(Msg::Exited(2));
        assert_eq!(app.state.final_exit_code(), 2);

        // Packages never finalized are flushed at completion
        assert!(rendered(&app).contains("▶ p"));
    }

    #[test]
    fn test_failures_override_child_success() {
        let mut app = offline_app();
        feed(
            &mut app,
            &[
                r#"{"Action":"run","Package":"p","Test":"TestBad"}"#,
                r#"{"Action":"fail","Package":"p","Test":"TestBad"}"#,
            ],
        );
        app.update(Msg::Exited(EXIT_SUCCESS));
        assert_eq!(app.state.final_exit_code(), EXIT_FAILURE);

        // Late messages after completion are ignored
        assert!(app.update(Msg::Exited(0)).is_empty());
        assert!(app
            .update(Msg::Line {
                line: r#"{"Action":"run","Package":"p","Test":"TestLate"}"#.to_string(),
                reader: LineReader::new(&b""[..]),
            })
            .is_empty());
        assert_eq!(app.state.progress.actual(), 1);
    }

    #[test]
    fn test_cycle_filter_rerenders() {
        let mut app = offline_app();
        feed(&mut app, SCENARIO);
        assert!(rendered(&app).contains("TestAlpha"));

        app.update(Msg::Key(KeyAction::CycleFilter));
        assert_eq!(app.formatter.filter, FilterMode::Failed);
        let text = rendered(&app);
        assert!(!text.contains("TestAlpha"));
        assert!(text.contains("TestTable/three"));

        app.update(Msg::Key(KeyAction::CycleVerbosity));
        assert_eq!(app.formatter.verbosity, Verbosity::WithOutput);
    }

    #[test]
    fn test_scroll_keys_are_clamped() {
        let mut app = offline_app();
        feed(&mut app, SCENARIO);
        app.resize(super::super::ui::CHROME_HEIGHT + 5);
        let len = app.scrollback.len();
        assert!(len > 5);

        app.update(Msg::Key(KeyAction::Top));
        assert_eq!(app.state.viewport.offset, 0);
        assert!(!app.state.viewport.follow);

        app.update(Msg::Key(KeyAction::PageDown));
        assert_eq!(app.state.viewport.offset, 5.min(len - 5));

        for _ in 0..100 {
            app.update(Msg::Key(KeyAction::ScrollDown));
        }
        assert_eq!(app.state.viewport.offset, len - 5);

        app.update(Msg::Key(KeyAction::ScrollUp));
        app.update(Msg::Key(KeyAction::Bottom));
        assert!(app.state.viewport.follow);
    }

    #[test]
    fn test_tick_stops_when_done() {
        let mut app = offline_app();
        app.update(Msg::Tick);
        assert_eq!(app.spinner_frame, 1);
        app.update(Msg::StreamEnded);
        app.update(Msg::Tick);
        assert_eq!(app.spinner_frame, 1);
    }

    #[test]
    fn test_take_new_lines() {
        let mut app = offline_app();
        feed(&mut app, &SCENARIO[..9]);
        let first = app.take_new_lines();
        assert!(first.iter().any(|l| line_text(l) == "▶ example.com/a"));
        assert!(app.take_new_lines().is_empty());
    }

    async fn next_msg(rx: &mut mpsc::UnboundedReceiver<Msg>) -> Msg {
        tokio::time::timeout(Duration::from_secs(10), rx.recv())
            .await
            .expect("message within timeout")
            .expect("channel open")
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_full_run_writes_replay() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stream.json");
        let replay = dir.path().join("replay").join("out.json");
        std::fs::write(&input, format!("{}\n", SCENARIO.join("\n"))).unwrap();

        let command = CommandSpec::new(
            "sh",
            vec!["-c".into(), format!("cat '{}'; exit 0", input.display())],
        );
        let mut app = App::new(options(command, replay.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        for command in app.init() {
            super::super::commands::dispatch(command, &tx);
        }
        while !app.should_quit() {
            let msg = next_msg(&mut rx).await;
            for command in app.update(msg) {
                super::super::commands::dispatch(command, &tx);
            }
        }

        assert_eq!(app.phase, Phase::Completed);
        assert!(app.state.replay.as_ref().unwrap().is_closed());
        assert_eq!(
            std::fs::read_to_string(&replay).unwrap(),
            std::fs::read_to_string(&input).unwrap()
        );

        let summary = app.finish().unwrap();
        assert_eq!((summary.passed, summary.failed), (4, 1));
        assert_eq!(summary.exit_code, EXIT_FAILURE);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_invalid_utf8_line_does_not_end_stream() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("stream.json");
        let replay = dir.path().join("out.json");

        let mut bytes = Vec::new();
        for line in [
            &br#"{"Action":"run","Package":"p","Test":"TestA"}"#[..],
            &b"diag \xff\xfe bytes"[..],
            &br#"{"Action":"pass","Package":"p","Test":"TestA"}"#[..],
            &br#"{"Action":"run","Package":"p","Test":"TestB"}"#[..],
            &br#"{"Action":"fail","Package":"p","Test":"TestB"}"#[..],
            &br#"{"Action":"fail","Package":"p"}"#[..],
        ] {
            bytes.extend_from_slice(line);
            bytes.push(b'\n');
        }
        std::fs::write(&input, &bytes).unwrap();

        let command = CommandSpec::new("cat", vec![input.display().to_string()]);
        let mut app = App::new(options(command, replay.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        for command in app.init() {
            super::super::commands::dispatch(command, &tx);
        }
        while !app.should_quit() {
            let msg = next_msg(&mut rx).await;
            for command in app.update(msg) {
                super::super::commands::dispatch(command, &tx);
            }
        }

        assert_eq!(app.phase, Phase::Completed);
        assert_eq!((app.state.passed, app.state.failed), (1, 1));
        assert_eq!(app.state.progress.actual(), 2);
        assert_eq!(app.state.final_exit_code(), EXIT_FAILURE);
        assert_eq!(std::fs::read(&replay).unwrap(), bytes);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_abort_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let replay = dir.path().join("out.json");
        let command = CommandSpec::new(
            "sh",
            vec![
                "-c".into(),
                r#"echo '{"Action":"run","Package":"p","Test":"TestSlow"}'; exec sleep 30"#.into(),
            ],
        );
        let mut app = App::new(options(command, replay.clone()));

        let (tx, mut rx) = mpsc::unbounded_channel();
        for command in app.init() {
            super::super::commands::dispatch(command, &tx);
        }

        // Run until the first record is processed; a second read is then pending
        loop {
            let msg = next_msg(&mut rx).await;
            let got_line = matches!(msg, Msg::Line { .. });
            for command in app.update(msg) {
                super::super::commands::dispatch(command, &tx);
            }
            if got_line {
                break;
            }
        }
        assert_eq!(app.state.progress.actual(), 1);

        assert!(app.update(Msg::Key(KeyAction::Abort)).is_empty());
        assert!(app.should_quit());
        assert_eq!(app.phase, Phase::Aborted);
        assert_eq!(app.state.final_exit_code(), EXIT_INTERRUPTED);

        let replay_handle = app.state.replay.clone().unwrap();
        assert!(replay_handle.is_closed());
        assert!(!replay_handle.close());

        // A second abort is a no-op
        assert!(app.update(Msg::Key(KeyAction::Abort)).is_empty());

        let process = app.state.process.as_mut().unwrap();
        assert!(process.kill_requested());
        let code = tokio::time::timeout(Duration::from_secs(5), process.take_exit().unwrap().wait())
            .await
            .unwrap();
        assert_eq!(code, EXIT_INTERRUPTED);

        assert_eq!(
            std::fs::read_to_string(&replay).unwrap(),
            "{\"Action\":\"run\",\"Package\":\"p\",\"Test\":\"TestSlow\"}\n"
        );
    }

    #[tokio::test]
    async fn test_launch_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let command = CommandSpec::new("definitely-not-a-real-binary-4242", vec![]);
        let mut app = App::new(options(command, dir.path().join("out.json")));

        let (tx, mut rx) = mpsc::unbounded_channel();
        for command in app.init() {
            super::super::commands::dispatch(command, &tx);
        }
        let msg = next_msg(&mut rx).await;
        assert!(matches!(msg, Msg::StartFailed(_)));
        app.update(msg);

        assert!(app.should_quit());
        assert!(matches!(app.finish(), Err(RunError::Launch { .. })));
    }
}
