//! Result formatting
//!
//! Pure rendering of package results and the run summary into styled
//! `ratatui` lines. The interactive view draws the lines directly and the
//! headless mode converts them to ANSI text with `to_ansi`.

use std::time::Duration;

use colored::Colorize;
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};

use crate::state::RunState;
use crate::test_model::{FilterMode, PackageResult, TestResult, TestStatus, Verbosity};

/// Upper bound on dots in a subtest indicator
pub const MAX_DOTS: usize = 10;

const ZERO_COVERAGE: &str = "0.0%";
const TAB_WIDTH: &str = "    ";

fn pass_style() -> Style {
    Style::default().fg(Color::Green)
}

fn fail_style() -> Style {
    Style::default().fg(Color::Red)
}

fn dim_style() -> Style {
    Style::default().fg(Color::DarkGray)
}

/// Renders packages under the active view settings
#[derive(Debug, Clone, Default)]
pub struct Formatter {
    pub filter: FilterMode,
    pub verbosity: Verbosity,
    /// Test name pattern handed to the runner, if any
    pub name_filter: Option<String>,
}

impl Formatter {
    pub fn new(filter: FilterMode, verbosity: Verbosity, name_filter: Option<String>) -> Self {
        Self {
            filter,
            verbosity,
            name_filter: name_filter.filter(|f| !f.is_empty()),
        }
    }

    /// Render one package block
    pub fn render_package(&self, pkg: &PackageResult) -> Vec<Line<'static>> {
        let mut lines = vec![Line::from(vec![
            Span::raw("▶ "),
            Span::styled(
                pkg.name.clone(),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            ),
        ])];

        // Build or TestMain failure: nothing ran, show what the package printed
        if pkg.status == TestStatus::Failed && pkg.tests.is_empty() {
            lines.push(Line::default());
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(TestStatus::Failed.symbol(), fail_style()),
                Span::raw(" Package failed to run tests"),
            ]));
            for fragment in pkg.output.iter().filter(|l| !l.trim().is_empty()) {
                push_text(&mut lines, "    ", fragment, Style::default());
            }
            return lines;
        }

        // A skipped package reads as empty even if some tests reported
        if pkg.status == TestStatus::Skipped || pkg.no_test_files || pkg.tests.is_empty() {
            let message = if self.name_filter.is_some() {
                "No tests matching filter"
            } else {
                "No tests"
            };
            lines.push(Line::default());
            lines.push(Line::from(vec![
                Span::raw("  "),
                Span::styled(message, dim_style()),
            ]));
            return lines;
        }

        let visible: Vec<&TestResult> = pkg
            .ordered_tests()
            .filter(|t| t.status.is_terminal() && self.filter.admits(t.status))
            .collect();

        if !visible.is_empty() {
            lines.push(Line::default());
        }
        for test in &visible {
            self.render_test(&mut lines, pkg, test);
        }

        let (passed, failed, skipped) = pkg.counts();
        if passed + failed + skipped > 0 {
            if !visible.is_empty() {
                lines.push(Line::default());
            }
            lines.push(package_summary(pkg, passed, failed, skipped));
        }

        lines
    }

    fn render_test(&self, lines: &mut Vec<Line<'static>>, pkg: &PackageResult, test: &TestResult) {
        let indent = if test.is_subtest() { "    " } else { "  " };
        let mut spans = vec![
            Span::raw(indent),
            Span::styled(test.status.symbol(), Style::default().fg(test.status.color())),
            Span::raw(" "),
            Span::raw(test.name.clone()),
        ];

        if test.elapsed > 0.0 {
            spans.push(Span::styled(format!(" ({:.2}s)", test.elapsed), dim_style()));
        }

        if test.status == TestStatus::Skipped {
            if let Some(reason) = &test.skip_reason {
                spans.push(Span::styled(format!(" - {}", reason), dim_style()));
            }
        }

        if test.has_subtests() {
            if let Some(stats) = pkg.subtest_stats.get(&test.name) {
                let total = stats.total();
                if total > 0 {
                    let passed = stats.passed.len();
                    spans.push(Span::raw(" "));
                    spans.extend(subtest_dots(passed, total));
                    spans.push(Span::raw(format!(" {}% passed", passed * 100 / total)));
                }
            }
        }

        lines.push(Line::from(spans));

        if test.status == TestStatus::Failed && self.shows_failure_output() && !test.output.is_empty() {
            let body_indent = format!("{}  ", indent);
            lines.push(Line::default());
            for fragment in &test.output {
                let text = if self.verbosity.unescapes_output() {
                    unescape(fragment)
                } else {
                    fragment.clone()
                };
                push_text(lines, &body_indent, &text, Style::default());
            }
            lines.push(Line::default());
        }
    }

    /// Collapsed always shows failure output; minimal hides it otherwise
    fn shows_failure_output(&self) -> bool {
        self.filter == FilterMode::Collapsed || self.verbosity != Verbosity::Minimal
    }
}

/// Proportional pass/fail dots, capped at `MAX_DOTS`. Empty when nothing passed.
pub fn subtest_dots(passed: usize, total: usize) -> Vec<Span<'static>> {
    if total == 0 || passed == 0 {
        return Vec::new();
    }

    let (pass_dots, other_dots) = if total > MAX_DOTS {
        let scaled = passed * MAX_DOTS / total;
        (scaled, MAX_DOTS - scaled)
    } else {
        (passed, total - passed)
    };

    let mut spans = Vec::with_capacity(2);
    if pass_dots > 0 {
        spans.push(Span::styled("●".repeat(pass_dots), pass_style()));
    }
    if other_dots > 0 {
        spans.push(Span::styled("●".repeat(other_dots), fail_style()));
    }
    spans
}

fn package_summary(pkg: &PackageResult, passed: usize, failed: usize, skipped: usize) -> Line<'static> {
    let coverage = coverage_suffix(pkg);

    let (symbol, style, text) = if failed > 0 {
        (
            TestStatus::Failed.symbol(),
            fail_style(),
            format!("{} tests failed, {} passed{}", failed, passed, coverage),
        )
    } else if passed > 0 {
        (
            TestStatus::Passed.symbol(),
            pass_style(),
            format!("All {} tests passed{}", passed, coverage),
        )
    } else {
        (
            TestStatus::Skipped.symbol(),
            dim_style(),
            format!("{} {} skipped{}", skipped, plural("test", skipped), coverage),
        )
    };

    Line::from(vec![
        Span::raw("  "),
        Span::styled(symbol, style),
        Span::raw(" "),
        Span::raw(text),
    ])
}

fn coverage_suffix(pkg: &PackageResult) -> String {
    match (&pkg.statement_coverage, &pkg.function_coverage) {
        (Some(stmt), Some(func)) if stmt != ZERO_COVERAGE => {
            format!(" (statements: {}, functions: {})", stmt, func)
        }
        (Some(stmt), None) if stmt != ZERO_COVERAGE => format!(" ({} coverage)", stmt),
        _ => String::new(),
    }
}

fn plural(word: &str, count: usize) -> String {
    if count == 1 {
        word.to_string()
    } else {
        format!("{}s", word)
    }
}

/// Expand literal `\t` and `\n` sequences captured from the raw stream
fn unescape(text: &str) -> String {
    text.replace("\\t", "\t").replace("\\n", "\n")
}

/// Split a fragment on newlines into indented lines
fn push_text(lines: &mut Vec<Line<'static>>, indent: &str, text: &str, style: Style) {
    let text = text.strip_suffix('\n').unwrap_or(text);
    for part in text.split('\n') {
        let part = part.trim_end_matches('\r').replace('\t', TAB_WIDTH);
        lines.push(Line::from(vec![
            Span::raw(indent.to_string()),
            Span::styled(part, style),
        ]));
    }
}

/// Parse "82.3%" into 82.3
fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').parse().ok()
}

/// Final tally of a run
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub statement_coverage: Option<f64>,
    pub function_coverage: Option<f64>,
    pub elapsed: Duration,
    pub aborted: bool,
    pub exit_code: i32,
}

impl RunSummary {
    pub fn from_state(state: &RunState) -> Self {
        let average = |values: Vec<f64>| {
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };

        let nonzero = |value: &Option<String>| {
            value
                .as_deref()
                .filter(|v| *v != ZERO_COVERAGE)
                .and_then(parse_percent)
        };

        let statements: Vec<f64> = state
            .store
            .ordered_packages()
            .filter_map(|p| nonzero(&p.statement_coverage))
            .collect();
        let functions: Vec<f64> = state
            .store
            .ordered_packages()
            .filter_map(|p| nonzero(&p.function_coverage))
            .collect();

        Self {
            passed: state.passed,
            failed: state.failed,
            skipped: state.skipped,
            statement_coverage: average(statements),
            function_coverage: average(functions),
            elapsed: state.elapsed(),
            aborted: state.aborted,
            exit_code: state.final_exit_code(),
        }
    }

    pub fn total(&self) -> usize {
        self.passed + self.failed + self.skipped
    }

    pub fn lines(&self) -> Vec<Line<'static>> {
        let count_line = |symbol: &'static str, style: Style, label: &str, count: usize| {
            Line::from(vec![
                Span::raw("  "),
                Span::styled(symbol, style),
                Span::raw(format!(" {:<9}{:>5}", label, count)),
            ])
        };

        let mut lines = vec![
            Line::default(),
            Line::styled("Test Results:", Style::default().add_modifier(Modifier::BOLD)),
            count_line(TestStatus::Passed.symbol(), pass_style(), "Passed:", self.passed),
            count_line(TestStatus::Failed.symbol(), fail_style(), "Failed:", self.failed),
            count_line(TestStatus::Skipped.symbol(), dim_style(), "Skipped:", self.skipped),
            Line::raw(format!("  Total:     {:>5}", self.total())),
        ];

        if let Some(stmt) = self.statement_coverage {
            lines.push(Line::raw(format!("  Statement Coverage: {:>5.1}%", stmt)));
            if let Some(func) = self.function_coverage {
                lines.push(Line::raw(format!("  Function Coverage:  {:>5.1}%", func)));
            }
        }

        lines.push(Line::default());
        lines.push(Line::from(vec![
            Span::styled("ℹ", dim_style()),
            Span::raw(format!(" Tests completed in {:.2}s", self.elapsed.as_secs_f64())),
        ]));
        lines.push(Line::default());
        lines.push(self.outcome_line());
        lines
    }

    fn outcome_line(&self) -> Line<'static> {
        let (symbol, style, text) = if self.aborted {
            ("✗", fail_style(), "Test run aborted".to_string())
        } else if self.failed > 0 {
            (
                "✗",
                fail_style(),
                format!("{} {} failed", self.failed, plural("test", self.failed)),
            )
        } else if self.total() == 0 {
            ("⚠", Style::default().fg(Color::Yellow), "No tests found".to_string())
        } else {
            ("✓", pass_style(), "All tests passed".to_string())
        };

        Line::from(vec![
            Span::styled(symbol, style),
            Span::raw(format!(" {} (exit code {})", text, self.exit_code)),
        ])
    }
}

/// Plain text of a line
pub fn line_text(line: &Line<'_>) -> String {
    line.spans.iter().map(|span| span.content.as_ref()).collect()
}

/// Convert styled lines to ANSI text, one line per entry
pub fn to_ansi(lines: &[Line<'_>]) -> String {
    let mut out = String::new();
    for line in lines {
        for span in &line.spans {
            out.push_str(&ansi_span(span));
        }
        out.push('\n');
    }
    out
}

fn ansi_span(span: &Span<'_>) -> String {
    let text = span.content.as_ref();
    let mut styled = match span.style.fg {
        Some(Color::Green) => text.green(),
        Some(Color::Red) => text.red(),
        Some(Color::Yellow) => text.yellow(),
        Some(Color::Cyan) => text.cyan(),
        Some(Color::DarkGray) => text.bright_black(),
        _ => text.normal(),
    };
    if span.style.add_modifier.contains(Modifier::BOLD) {
        styled = styled.bold();
    }
    styled.to_string()
}
