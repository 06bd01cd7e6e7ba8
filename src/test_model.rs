//! Test model definitions
//!
//! Core data structures for the result hierarchy rebuilt from the event
//! stream: packages own a flat map of every test and subtest they have seen,
//! and parents additionally keep the names of their own subtests.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

/// Status of a test or package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TestStatus {
    /// Started and not yet finalized
    #[default]
    Running,
    Passed,
    Failed,
    Skipped,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Running => "●",
            TestStatus::Passed => "✓",
            TestStatus::Failed => "✗",
            TestStatus::Skipped => "⊘",
        }
    }

    pub fn color(&self) -> ratatui::style::Color {
        use ratatui::style::Color;
        match self {
            TestStatus::Running => Color::Yellow,
            TestStatus::Passed => Color::Green,
            TestStatus::Failed => Color::Red,
            TestStatus::Skipped => Color::DarkGray,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TestStatus::Running)
    }
}

/// A test or subtest seen in the stream
#[derive(Debug, Clone, Default)]
pub struct TestResult {
    /// Name as reported by the stream (`Parent/case` for subtests)
    pub name: String,
    /// Fully qualified name (`package.Name`)
    pub full_name: String,
    pub status: TestStatus,
    /// Elapsed seconds reported on the terminal event
    pub elapsed: f64,
    /// Raw output fragments in arrival order
    pub output: Vec<String>,
    /// Parent test name, empty for top-level tests
    pub parent: String,
    /// Names of direct subtests
    pub subtests: HashSet<String>,
    /// Direct subtests in first-seen order
    pub subtest_order: Vec<String>,
    pub skip_reason: Option<String>,
}

impl TestResult {
    pub fn new(package: &str, name: &str) -> Self {
        let parent = name
            .split_once(crate::event::SUBTEST_SEPARATOR)
            .map(|(p, _)| p.to_string())
            .unwrap_or_default();

        Self {
            name: name.to_string(),
            full_name: format!("{}.{}", package, name),
            parent,
            ..Self::default()
        }
    }

    pub fn is_subtest(&self) -> bool {
        !self.parent.is_empty()
    }

    pub fn has_subtests(&self) -> bool {
        !self.subtest_order.is_empty()
    }

    /// Register a direct subtest; returns false if it was already linked
    pub fn link_subtest(&mut self, name: &str) -> bool {
        if self.subtests.insert(name.to_string()) {
            self.subtest_order.push(name.to_string());
            true
        } else {
            false
        }
    }

    /// Add output line to the test
    pub fn add_output(&mut self, line: &str) {
        self.output.push(line.to_string());
    }
}

/// Subtest names of one parent bucketed by final outcome
#[derive(Debug, Clone, Default)]
pub struct SubtestStats {
    pub passed: Vec<String>,
    pub failed: Vec<String>,
    pub skipped: Vec<String>,
}

impl SubtestStats {
    pub fn record(&mut self, name: &str, status: TestStatus) {
        let bucket = match status {
            TestStatus::Passed => &mut self.passed,
            TestStatus::Failed => &mut self.failed,
            TestStatus::Skipped => &mut self.skipped,
            TestStatus::Running => return,
        };
        bucket.push(name.to_string());
    }

    pub fn total(&self) -> usize {
        self.passed.len() + self.failed.len() + self.skipped.len()
    }
}

/// Results for a single package
#[derive(Debug, Clone)]
pub struct PackageResult {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub status: TestStatus,
    pub elapsed: f64,
    /// Every test and subtest, keyed by stream name
    pub tests: HashMap<String, TestResult>,
    /// Parents and subtests interleaved by first appearance
    pub test_order: Vec<String>,
    /// Statement coverage, e.g. "82.3%"
    pub statement_coverage: Option<String>,
    /// Function coverage, only known from a coverage report
    pub function_coverage: Option<String>,
    /// Package-scope output (build errors, summary lines)
    pub output: Vec<String>,
    pub has_tests: bool,
    /// The stream announced "[no test files]"
    pub no_test_files: bool,
    /// Outcome buckets per parent test
    pub subtest_stats: HashMap<String, SubtestStats>,
}

impl PackageResult {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            start_time: Utc::now(),
            end_time: None,
            status: TestStatus::Running,
            elapsed: 0.0,
            tests: HashMap::new(),
            test_order: Vec::new(),
            statement_coverage: None,
            function_coverage: None,
            output: Vec::new(),
            has_tests: false,
            no_test_files: false,
            subtest_stats: HashMap::new(),
        }
    }

    /// Fetch a test, creating it (and its order entry) on first reference
    pub fn test_mut_or_create(&mut self, name: &str) -> &mut TestResult {
        // Map and order list only ever grow together here.
        if !self.tests.contains_key(name) {
            self.test_order.push(name.to_string());
        }
        let package = &self.name;
        self.tests
            .entry(name.to_string())
            .or_insert_with(|| TestResult::new(package, name))
    }

    /// Iterate tests in display order
    pub fn ordered_tests(&self) -> impl Iterator<Item = &TestResult> {
        self.test_order.iter().filter_map(|name| self.tests.get(name))
    }

    /// (passed, failed, skipped) over every recorded test and subtest
    pub fn counts(&self) -> (usize, usize, usize) {
        let mut counts = (0, 0, 0);
        for test in self.tests.values() {
            match test.status {
                TestStatus::Passed => counts.0 += 1,
                TestStatus::Failed => counts.1 += 1,
                TestStatus::Skipped => counts.2 += 1,
                TestStatus::Running => {}
            }
        }
        counts
    }
}

/// In-memory result hierarchy for a run
#[derive(Debug, Clone, Default)]
pub struct ResultStore {
    pub packages: HashMap<String, PackageResult>,
    /// Packages in order of first appearance
    pub package_order: Vec<String>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn package(&self, name: &str) -> Option<&PackageResult> {
        self.packages.get(name)
    }

    /// Fetch a package, creating it on first reference
    pub fn package_mut_or_create(&mut self, name: &str) -> &mut PackageResult {
        self.ensure_ordered(name);
        self.packages
            .entry(name.to_string())
            .or_insert_with(|| PackageResult::new(name))
    }

    /// Record package arrival order exactly once
    pub fn ensure_ordered(&mut self, name: &str) {
        if !self.package_order.iter().any(|n| n == name) {
            self.package_order.push(name.to_string());
        }
    }

    pub fn ordered_packages(&self) -> impl Iterator<Item = &PackageResult> {
        self.package_order
            .iter()
            .filter_map(|name| self.packages.get(name))
    }

    /// Number of tests and subtests recorded across all packages
    pub fn total_tests(&self) -> usize {
        self.packages.values().map(|p| p.tests.len()).sum()
    }
}

/// Filter mode for the per-test lines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    All,
    /// Failures and skips
    Failed,
    Passed,
    Skipped,
    /// Failures only, output always shown
    Collapsed,
    /// Summary lines only
    None,
}

impl FilterMode {
    pub fn label(&self) -> &'static str {
        match self {
            FilterMode::All => "all",
            FilterMode::Failed => "failed",
            FilterMode::Passed => "passed",
            FilterMode::Skipped => "skipped",
            FilterMode::Collapsed => "collapsed",
            FilterMode::None => "none",
        }
    }

    /// Whether a test with this status gets its own line
    pub fn admits(&self, status: TestStatus) -> bool {
        match self {
            FilterMode::All => true,
            FilterMode::Failed => {
                status == TestStatus::Failed || status == TestStatus::Skipped
            }
            FilterMode::Passed => status == TestStatus::Passed,
            FilterMode::Skipped => status == TestStatus::Skipped,
            FilterMode::Collapsed => status == TestStatus::Failed,
            FilterMode::None => false,
        }
    }

    pub fn cycle_next(&self) -> Self {
        match self {
            FilterMode::All => FilterMode::Failed,
            FilterMode::Failed => FilterMode::Passed,
            FilterMode::Passed => FilterMode::Skipped,
            FilterMode::Skipped => FilterMode::Collapsed,
            FilterMode::Collapsed => FilterMode::None,
            FilterMode::None => FilterMode::All,
        }
    }
}

impl fmt::Display for FilterMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for FilterMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "all" => Ok(FilterMode::All),
            "failed" => Ok(FilterMode::Failed),
            "passed" => Ok(FilterMode::Passed),
            "skipped" => Ok(FilterMode::Skipped),
            "collapsed" => Ok(FilterMode::Collapsed),
            "none" => Ok(FilterMode::None),
            other => Err(format!(
                "unknown filter '{}' (expected all, failed, passed, skipped, collapsed, none)",
                other
            )),
        }
    }
}

/// How much captured output is shown for failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verbosity {
    Minimal,
    #[default]
    Standard,
    WithOutput,
    Verbose,
}

impl Verbosity {
    pub fn label(&self) -> &'static str {
        match self {
            Verbosity::Minimal => "minimal",
            Verbosity::Standard => "standard",
            Verbosity::WithOutput => "with-output",
            Verbosity::Verbose => "verbose",
        }
    }

    /// Literal `\t` / `\n` sequences are expanded in these modes
    pub fn unescapes_output(&self) -> bool {
        matches!(self, Verbosity::WithOutput | Verbosity::Verbose)
    }

    pub fn cycle_next(&self) -> Self {
        match self {
            Verbosity::Minimal => Verbosity::Standard,
            Verbosity::Standard => Verbosity::WithOutput,
            Verbosity::WithOutput => Verbosity::Verbose,
            Verbosity::Verbose => Verbosity::Minimal,
        }
    }
}

impl FromStr for Verbosity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "minimal" => Ok(Verbosity::Minimal),
            "standard" => Ok(Verbosity::Standard),
            "with-output" => Ok(Verbosity::WithOutput),
            "verbose" => Ok(Verbosity::Verbose),
            other => Err(format!(
                "unknown verbosity '{}' (expected minimal, standard, with-output, verbose)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_subtest_records_parent() {
        let test = TestResult::new("example.com/pkg", "TestTable/case_a");
        assert_eq!(test.parent, "TestTable");
        assert_eq!(test.full_name, "example.com/pkg.TestTable/case_a");
        assert!(test.is_subtest());

        let top = TestResult::new("example.com/pkg", "TestTable");
        assert!(!top.is_subtest());
    }

    #[test]
    fn test_link_subtest_once() {
        let mut parent = TestResult::new("p", "TestParent");
        assert!(parent.link_subtest("TestParent/a"));
        assert!(!parent.link_subtest("TestParent/a"));
        assert!(parent.link_subtest("TestParent/b"));
        assert_eq!(parent.subtest_order, vec!["TestParent/a", "TestParent/b"]);
    }

    #[test]
    fn test_package_order_recorded_once() {
        let mut store = ResultStore::new();
        store.package_mut_or_create("a");
        store.package_mut_or_create("b");
        store.package_mut_or_create("a");
        store.ensure_ordered("b");
        assert_eq!(store.package_order, vec!["a", "b"]);
    }

    #[test]
    fn test_filter_admits() {
        use TestStatus::*;

        assert!(FilterMode::All.admits(Passed));
        assert!(FilterMode::Failed.admits(Failed));
        assert!(FilterMode::Failed.admits(Skipped));
        assert!(!FilterMode::Failed.admits(Passed));
        assert!(FilterMode::Collapsed.admits(Failed));
        assert!(!FilterMode::Collapsed.admits(Skipped));
        assert!(!FilterMode::Collapsed.admits(Passed));
        for status in [Passed, Failed, Skipped, Running] {
            assert!(!FilterMode::None.admits(status));
        }
        assert!(FilterMode::Skipped.admits(Skipped));
        assert!(!FilterMode::Passed.admits(Skipped));
    }

    #[test]
    fn test_filter_cycle_visits_every_mode() {
        let mut mode = FilterMode::All;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(mode);
            mode = mode.cycle_next();
        }
        assert_eq!(mode, FilterMode::All);
        assert_eq!(seen.len(), 6);
        assert!(seen.contains(&FilterMode::None));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("Collapsed".parse::<FilterMode>().unwrap(), FilterMode::Collapsed);
        assert!("bogus".parse::<FilterMode>().is_err());
        assert_eq!("with-output".parse::<Verbosity>().unwrap(), Verbosity::WithOutput);
        assert!(Verbosity::Verbose.unescapes_output());
        assert!(!Verbosity::Standard.unescapes_output());
    }
}
