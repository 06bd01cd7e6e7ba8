//! Stream event definitions
//!
//! One `Event` is decoded from each line the child test process writes to
//! stdout (the `go test -json` record format).

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Separator between a parent test name and a subtest suffix
pub const SUBTEST_SEPARATOR: char = '/';

/// Action carried by a stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Start,
    Run,
    Output,
    Pass,
    Fail,
    Skip,
    /// pause, cont, bench and anything newer
    #[serde(other)]
    Other,
}

impl Action {
    /// Whether this action finalizes a test or package
    pub fn is_terminal(&self) -> bool {
        matches!(self, Action::Pass | Action::Fail | Action::Skip)
    }
}

/// A single decoded record from the test stream
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    #[serde(rename = "Time", alias = "time", default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(rename = "Action", alias = "action")]
    pub action: Action,
    #[serde(rename = "Package", alias = "package", default)]
    pub package: String,
    #[serde(rename = "Test", alias = "test", default)]
    pub test: String,
    #[serde(rename = "Output", alias = "output", default)]
    pub output: String,
    #[serde(rename = "Elapsed", alias = "elapsed", default)]
    pub elapsed: f64,
}

impl Event {
    /// Package-scope event (no test name)
    pub fn is_package_level(&self) -> bool {
        self.test.is_empty()
    }

    /// Parent name if this event addresses a subtest
    pub fn parent_test(&self) -> Option<&str> {
        self.test
            .split_once(SUBTEST_SEPARATOR)
            .map(|(parent, _)| parent)
    }
}

/// Decode one raw stream line. Anything that is not a record yields `None`.
pub fn parse_line(line: &str) -> Option<Event> {
    let trimmed = line.trim();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_event() {
        let event = parse_line(
            r#"{"Time":"2024-05-01T10:00:00.123Z","Action":"run","Package":"example.com/pkg","Test":"TestAlpha"}"#,
        )
        .unwrap();
        assert_eq!(event.action, Action::Run);
        assert_eq!(event.package, "example.com/pkg");
        assert_eq!(event.test, "TestAlpha");
        assert!(event.time.is_some());
        assert!(!event.is_package_level());
        assert_eq!(event.parent_test(), None);
    }

    #[test]
    fn test_parse_lowercase_keys_and_subtest() {
        let event = parse_line(
            r#"{"action":"pass","package":"p","test":"TestTable/case_1","elapsed":0.25}"#,
        )
        .unwrap();
        assert_eq!(event.action, Action::Pass);
        assert_eq!(event.parent_test(), Some("TestTable"));
        assert!((event.elapsed - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unknown_action_is_tolerated() {
        let event = parse_line(r#"{"Action":"pause","Package":"p","Test":"TestX"}"#).unwrap();
        assert_eq!(event.action, Action::Other);
        assert!(!event.action.is_terminal());
    }

    #[test]
    fn test_non_record_lines_are_dropped() {
        assert!(parse_line("# example.com/pkg [build failed]").is_none());
        assert!(parse_line("{not json").is_none());
        assert!(parse_line("").is_none());
        assert!(parse_line(r#"{"Package":"p"}"#).is_none());
    }
}
