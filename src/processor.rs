//! Event processor
//!
//! Applies decoded stream events to the result hierarchy. Delivery from a
//! concurrently running test binary is neither ordered nor unique, so every
//! entity is created lazily on first reference and duplicate events are
//! absorbed instead of rejected.

use chrono::Utc;
use tracing::{debug, trace};

use crate::event::{Action, Event};
use crate::state::RunState;
use crate::test_model::{PackageResult, TestStatus};

const COVERAGE_MARKER: &str = "coverage:";
const NO_TEST_FILES: &str = "[no test files]";
const NO_STATEMENTS: &str = "[no statements]";
const ZERO_COVERAGE: &str = "0.0%";

/// Markers that identify a skip message in test output
const SKIP_MARKERS: &[&str] = &["SKIP:", "SKIP ", "skipping:", "Skipping ", "Skip(", "Skipf("];

/// Markers whose text is dropped from the extracted reason
const SKIP_PREFIXES: &[&str] = &["SKIP:", "SKIP ", "skipping:", "Skipping "];

/// Apply one event to the run
pub fn process_event(state: &mut RunState, event: &Event) {
    if event.package.is_empty() {
        return;
    }

    if event.is_package_level() {
        process_package_event(state, event);
    } else {
        process_test_event(state, event);
    }
}

fn process_package_event(state: &mut RunState, event: &Event) {
    match event.action {
        Action::Start => {
            state.store.package_mut_or_create(&event.package);
        }
        Action::Output => process_package_output(state, event),
        Action::Pass | Action::Fail | Action::Skip => {
            let status = status_for(event.action);
            let pkg = state.store.package_mut_or_create(&event.package);
            // Nothing inside a finished package can still be running
            reconcile_tests(pkg);
            pkg.status = status;
            pkg.elapsed = event.elapsed;
            pkg.end_time = Some(event.time.unwrap_or_else(Utc::now));

            // A failing package without tests could not run them at all
            if status == TestStatus::Failed && pkg.tests.is_empty() && !pkg.no_test_files {
                pkg.has_tests = true;
            }
            debug!(package = %event.package, ?status, elapsed = event.elapsed, "package finished");
        }
        Action::Run | Action::Other => {}
    }
}

fn process_package_output(state: &mut RunState, event: &Event) {
    let output = event.output.as_str();
    let pkg = state.store.package_mut_or_create(&event.package);

    if output.contains(COVERAGE_MARKER) {
        if let Some(coverage) = extract_coverage(output) {
            pkg.statement_coverage = Some(coverage);
        }
    }

    if output.contains(NO_TEST_FILES) {
        pkg.no_test_files = true;
    }

    // `FAIL\t<package>` without any test means setup or build failed
    if output.contains(&format!("FAIL\t{}", event.package)) {
        if pkg.status == TestStatus::Running {
            pkg.status = TestStatus::Failed;
        }
        pkg.has_tests = true;
    }

    pkg.output.push(event.output.clone());
}

/// Extract the coverage percentage from a package output line
pub fn extract_coverage(output: &str) -> Option<String> {
    if output.contains(&format!("{} {}", COVERAGE_MARKER, NO_STATEMENTS))
        || output.contains(&format!("{} {}", COVERAGE_MARKER, NO_TEST_FILES))
    {
        return Some(ZERO_COVERAGE.to_string());
    }

    let mut fields = output.split_whitespace();
    fields.find(|field| *field == COVERAGE_MARKER)?;
    match fields.next() {
        Some(value) if value.ends_with('%') => Some(value.to_string()),
        Some(_) => Some(ZERO_COVERAGE.to_string()),
        None => None,
    }
}

fn process_test_event(state: &mut RunState, event: &Event) {
    state
        .store
        .package_mut_or_create(&event.package)
        .has_tests = true;

    match event.action {
        Action::Run => process_test_run(state, event),
        Action::Output => {
            ensure_test(state, event);
            process_test_output(state, event);
        }
        Action::Pass | Action::Fail | Action::Skip => {
            ensure_test(state, event);
            process_test_result(state, event);
        }
        Action::Start | Action::Other => {}
    }
}

/// Treat a test first referenced by a non-run event as if it had been run
fn ensure_test(state: &mut RunState, event: &Event) {
    let known = state
        .store
        .package(&event.package)
        .is_some_and(|pkg| pkg.tests.contains_key(&event.test));
    if !known {
        trace!(package = %event.package, test = %event.test, "implicit run");
        process_test_run(state, event);
    }
}

fn process_test_run(state: &mut RunState, event: &Event) {
    state.progress.record_run();
    state.current_test = Some(event.test.clone());

    let pkg = state.store.package_mut_or_create(&event.package);

    match event.parent_test() {
        Some(parent) => {
            // Parallel and table-driven tests may announce a subtest before
            // its parent; the parent is created first so it precedes it.
            pkg.test_mut_or_create(parent);
            pkg.test_mut_or_create(&event.test);
            if let Some(parent) = pkg.tests.get_mut(parent) {
                parent.link_subtest(&event.test);
            }
        }
        None => {
            pkg.test_mut_or_create(&event.test);
        }
    }
}

fn process_test_output(state: &mut RunState, event: &Event) {
    let pkg = state.store.package_mut_or_create(&event.package);
    let test = pkg.test_mut_or_create(&event.test);
    test.add_output(&event.output);

    if let Some(reason) = extract_skip_reason(&event.output) {
        test.skip_reason = Some(reason);
    }
}

/// Extract a skip reason from a test output fragment
pub fn extract_skip_reason(output: &str) -> Option<String> {
    let trimmed = output.trim();

    // Result lines like "--- SKIP: TestName (0.00s)"
    if trimmed.starts_with("---") {
        return None;
    }
    if !SKIP_MARKERS.iter().any(|marker| trimmed.contains(marker)) {
        return None;
    }

    let mut reason = strip_location_prefix(trimmed);
    for prefix in SKIP_PREFIXES {
        if let Some(idx) = reason.find(prefix) {
            reason = reason[idx + prefix.len()..].trim();
            break;
        }
    }

    if reason.is_empty() || reason.starts_with("---") {
        None
    } else {
        Some(reason.to_string())
    }
}

/// Drop a leading `file:line: ` prefix
fn strip_location_prefix(text: &str) -> &str {
    let Some((location, rest)) = text.split_once(": ") else {
        return text;
    };
    let is_location = location
        .rsplit_once(':')
        .is_some_and(|(file, line)| {
            !file.is_empty()
                && !file.contains(char::is_whitespace)
                && !line.is_empty()
                && line.chars().all(|c| c.is_ascii_digit())
        });

    if is_location {
        rest.trim()
    } else {
        text
    }
}

fn process_test_result(state: &mut RunState, event: &Event) {
    let status = status_for(event.action);
    let Some(pkg) = state.store.packages.get_mut(&event.package) else {
        return;
    };
    let Some(test) = pkg.tests.get_mut(&event.test) else {
        return;
    };

    // A test finalizes once; repeated terminal events are absorbed
    if test.status.is_terminal() {
        trace!(test = %event.test, "duplicate terminal event");
        return;
    }

    test.status = status;
    test.elapsed = event.elapsed;

    if let Some(parent) = event.parent_test() {
        pkg.subtest_stats
            .entry(parent.to_string())
            .or_default()
            .record(&event.test, status);
    }

    match status {
        TestStatus::Passed => state.passed += 1,
        TestStatus::Failed => state.failed += 1,
        TestStatus::Skipped => state.skipped += 1,
        TestStatus::Running => {}
    }
    state.completed += 1;
    state.progress.record_completed();
}

fn status_for(action: Action) -> TestStatus {
    match action {
        Action::Pass => TestStatus::Passed,
        Action::Fail => TestStatus::Failed,
        Action::Skip => TestStatus::Skipped,
        _ => TestStatus::Running,
    }
}

/// Assign a terminal status to anything still running when the stream ends.
///
/// Returns the names of packages finalized here, in arrival order.
pub fn reconcile(state: &mut RunState) -> Vec<String> {
    let mut reconciled = Vec::new();

    for name in state.store.package_order.clone() {
        let Some(pkg) = state.store.packages.get_mut(&name) else {
            continue;
        };

        reconcile_tests(pkg);

        if pkg.end_time.is_none() {
            if pkg.status == TestStatus::Running {
                pkg.status = infer_status(pkg.tests.values().map(|t| t.status));
            }
            pkg.end_time = Some(Utc::now());
            debug!(package = %name, status = ?pkg.status, "package reconciled");
            reconciled.push(name);
        }
    }

    reconciled
}

fn reconcile_tests(pkg: &mut PackageResult) {
    // Leaves first so parents can be inferred from their subtests
    let running: Vec<String> = pkg
        .test_order
        .iter()
        .filter(|name| {
            pkg.tests
                .get(*name)
                .is_some_and(|t| t.status == TestStatus::Running)
        })
        .cloned()
        .collect();

    let (parents, leaves): (Vec<String>, Vec<String>) = running
        .into_iter()
        .partition(|name| pkg.tests.get(name).is_some_and(|t| t.has_subtests()));

    for name in leaves {
        if let Some(test) = pkg.tests.get_mut(&name) {
            test.status = TestStatus::Skipped;
        }
    }

    for name in parents {
        let status = match pkg.tests.get(&name) {
            Some(parent) => infer_status(
                parent
                    .subtest_order
                    .iter()
                    .filter_map(|sub| pkg.tests.get(sub))
                    .map(|sub| sub.status),
            ),
            None => continue,
        };
        if let Some(test) = pkg.tests.get_mut(&name) {
            test.status = status;
        }
    }
}

/// No children ⇒ skip; any failure ⇒ fail; otherwise pass
fn infer_status(children: impl Iterator<Item = TestStatus>) -> TestStatus {
    let mut any = false;
    for status in children {
        any = true;
        if status == TestStatus::Failed {
            return TestStatus::Failed;
        }
    }
    if any {
        TestStatus::Passed
    } else {
        TestStatus::Skipped
    }
}
