//! Coverage module
//!
//! Provides:
//! - Go cover profile parsing
//! - LCOV parsing
//! - Merging per-package percentages into the result store

mod lcov;
mod profile;

pub use lcov::*;
pub use profile::*;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::RunError;
use crate::test_model::ResultStore;

/// Statement and function counters for one package or source directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageCoverage {
    pub statements_total: u64,
    pub statements_covered: u64,
    pub functions_total: u64,
    pub functions_covered: u64,
}

impl PackageCoverage {
    pub fn add(&mut self, other: &PackageCoverage) {
        self.statements_total += other.statements_total;
        self.statements_covered += other.statements_covered;
        self.functions_total += other.functions_total;
        self.functions_covered += other.functions_covered;
    }

    pub fn statement_percent(&self) -> Option<f64> {
        percent(self.statements_covered, self.statements_total)
    }

    pub fn function_percent(&self) -> Option<f64> {
        percent(self.functions_covered, self.functions_total)
    }
}

fn percent(covered: u64, total: u64) -> Option<f64> {
    (total > 0).then(|| covered as f64 / total as f64 * 100.0)
}

/// Coverage keyed by package directory
#[derive(Debug, Clone, Default)]
pub struct CoverageReport {
    pub packages: BTreeMap<String, PackageCoverage>,
}

/// Read a coverage report, detecting the format from its content
pub fn load(path: &Path) -> Result<CoverageReport, RunError> {
    let content = fs::read_to_string(path).map_err(|source| RunError::Coverage {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(parse_report(&content))
}

pub fn parse_report(content: &str) -> CoverageReport {
    let first = content.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    if first.trim_start().starts_with(MODE_HEADER) {
        parse_profile_string(content)
    } else {
        parse_lcov_string(content)
    }
}

/// Directory part of a source path
pub(crate) fn source_dir(file: &str) -> String {
    match file.rsplit_once('/') {
        Some((dir, _)) => dir.to_string(),
        None => String::new(),
    }
}

/// Whether a report directory belongs to a package import path
fn matches_package(dir: &str, package: &str) -> bool {
    !dir.is_empty()
        && (dir == package
            || package.ends_with(&format!("/{}", dir))
            || dir.ends_with(&format!("/{}", package)))
}

/// Merge report percentages into packages seen in the stream.
///
/// Function coverage is set wherever the report has it; statement coverage
/// only fills packages the stream reported none for. Returns the number of
/// packages touched.
pub fn merge_into(report: &CoverageReport, store: &mut ResultStore) -> usize {
    let mut touched = 0;

    for (name, pkg) in store.packages.iter_mut() {
        let mut total = PackageCoverage::default();
        let mut found = false;
        for (dir, coverage) in &report.packages {
            if matches_package(dir, name) {
                total.add(coverage);
                found = true;
            }
        }
        if !found {
            continue;
        }

        let mut changed = false;
        if let Some(pct) = total.function_percent() {
            pkg.function_coverage = Some(format!("{:.1}%", pct));
            changed = true;
        }
        if pkg.statement_coverage.is_none() {
            if let Some(pct) = total.statement_percent() {
                pkg.statement_coverage = Some(format!("{:.1}%", pct));
                changed = true;
            }
        }
        if changed {
            debug!(package = %name, "coverage merged");
            touched += 1;
        }
    }

    touched
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_format() {
        let profile = parse_report("mode: atomic\nexample.com/a/x.go:1.1,2.2 1 1\n");
        assert!(profile.packages.contains_key("example.com/a"));

        let lcov = parse_report("SF:pkg/a/x.go\nLF:2\nLH:1\nend_of_record\n");
        assert!(lcov.packages.contains_key("pkg/a"));
    }

    #[test]
    fn test_merge_respects_stream_statements() {
        let mut store = ResultStore::new();
        store.package_mut_or_create("example.com/app/store").statement_coverage =
            Some("90.0%".to_string());
        store.package_mut_or_create("example.com/app/cache");
        store.package_mut_or_create("example.com/app/other");

        let report = parse_lcov_string(
            "SF:store/a.go\nLF:4\nLH:1\nFNF:2\nFNH:1\nend_of_record\n\
             SF:cache/b.go\nLF:4\nLH:3\nend_of_record\n",
        );

        assert_eq!(merge_into(&report, &mut store), 2);

        let store_pkg = store.package("example.com/app/store").unwrap();
        assert_eq!(store_pkg.statement_coverage.as_deref(), Some("90.0%"));
        assert_eq!(store_pkg.function_coverage.as_deref(), Some("50.0%"));

        let cache = store.package("example.com/app/cache").unwrap();
        assert_eq!(cache.statement_coverage.as_deref(), Some("75.0%"));
        assert_eq!(cache.function_coverage, None);

        assert_eq!(store.package("example.com/app/other").unwrap().statement_coverage, None);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("nope.out")).unwrap_err();
        assert!(matches!(err, RunError::Coverage { .. }));
    }
}
