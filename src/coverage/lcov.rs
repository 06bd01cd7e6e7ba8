//! LCOV format parser

use super::{source_dir, CoverageReport, PackageCoverage};

/// Parse LCOV content, aggregating records per source directory
pub fn parse_lcov_string(content: &str) -> CoverageReport {
    let mut report = CoverageReport::default();

    let mut current_file: Option<String> = None;
    let mut record = PackageCoverage::default();

    for line in content.lines() {
        let line = line.trim();

        if let Some(path) = line.strip_prefix("SF:") {
            current_file = Some(path.to_string());
            record = PackageCoverage::default();
        } else if let Some(count) = line.strip_prefix("LF:") {
            record.statements_total = count.parse().unwrap_or(0);
        } else if let Some(count) = line.strip_prefix("LH:") {
            record.statements_covered = count.parse().unwrap_or(0);
        } else if let Some(count) = line.strip_prefix("FNF:") {
            record.functions_total = count.parse().unwrap_or(0);
        } else if let Some(count) = line.strip_prefix("FNH:") {
            record.functions_covered = count.parse().unwrap_or(0);
        } else if line == "end_of_record" {
            if let Some(file_path) = current_file.take() {
                report
                    .packages
                    .entry(source_dir(&file_path))
                    .or_default()
                    .add(&record);
            }
        }
    }

    report
}
