//! Go cover profile parser
//!
//! Records look like `example.com/mod/pkg/file.go:12.3,14.5 2 1`
//! (block, statement count, hit count). With `-coverpkg` the same block can
//! be reported by several test binaries; a block counts as covered if any
//! of them hit it.

use std::collections::HashMap;

use super::{source_dir, CoverageReport, PackageCoverage};

pub const MODE_HEADER: &str = "mode:";

/// Parse cover profile content, aggregating blocks per package directory
pub fn parse_profile_string(content: &str) -> CoverageReport {
    // block -> (statements, covered)
    let mut blocks: HashMap<&str, (u64, bool)> = HashMap::new();

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(MODE_HEADER) {
            continue;
        }

        let mut fields = line.rsplitn(3, ' ');
        let (Some(count), Some(stmts), Some(block)) = (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(count), Ok(stmts)) = (count.parse::<u64>(), stmts.parse::<u64>()) else {
            continue;
        };

        let entry = blocks.entry(block).or_insert((stmts, false));
        entry.1 |= count > 0;
    }

    let mut report = CoverageReport::default();
    for (block, (stmts, covered)) in blocks {
        let Some((file, _range)) = block.rsplit_once(':') else {
            continue;
        };
        let pkg = report.packages.entry(source_dir(file)).or_default();
        pkg.add(&PackageCoverage {
            statements_total: stmts,
            statements_covered: if covered { stmts } else { 0 },
            ..PackageCoverage::default()
        });
    }

    report
}
