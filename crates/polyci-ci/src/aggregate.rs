//! Merge stage results into one [`AggregatedReport`].
//!
//! Merging is order-independent and idempotent: results are put into a
//! canonical order before folding, and folding only sums counts and unions
//! sets. Report problems become warnings, never errors.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

use polyci_core::{
    AggregatedReport, FindingCounts, Scanner, Stage, StageIssue, StageKind, StageResult,
    StageStatus, TestTotals,
};

use crate::parsers::{parse_report, Contribution, CoverageSample};

pub struct ReportAggregator;

impl ReportAggregator {
    pub fn merge(results: &[StageResult]) -> AggregatedReport {
        let mut ordered: Vec<&StageResult> = results.iter().collect();
        ordered.sort_by_cached_key(|r| canonical_key(r));

        let mut acc = Accumulator::default();
        for result in ordered {
            acc.absorb(result);
        }
        acc.finish()
    }
}

/// Total order over results that does not depend on arrival order.
fn canonical_key(result: &StageResult) -> (Stage, Option<String>, String) {
    (
        result.stage,
        result.target.clone(),
        serde_json::to_string(result).unwrap_or_default(),
    )
}

#[derive(Default)]
struct Accumulator {
    tests: TestTotals,
    lines_covered: u64,
    lines_valid: u64,
    percent_samples: Vec<f64>,
    findings: BTreeMap<Scanner, FindingCounts>,
    issues: BTreeSet<StageIssue>,
    warnings: BTreeSet<String>,
}

impl Accumulator {
    fn absorb(&mut self, result: &StageResult) {
        let kind = result.stage.kind();
        if kind == StageKind::Internal {
            return;
        }

        if matches!(result.status, StageStatus::Failure | StageStatus::Unstable) {
            self.issues.insert(StageIssue {
                stage: result.stage,
                target: result.target.clone(),
                status: result.status,
                reason: result
                    .reason
                    .clone()
                    .unwrap_or_else(|| result.status.to_string().to_lowercase()),
            });
        }
        if result.status == StageStatus::Skipped {
            return;
        }

        // A scanner that ran is listed even when it found nothing.
        if let Some(scanner) = result.stage.scanner() {
            self.findings.entry(scanner).or_default();
        }

        if let Some(contribution) = Contribution::from_metrics(result) {
            self.add(result, contribution);
            return;
        }
        for artifact in &result.artifacts {
            match parse_report(result.stage, artifact) {
                Ok(contribution) => self.add(result, contribution),
                Err(err) => {
                    warn!(stage = %result.stage, target = ?result.target, error = %err, "Report not usable");
                    self.warnings.insert(format!("{}: {}", result.label(), err));
                }
            }
        }
    }

    fn add(&mut self, result: &StageResult, contribution: Contribution) {
        if let Some(tests) = contribution.tests {
            if !tests.is_consistent() {
                self.warnings.insert(format!(
                    "{}: reported total {} differs from passed + failed + skipped = {}",
                    result.label(),
                    tests.total,
                    tests.passed + tests.failed + tests.skipped
                ));
            }
            self.tests.add(&tests);
        }

        match contribution.coverage {
            Some(CoverageSample::Lines { covered, valid }) => {
                self.lines_covered += covered;
                self.lines_valid += valid;
            }
            Some(CoverageSample::Percent(percent)) => self.percent_samples.push(percent),
            None => {}
        }

        if let Some(findings) = contribution.findings {
            match result.stage.scanner() {
                Some(scanner) => self.findings.entry(scanner).or_default().add(&findings),
                None => debug!(stage = %result.stage, "Ignoring findings from non-scanner stage"),
            }
        }
    }

    fn finish(self) -> AggregatedReport {
        let coverage_percent = if self.lines_valid > 0 {
            Some(round2(
                self.lines_covered as f64 * 100.0 / self.lines_valid as f64,
            ))
        } else if !self.percent_samples.is_empty() {
            let sum: f64 = self.percent_samples.iter().sum();
            Some(round2(sum / self.percent_samples.len() as f64))
        } else {
            None
        };

        AggregatedReport {
            test_totals: self.tests,
            coverage_percent,
            security_findings: self.findings,
            stage_issues: self.issues.into_iter().collect(),
            warnings: self.warnings.into_iter().collect(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
