//! Quality gate: turn the aggregated report into a three-state verdict.
//!
//! Gate rules:
//! - Gating conditions force FAILURE: a failed build, a run cut off by its
//!   deadline, failing tests when `fail_on_test_failure` is set, critical
//!   findings when `fail_on_security_issues` is set.
//! - Non-gating conditions only ever degrade to UNSTABLE: no tests executed,
//!   a scanner above its informational threshold, failing tests that do not
//!   gate, stages that did not succeed.
//! - Otherwise SUCCESS.
//!
//! Every condition is evaluated so the summary lists all reasons, gating
//! reasons first.

use tracing::{debug, info};

use polyci_core::{AggregatedReport, BuildStatus, Configuration, Outcome, Verdict};

pub struct QualityGateEvaluator;

impl QualityGateEvaluator {
    pub fn evaluate(
        report: &AggregatedReport,
        config: &Configuration,
        build_status: BuildStatus,
    ) -> Verdict {
        let gating = gating_reasons(report, config, build_status);
        let non_gating = non_gating_reasons(report, config);

        let overall = if !gating.is_empty() {
            Outcome::Failure
        } else if !non_gating.is_empty() {
            Outcome::Unstable
        } else {
            Outcome::Success
        };

        info!(
            overall = %overall,
            gating = gating.len(),
            non_gating = non_gating.len(),
            "Quality gate evaluated"
        );

        Verdict {
            overall,
            reasons: gating.into_iter().chain(non_gating).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rule checks
// ---------------------------------------------------------------------------

fn gating_reasons(
    report: &AggregatedReport,
    config: &Configuration,
    build_status: BuildStatus,
) -> Vec<String> {
    let mut reasons = Vec::new();

    if build_status == BuildStatus::Failure {
        reasons.push("build failed".to_string());
    }

    if report.stage_issues.iter().any(|issue| issue.is_cancelled()) {
        reasons.push("run cancelled at deadline".to_string());
    }

    let failed = report.test_totals.failed;
    if config.fail_on_test_failure && failed > 0 {
        reasons.push(format!("{failed} test(s) failed"));
    }

    if config.fail_on_security_issues {
        for (scanner, critical) in report.scanners_with_critical() {
            reasons.push(format!("{scanner}: {critical} critical finding(s)"));
        }
    }

    reasons
}

fn non_gating_reasons(report: &AggregatedReport, config: &Configuration) -> Vec<String> {
    let mut reasons = Vec::new();

    if report.test_totals.total == 0 {
        reasons.push("no tests executed".to_string());
    }

    for (scanner, counts) in &report.security_findings {
        // Already reported as gating.
        if config.fail_on_security_issues && counts.critical > 0 {
            continue;
        }
        let threshold = config.gate.threshold_for(*scanner);
        if threshold.exceeded_by(counts.total, counts.critical) {
            debug!(scanner = %scanner, total = counts.total, critical = counts.critical, "Scanner over informational threshold");
            reasons.push(format!(
                "{scanner}: {} finding(s), {} critical (informational)",
                counts.total, counts.critical
            ));
        }
    }

    let failed = report.test_totals.failed;
    if !config.fail_on_test_failure && failed > 0 {
        reasons.push(format!("{failed} test(s) failed (not gating)"));
    }

    for issue in &report.stage_issues {
        reasons.push(format!("stage {issue}"));
    }

    reasons
}
