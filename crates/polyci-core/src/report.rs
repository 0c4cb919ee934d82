//! The unified result record built from every stage's output.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::result::{StageStatus, CANCELLED_REASON};
use crate::stage::Stage;

/// External analysis tools whose findings are tracked per tool.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Scanner {
    /// OWASP Dependency-Check.
    DependencyCheck,
    Semgrep,
    Gitleaks,
    Fossa,
    Trivy,
    Sonarqube,
    /// `dotnet format` / Checkstyle.
    Lint,
}

impl Scanner {
    pub const ALL: &'static [Scanner] = &[
        Scanner::DependencyCheck,
        Scanner::Semgrep,
        Scanner::Gitleaks,
        Scanner::Fossa,
        Scanner::Trivy,
        Scanner::Sonarqube,
        Scanner::Lint,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Scanner::DependencyCheck => "dependency-check",
            Scanner::Semgrep => "semgrep",
            Scanner::Gitleaks => "gitleaks",
            Scanner::Fossa => "fossa",
            Scanner::Trivy => "trivy",
            Scanner::Sonarqube => "sonarqube",
            Scanner::Lint => "lint",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }
}

impl fmt::Display for Scanner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// Test counts. `total == passed + failed + skipped` once normalised.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestTotals {
    pub total: u64,
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl TestTotals {
    /// Build totals from the three outcome buckets.
    pub fn from_outcomes(passed: u64, failed: u64, skipped: u64) -> Self {
        Self {
            total: passed + failed + skipped,
            passed,
            failed,
            skipped,
        }
    }

    pub fn add(&mut self, other: &TestTotals) {
        self.passed += other.passed;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.total = self.passed + self.failed + self.skipped;
    }

    pub fn is_consistent(&self) -> bool {
        self.total == self.passed + self.failed + self.skipped
    }
}

/// Finding counts for one scanner.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FindingCounts {
    pub total: u32,
    pub critical: u32,
}

impl FindingCounts {
    pub fn new(total: u32, critical: u32) -> Self {
        Self { total, critical }
    }

    pub fn add(&mut self, other: &FindingCounts) {
        self.total = self.total.saturating_add(other.total);
        self.critical = self.critical.saturating_add(other.critical);
    }
}

/// A stage that did not finish successfully.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct StageIssue {
    pub stage: Stage,
    pub target: Option<String>,
    pub status: StageStatus,
    pub reason: String,
}

impl StageIssue {
    /// Cut off by the run deadline rather than failed on its own.
    pub fn is_cancelled(&self) -> bool {
        self.status == StageStatus::Failure && self.reason == CANCELLED_REASON
    }
}

impl fmt::Display for StageIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.target {
            Some(target) => write!(
                f,
                "{} ({}) {}: {}",
                self.stage, target, self.status, self.reason
            ),
            None => write!(f, "{} {}: {}", self.stage, self.status, self.reason),
        }
    }
}

/// Merged view of all stage results.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AggregatedReport {
    pub test_totals: TestTotals,
    /// Line coverage in percent, when any coverage report was available.
    pub coverage_percent: Option<f64>,
    pub security_findings: BTreeMap<Scanner, FindingCounts>,
    /// Non-success stages, in canonical order.
    pub stage_issues: Vec<StageIssue>,
    /// Recovered problems (unparseable reports, inconsistent counts), sorted.
    pub warnings: Vec<String>,
}

impl AggregatedReport {
    pub fn total_critical(&self) -> u32 {
        self.security_findings
            .values()
            .fold(0u32, |acc, c| acc.saturating_add(c.critical))
    }

    /// Scanners that reported at least one critical finding.
    pub fn scanners_with_critical(&self) -> Vec<(Scanner, u32)> {
        self.security_findings
            .iter()
            .filter(|(_, c)| c.critical > 0)
            .map(|(s, c)| (*s, c.critical))
            .collect()
    }
}
