//! Per-stage execution results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use crate::stage::Stage;

/// Canonical metric keys carried in [`StageResult::metrics`].
pub mod metric {
    pub const EXIT_CODE: &str = "exit_code";
    pub const TESTS_TOTAL: &str = "tests.total";
    pub const TESTS_PASSED: &str = "tests.passed";
    pub const TESTS_FAILED: &str = "tests.failed";
    pub const TESTS_SKIPPED: &str = "tests.skipped";
    pub const COVERAGE_LINES_COVERED: &str = "coverage.lines_covered";
    pub const COVERAGE_LINES_VALID: &str = "coverage.lines_valid";
    pub const COVERAGE_PERCENT: &str = "coverage.percent";
    pub const FINDINGS_TOTAL: &str = "findings.total";
    pub const FINDINGS_CRITICAL: &str = "findings.critical";
    pub const PROJECTS: &str = "projects";
}

/// Terminal state of one stage (or one invocation within a stage).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Success,
    Failure,
    Skipped,
    Unstable,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Success => "SUCCESS",
            StageStatus::Failure => "FAILURE",
            StageStatus::Skipped => "SKIPPED",
            StageStatus::Unstable => "UNSTABLE",
        };
        f.write_str(s)
    }
}

/// Outcome of one tool invocation for a stage. Never mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: Stage,

    /// Project or solution the invocation ran for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    pub status: StageStatus,

    /// Report files the stage was expected to write.
    #[serde(default)]
    pub artifacts: Vec<PathBuf>,

    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,

    /// Captured stdout/stderr of the tool.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log: Option<PathBuf>,

    /// Why the stage failed, was skipped or was cancelled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    #[serde(default)]
    pub duration_ms: u64,

    pub started_at: DateTime<Utc>,
}

impl StageResult {
    pub fn new(stage: Stage, status: StageStatus) -> Self {
        Self {
            stage,
            target: None,
            status,
            artifacts: Vec::new(),
            metrics: BTreeMap::new(),
            log: None,
            reason: None,
            duration_ms: 0,
            started_at: Utc::now(),
        }
    }

    pub fn success(stage: Stage) -> Self {
        Self::new(stage, StageStatus::Success)
    }

    pub fn failure(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(stage, StageStatus::Failure).with_reason(reason)
    }

    pub fn skipped(stage: Stage, reason: impl Into<String>) -> Self {
        Self::new(stage, StageStatus::Skipped).with_reason(reason)
    }

    /// A stage abandoned because the run budget ran out.
    pub fn cancelled(stage: Stage) -> Self {
        Self::failure(stage, CANCELLED_REASON)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_artifact(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifacts.push(path.into());
        self
    }

    pub fn with_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.log = Some(path.into());
        self
    }

    pub fn with_metric(mut self, key: impl Into<String>, value: f64) -> Self {
        self.metrics.insert(key.into(), value);
        self
    }

    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    pub fn passed(&self) -> bool {
        self.status == StageStatus::Success
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == StageStatus::Failure && self.reason.as_deref() == Some(CANCELLED_REASON)
    }

    pub fn metric(&self, key: &str) -> Option<f64> {
        self.metrics.get(key).copied()
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.metric(metric::EXIT_CODE).map(|v| v as i32)
    }

    /// Display label: `stage` or `stage (target)`.
    pub fn label(&self) -> String {
        match &self.target {
            Some(target) => format!("{} ({})", self.stage, target),
            None => self.stage.to_string(),
        }
    }
}

/// Reason recorded for stages cut off by the run deadline.
pub const CANCELLED_REASON: &str = "cancelled";
