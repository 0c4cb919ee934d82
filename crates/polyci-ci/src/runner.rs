//! Tool execution.
//!
//! The runner is the only component that spawns processes. A tool that runs
//! and fails is a [`StageResult`] with a failure status; only problems that
//! prevent running it at all are returned as [`RunnerError`].

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use polyci_core::{metric, Stage, StageResult, StageStatus, Timeouts};

use crate::error::RunnerError;
use crate::layout::ReportLayout;

/// One planned external tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ToolInvocation {
    /// Project, solution or tool the call is for.
    pub target: Option<String>,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Report the tool is expected to write.
    pub report: Option<PathBuf>,
    /// The tool prints its report on stdout instead of writing a file.
    #[serde(default)]
    pub stdout_is_report: bool,
    /// A non-zero exit only makes the stage unstable.
    #[serde(default)]
    pub non_gating: bool,
}

impl ToolInvocation {
    pub fn new<I, S>(program: impl Into<String>, args: I, working_dir: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            target: None,
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: working_dir.into(),
            env: BTreeMap::new(),
            report: None,
            stdout_is_report: false,
            non_gating: false,
        }
    }

    pub fn for_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_report(mut self, report: impl Into<PathBuf>) -> Self {
        self.report = Some(report.into());
        self
    }

    pub fn report_from_stdout(mut self, report: impl Into<PathBuf>) -> Self {
        self.report = Some(report.into());
        self.stdout_is_report = true;
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn non_gating(mut self, non_gating: bool) -> Self {
        self.non_gating = non_gating;
        self
    }

    /// Shell-like rendering for logs.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// A result for this invocation that never reached the tool.
    pub fn result(&self, stage: Stage, status: StageStatus) -> StageResult {
        let mut result = StageResult::new(stage, status);
        if let Some(target) = &self.target {
            result = result.with_target(target.clone());
        }
        if let Some(report) = &self.report {
            result = result.with_artifact(report.clone());
        }
        result
    }
}

/// Time budget for one invocation.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionLimits {
    pub stage_timeout: Duration,
    /// Global run deadline.
    pub deadline: Instant,
}

impl ExecutionLimits {
    pub fn new(stage_timeout: Duration, deadline: Instant) -> Self {
        Self {
            stage_timeout,
            deadline,
        }
    }

    /// Limits for a run starting now.
    pub fn starting_now(timeouts: &Timeouts) -> Self {
        Self::new(
            Duration::from_secs(timeouts.stage_secs),
            Instant::now() + Duration::from_secs(timeouts.run_secs),
        )
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn expired(&self) -> bool {
        self.remaining().is_zero()
    }
}

/// Runs one tool invocation for a stage.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(
        &self,
        stage: Stage,
        invocation: &ToolInvocation,
        limits: &ExecutionLimits,
    ) -> Result<StageResult, RunnerError>;
}

/// [`ToolRunner`] backed by child processes.
#[derive(Debug, Clone)]
pub struct ProcessToolRunner {
    layout: ReportLayout,
}

impl ProcessToolRunner {
    pub fn new(layout: ReportLayout) -> Self {
        Self { layout }
    }
}

#[async_trait]
impl ToolRunner for ProcessToolRunner {
    async fn run(
        &self,
        stage: Stage,
        invocation: &ToolInvocation,
        limits: &ExecutionLimits,
    ) -> Result<StageResult, RunnerError> {
        if invocation.program.is_empty() {
            return Err(RunnerError::EmptyCommand(stage));
        }
        if !invocation.working_dir.is_dir() {
            return Err(RunnerError::InvalidWorkingDir(
                invocation.working_dir.clone(),
            ));
        }

        let started_at = Utc::now();
        let start = std::time::Instant::now();

        let remaining = limits.remaining();
        if remaining.is_zero() {
            warn!(stage = %stage, target = ?invocation.target, "Run deadline passed, not starting tool");
            return Ok(cancelled(stage, invocation).with_started_at(started_at));
        }

        tokio::fs::create_dir_all(self.layout.stage_dir(stage)).await?;
        if let Some(parent) = invocation.report.as_ref().and_then(|r| r.parent()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(stage = %stage, target = ?invocation.target, command = %invocation.command_line(), "Running tool");

        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .current_dir(&invocation.working_dir)
            .envs(&invocation.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| RunnerError::ToolUnavailable {
                program: invocation.program.clone(),
                source,
            })?;

        // Whichever bound is tighter decides how an expiry is reported.
        let deadline_bound = remaining < limits.stage_timeout;
        let budget = remaining.min(limits.stage_timeout);

        let output = match tokio::time::timeout(budget, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                let result = if deadline_bound {
                    warn!(stage = %stage, target = ?invocation.target, "Tool cancelled at run deadline");
                    cancelled(stage, invocation)
                } else {
                    warn!(stage = %stage, target = ?invocation.target, timeout_secs = limits.stage_timeout.as_secs(), "Tool timed out");
                    invocation
                        .result(stage, StageStatus::Failure)
                        .with_reason(format!(
                            "timed out after {}s",
                            limits.stage_timeout.as_secs()
                        ))
                };
                return Ok(result
                    .with_duration_ms(duration_ms)
                    .with_started_at(started_at));
            }
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let log_path = self.layout.log_path(stage, invocation.target.as_deref());
        let mut log = format!("$ {}\n", invocation.command_line()).into_bytes();
        log.extend_from_slice(&output.stdout);
        log.extend_from_slice(&output.stderr);
        tokio::fs::write(&log_path, &log).await?;

        if invocation.stdout_is_report {
            if let Some(report) = &invocation.report {
                tokio::fs::write(report, &output.stdout).await?;
            }
        }

        let exit_code = output.status.code();
        let mut result = if output.status.success() {
            invocation.result(stage, StageStatus::Success)
        } else {
            let status = if invocation.non_gating {
                StageStatus::Unstable
            } else {
                StageStatus::Failure
            };
            let reason = match exit_code {
                Some(code) => format!("exited with code {code}"),
                None => "terminated by signal".to_string(),
            };
            debug!(stage = %stage, target = ?invocation.target, %reason, "Tool failed");
            invocation.result(stage, status).with_reason(reason)
        };
        if let Some(code) = exit_code {
            result = result.with_metric(metric::EXIT_CODE, f64::from(code));
        }

        Ok(result
            .with_log(log_path)
            .with_duration_ms(duration_ms)
            .with_started_at(started_at))
    }
}

fn cancelled(stage: Stage, invocation: &ToolInvocation) -> StageResult {
    invocation
        .result(stage, StageStatus::Failure)
        .with_reason(polyci_core::CANCELLED_REASON)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(stage_secs: u64, run: Duration) -> ExecutionLimits {
        ExecutionLimits::new(Duration::from_secs(stage_secs), Instant::now() + run)
    }

    fn runner(dir: &tempfile::TempDir) -> ProcessToolRunner {
        ProcessToolRunner::new(ReportLayout::new(dir.path().join("reports")))
    }

    #[tokio::test]
    async fn test_successful_tool() {
        let dir = tempfile::tempdir().unwrap();
        let invocation =
            ToolInvocation::new("echo", ["hello"], dir.path()).for_target("Calc.Tests");

        let result = runner(&dir)
            .run(Stage::Setup, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .expect("run failed");

        assert_eq!(result.status, StageStatus::Success);
        assert_eq!(result.exit_code(), Some(0));
        assert_eq!(result.target.as_deref(), Some("Calc.Tests"));
        let log = std::fs::read_to_string(result.log.unwrap()).unwrap();
        assert!(log.contains("$ echo hello"));
        assert!(log.contains("hello"));
    }

    #[tokio::test]
    async fn test_failing_tool() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("false", Vec::<String>::new(), dir.path());

        let result = runner(&dir)
            .run(Stage::BuildDotnet, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .expect("run failed");

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.exit_code(), Some(1));
        assert_eq!(result.reason.as_deref(), Some("exited with code 1"));
    }

    #[tokio::test]
    async fn test_non_gating_failure_is_unstable() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("sh", ["-c", "exit 3"], dir.path()).non_gating(true);

        let result = runner(&dir)
            .run(Stage::Lint, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .expect("run failed");

        assert_eq!(result.status, StageStatus::Unstable);
        assert_eq!(result.exit_code(), Some(3));
    }

    #[tokio::test]
    async fn test_expected_report_listed_even_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("reports/sast/semgrep.json");
        let invocation = ToolInvocation::new("true", Vec::<String>::new(), dir.path())
            .with_report(&report);

        let result = runner(&dir)
            .run(Stage::Sast, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .expect("run failed");

        assert_eq!(result.artifacts, vec![report.clone()]);
        assert!(!report.exists());
    }

    #[tokio::test]
    async fn test_stdout_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = dir.path().join("reports/license-check/fossa-test.json");
        let invocation = ToolInvocation::new("echo", [r#"{"issues":[]}"#], dir.path())
            .report_from_stdout(&report);

        runner(&dir)
            .run(Stage::LicenseCheck, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .expect("run failed");

        let content = std::fs::read_to_string(&report).unwrap();
        assert_eq!(content.trim(), r#"{"issues":[]}"#);
    }

    #[tokio::test]
    async fn test_missing_tool_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let invocation =
            ToolInvocation::new("polyci-no-such-tool", Vec::<String>::new(), dir.path());

        let err = runner(&dir)
            .run(Stage::Sast, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_missing_working_dir_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("echo", ["x"], dir.path().join("absent"));

        let err = runner(&dir)
            .run(Stage::Setup, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::InvalidWorkingDir(_)));
    }

    #[tokio::test]
    async fn test_empty_command_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("", Vec::<String>::new(), dir.path());

        let err = runner(&dir)
            .run(Stage::Setup, &invocation, &limits(60, Duration::from_secs(60)))
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::EmptyCommand(Stage::Setup)));
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("sleep", ["5"], dir.path());

        let result = runner(&dir)
            .run(Stage::TestXunit, &invocation, &limits(1, Duration::from_secs(60)))
            .await
            .expect("run failed");

        assert_eq!(result.status, StageStatus::Failure);
        assert_eq!(result.reason.as_deref(), Some("timed out after 1s"));
        assert!(!result.is_cancelled());
    }

    #[tokio::test]
    async fn test_run_deadline_cancels() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("sleep", ["5"], dir.path());

        let result = runner(&dir)
            .run(Stage::Sast, &invocation, &limits(60, Duration::from_millis(200)))
            .await
            .expect("run failed");

        assert!(result.is_cancelled());
    }

    #[tokio::test]
    async fn test_expired_deadline_does_not_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let invocation = ToolInvocation::new("polyci-no-such-tool", Vec::<String>::new(), dir.path());
        let expired = ExecutionLimits::new(Duration::from_secs(60), Instant::now());

        let result = runner(&dir)
            .run(Stage::Sast, &invocation, &expired)
            .await
            .expect("cancelled runs are not errors");

        assert!(result.is_cancelled());
        assert!(result.log.is_none());
    }

    #[test]
    fn test_command_line() {
        let invocation = ToolInvocation::new("dotnet", ["test", "Calc.Tests.csproj"], ".");
        assert_eq!(invocation.command_line(), "dotnet test Calc.Tests.csproj");
    }
}
