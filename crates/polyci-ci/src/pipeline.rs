//! Pipeline orchestration.
//!
//! Discovery, planning, group-by-group stage execution, aggregation,
//! publication and the quality gate for one run over one source tree.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use polyci_core::{
    metric, BuildStatus, Configuration, Outcome, Stage, StageKind, StagePlan, StageResult,
    StageStatus, Verdict,
};

use crate::aggregate::ReportAggregator;
use crate::commands::{self, PlanContext};
use crate::discovery::{Discovery, ProjectDiscoverer};
use crate::error::Result;
use crate::gate::QualityGateEvaluator;
use crate::graph::StageGraph;
use crate::layout::ReportLayout;
use crate::publish::{Publisher, RunSummary};
use crate::runner::{ExecutionLimits, ToolInvocation, ToolRunner};

/// Reason recorded on test and coverage stages skipped after a build failure.
pub const BUILD_FAILED_REASON: &str = "build failed";

/// Result of a complete pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub summary: RunSummary,
    pub aggregated_report_path: PathBuf,
    pub summary_path: PathBuf,
}

impl PipelineRun {
    pub fn verdict(&self) -> &Verdict {
        &self.summary.verdict
    }

    pub fn exit_code(&self) -> u8 {
        self.summary.verdict.exit_code()
    }
}

/// The stages and commands a run would execute, without executing them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanPreview {
    pub discovery: Discovery,
    pub plan: StagePlan,
    pub plan_digest: String,
    pub invocations: Vec<StageInvocations>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageInvocations {
    pub stage: Stage,
    pub invocations: Vec<ToolInvocation>,
}

/// Append-only result log shared by the tasks of a run.
#[derive(Debug, Clone, Default)]
struct ResultLog {
    results: Arc<Mutex<Vec<StageResult>>>,
}

impl ResultLog {
    async fn push(&self, result: StageResult) {
        debug!(stage = %result.stage, target = ?result.target, status = %result.status, "Recorded stage result");
        self.results.lock().await.push(result);
    }

    async fn snapshot(&self) -> Vec<StageResult> {
        self.results.lock().await.clone()
    }

    async fn build_failed(&self) -> bool {
        build_status(&self.results.lock().await) == BuildStatus::Failure
    }
}

/// Build status as seen by the gate: any setup/restore/build invocation
/// that failed on its own. Deadline cancellation is gated separately.
pub fn build_status(results: &[StageResult]) -> BuildStatus {
    let failed = results.iter().any(|r| {
        r.stage.kind() == StageKind::Build && r.status == StageStatus::Failure && !r.is_cancelled()
    });
    if failed {
        BuildStatus::Failure
    } else {
        BuildStatus::Success
    }
}

/// Runs the pipeline against a [`ToolRunner`].
pub struct Orchestrator {
    runner: Arc<dyn ToolRunner>,
}

impl Orchestrator {
    pub fn new(runner: Arc<dyn ToolRunner>) -> Self {
        Self { runner }
    }

    /// Discover and plan without running anything.
    pub fn preview(root: &Path, config: &Configuration) -> Result<PlanPreview> {
        config.validate()?;
        let layout = ReportLayout::new(config.report_root(root));
        let discovery = discover(root, config, &layout)?;
        let plan = StageGraph::active_stages(config, &discovery);
        let ctx = PlanContext::new(root, config.clone(), discovery.clone(), layout);
        let invocations = plan
            .stages()
            .into_iter()
            .map(|stage| StageInvocations {
                stage,
                invocations: commands::plan(stage, &ctx),
            })
            .collect();
        Ok(PlanPreview {
            plan_digest: plan.digest(),
            discovery,
            plan,
            invocations,
        })
    }

    /// Execute a full run and publish its reports.
    ///
    /// Only configuration, discovery and publication failures are errors;
    /// everything a stage does ends up in the returned summary.
    pub async fn run(&self, root: &Path, config: &Configuration) -> Result<PipelineRun> {
        config.validate()?;
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let start = Instant::now();
        let limits = ExecutionLimits::starting_now(&config.timeouts);
        let layout = ReportLayout::new(config.report_root(root));

        info!(run_id = %run_id, root = %root.display(), "Starting pipeline");

        let discovery_started = Utc::now();
        let discovery = discover(root, config, &layout)?;
        let log = ResultLog::default();
        log.push(
            StageResult::success(Stage::Discovery)
                .with_metric(metric::PROJECTS, discovery.projects.len() as f64)
                .with_started_at(discovery_started)
                .with_duration_ms(start.elapsed().as_millis() as u64),
        )
        .await;

        let plan = StageGraph::active_stages(config, &discovery);
        info!(run_id = %run_id, plan_digest = %plan.digest(), "Planned stages:\n{}", plan);

        let ctx = Arc::new(PlanContext::new(
            root,
            config.clone(),
            discovery.clone(),
            layout.clone(),
        ));

        for group in &plan.groups {
            let stages: Vec<Stage> = group
                .stages()
                .iter()
                .copied()
                .filter(|s| s.kind() != StageKind::Internal)
                .collect();
            if stages.is_empty() {
                continue;
            }

            if limits.expired() {
                for stage in stages {
                    warn!(stage = %stage, "Run deadline passed, stage cancelled");
                    log.push(StageResult::cancelled(stage)).await;
                }
                continue;
            }

            let build_failed = log.build_failed().await;
            if stages.len() > 1 {
                info!(stages = ?stages, "Executing concurrent group");
            }
            // One task per stage, even alone; a panic surfaces as a JoinError.
            let tasks: Vec<(Stage, JoinHandle<()>)> = stages
                .iter()
                .map(|&stage| {
                    let task = tokio::spawn(execute_stage(
                        Arc::clone(&self.runner),
                        Arc::clone(&ctx),
                        stage,
                        limits,
                        log.clone(),
                        build_failed,
                    ));
                    (stage, task)
                })
                .collect();

            let joined = futures::future::join_all(
                tasks
                    .into_iter()
                    .map(|(stage, task)| async move { (stage, task.await) }),
            )
            .await;
            for (stage, outcome) in joined {
                if let Err(err) = outcome {
                    warn!(stage = %stage, error = %err, "Stage task did not complete");
                    log.push(StageResult::failure(
                        stage,
                        format!("stage task aborted: {err}"),
                    ))
                    .await;
                }
            }
        }

        let stage_results = log.snapshot().await;
        let build_status = build_status(&stage_results);
        let report = ReportAggregator::merge(&stage_results);
        for warning in &report.warnings {
            warn!(%warning, "Aggregation warning");
        }

        let publish_started = Utc::now();
        let aggregated_report_path = Publisher::write_aggregated(&layout, &report)?;
        log.push(
            StageResult::success(Stage::Publish)
                .with_artifact(&aggregated_report_path)
                .with_started_at(publish_started),
        )
        .await;

        let verdict = QualityGateEvaluator::evaluate(&report, config, build_status);
        log.push(gate_result(&verdict)).await;

        let results = log.snapshot().await;
        let artifacts = Publisher::artifact_manifest(&results);
        let summary = RunSummary {
            run_id,
            started_at,
            finished_at: Utc::now(),
            duration_ms: start.elapsed().as_millis() as u64,
            root: root.to_path_buf(),
            configuration: config.clone(),
            plan_digest: plan.digest(),
            plan,
            discovery,
            results,
            report,
            build_status,
            verdict,
            artifacts,
        };
        let summary_path = Publisher::write_summary(&layout, &summary)?;

        info!(
            run_id = %run_id,
            verdict = %summary.verdict.overall,
            passed = summary.passed_count(),
            failed = summary.failed_count(),
            duration_ms = summary.duration_ms,
            "Pipeline finished"
        );

        Ok(PipelineRun {
            summary,
            aggregated_report_path,
            summary_path,
        })
    }
}

fn discover(root: &Path, config: &Configuration, layout: &ReportLayout) -> Result<Discovery> {
    let discovery = ProjectDiscoverer::new()
        .with_report_dir(layout.root())
        .discover(root, config.test_framework, &config.fallback_projects)?;
    Ok(discovery)
}

/// Run every invocation of one stage, recording each result.
async fn execute_stage(
    runner: Arc<dyn ToolRunner>,
    ctx: Arc<PlanContext>,
    stage: Stage,
    limits: ExecutionLimits,
    log: ResultLog,
    build_failed: bool,
) {
    if build_failed && matches!(stage.kind(), StageKind::Test | StageKind::Coverage) {
        info!(stage = %stage, "Skipping stage after build failure");
        log.push(StageResult::skipped(stage, BUILD_FAILED_REASON))
            .await;
        return;
    }

    let invocations = commands::plan(stage, &ctx);
    if invocations.is_empty() {
        debug!(stage = %stage, "Nothing to run");
        log.push(StageResult::skipped(stage, "no invocations planned"))
            .await;
        return;
    }

    info!(stage = %stage, invocations = invocations.len(), "Executing stage");
    for invocation in &invocations {
        let result = match runner.run(stage, invocation, &limits).await {
            Ok(result) => result,
            Err(err) => {
                warn!(stage = %stage, target = ?invocation.target, error = %err, "Tool invocation failed");
                invocation
                    .result(stage, StageStatus::Failure)
                    .with_reason(err.to_string())
            }
        };
        log.push(result).await;
    }
}

fn gate_result(verdict: &Verdict) -> StageResult {
    let status = match verdict.overall {
        Outcome::Success => StageStatus::Success,
        Outcome::Unstable => StageStatus::Unstable,
        Outcome::Failure => StageStatus::Failure,
    };
    let result = StageResult::new(Stage::QualityGate, status);
    match verdict.reasons.first() {
        Some(reason) => result.with_reason(reason.clone()),
        None => result,
    }
}
