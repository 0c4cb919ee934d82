//! Integration tests for the orchestrator with a scripted tool runner.

use async_trait::async_trait;
use polyci_ci::{
    ExecutionLimits, OrchestrationError, Orchestrator, RunSummary, RunnerError, ToolInvocation,
    ToolRunner,
};
use polyci_core::{
    metric, BuildStatus, Configuration, FallbackProject, FrameworkSelection, Outcome, Scanner,
    Stage, StageKind, StageResult, StageStatus, TestFramework, Timeouts,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

const NUNIT_PROJECT: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Microsoft.NET.Test.Sdk" Version="17.8.0" />
    <PackageReference Include="NUnit" Version="3.14.0" />
  </ItemGroup>
</Project>"#;

const XUNIT_PROJECT: &str = r#"<Project Sdk="Microsoft.NET.Sdk">
  <ItemGroup>
    <PackageReference Include="Microsoft.NET.Test.Sdk" Version="17.8.0" />
    <PackageReference Include="xunit" Version="2.6.2" />
  </ItemGroup>
</Project>"#;

const MAVEN_PROJECT: &str = r#"<project>
  <artifactId>calc</artifactId>
  <dependencies>
    <dependency><groupId>org.junit.jupiter</groupId><artifactId>junit-jupiter</artifactId></dependency>
  </dependencies>
</project>"#;

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn nunit_tree() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "tests/Calculator.Tests/Calculator.Tests.csproj",
        NUNIT_PROJECT,
    );
    dir
}

/// Canned outcome for one stage.
#[derive(Debug, Clone, Copy, Default)]
struct Script {
    passed: u64,
    failed: u64,
    critical: u64,
    fail: bool,
    delay_ms: u64,
}

/// Fake runner: answers every invocation from a per-stage script and
/// records what it was asked to run.
#[derive(Default)]
struct ScriptedRunner {
    scripts: HashMap<Stage, Script>,
    calls: Mutex<Vec<(Stage, Option<String>)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedRunner {
    fn with(mut self, stage: Stage, script: Script) -> Self {
        self.scripts.insert(stage, script);
        self
    }

    async fn stages_called(&self) -> Vec<Stage> {
        self.calls.lock().await.iter().map(|(s, _)| *s).collect()
    }
}

#[async_trait]
impl ToolRunner for ScriptedRunner {
    async fn run(
        &self,
        stage: Stage,
        invocation: &ToolInvocation,
        _limits: &ExecutionLimits,
    ) -> Result<StageResult, RunnerError> {
        self.calls
            .lock()
            .await
            .push((stage, invocation.target.clone()));
        let script = self.scripts.get(&stage).copied().unwrap_or(Script {
            passed: 1,
            ..Default::default()
        });

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if script.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(script.delay_ms)).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let failed_tool = script.fail || (stage.kind() == StageKind::Test && script.failed > 0);
        let status = match (failed_tool, invocation.non_gating) {
            (false, _) => StageStatus::Success,
            (true, true) => StageStatus::Unstable,
            (true, false) => StageStatus::Failure,
        };
        let mut result = invocation.result(stage, status);
        if failed_tool {
            result = result.with_reason("exited with code 1");
        }
        result = match stage.kind() {
            StageKind::Test => result
                .with_metric(metric::TESTS_PASSED, script.passed as f64)
                .with_metric(metric::TESTS_FAILED, script.failed as f64)
                .with_metric(metric::TESTS_SKIPPED, 0.0),
            StageKind::Coverage => result
                .with_metric(metric::COVERAGE_LINES_COVERED, 80.0)
                .with_metric(metric::COVERAGE_LINES_VALID, 100.0),
            StageKind::Security => result
                .with_metric(metric::FINDINGS_TOTAL, script.critical as f64)
                .with_metric(metric::FINDINGS_CRITICAL, script.critical as f64),
            _ => result,
        };
        Ok(result)
    }
}

/// Panics whenever it is asked to run `stage`.
struct PanickingRunner {
    stage: Stage,
    inner: ScriptedRunner,
}

#[async_trait]
impl ToolRunner for PanickingRunner {
    async fn run(
        &self,
        stage: Stage,
        invocation: &ToolInvocation,
        limits: &ExecutionLimits,
    ) -> Result<StageResult, RunnerError> {
        if stage == self.stage {
            panic!("runner crashed on {stage}");
        }
        self.inner.run(stage, invocation, limits).await
    }
}

async fn run(
    root: &Path,
    config: &Configuration,
    runner: Arc<ScriptedRunner>,
) -> polyci_ci::PipelineRun {
    Orchestrator::new(runner)
        .run(root, config)
        .await
        .expect("pipeline failed to run")
}

/// Test: one failing NUnit test fails the gate
#[tokio::test]
async fn test_failing_test_fails_gate() {
    let tree = nunit_tree();
    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::TestNunit,
        Script {
            passed: 9,
            failed: 1,
            ..Default::default()
        },
    ));

    let run = run(tree.path(), &Configuration::default(), runner).await;

    assert_eq!(run.verdict().overall, Outcome::Failure);
    assert_eq!(run.verdict().reasons[0], "1 test(s) failed");
    assert_eq!(run.exit_code(), 1);
    assert_eq!(run.summary.report.test_totals.total, 10);
    assert_eq!(run.summary.build_status, BuildStatus::Success);
}

/// Test: all green run succeeds
#[tokio::test]
async fn test_clean_run_succeeds() {
    let tree = nunit_tree();
    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::TestNunit,
        Script {
            passed: 12,
            ..Default::default()
        },
    ));

    let run = run(tree.path(), &Configuration::default(), runner.clone()).await;

    assert_eq!(run.verdict().overall, Outcome::Success, "{:?}", run.verdict());
    assert!(run.verdict().reasons.is_empty());
    assert_eq!(run.exit_code(), 0);
    assert_eq!(run.summary.report.coverage_percent, Some(80.0));
    assert_eq!(run.summary.failed_count(), 0);

    let called = runner.stages_called().await;
    assert!(called.contains(&Stage::Setup));
    assert!(called.contains(&Stage::BuildDotnet));
    assert!(called.contains(&Stage::TestNunit));
    assert!(!called.contains(&Stage::TestJunit));
    assert!(!called.contains(&Stage::Sast));
}

/// Test: failing tests only degrade to UNSTABLE when they do not gate
#[tokio::test]
async fn test_failing_tests_not_gating() {
    let tree = nunit_tree();
    let config = Configuration {
        fail_on_test_failure: false,
        ..Default::default()
    };
    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::TestNunit,
        Script {
            passed: 4,
            failed: 2,
            ..Default::default()
        },
    ));

    let run = run(tree.path(), &config, runner).await;

    assert_eq!(run.verdict().overall, Outcome::Unstable);
    assert_eq!(run.exit_code(), 2);
    assert!(run
        .verdict()
        .reasons
        .contains(&"2 test(s) failed (not gating)".to_string()));
    let nunit = run
        .summary
        .results
        .iter()
        .find(|r| r.stage == Stage::TestNunit)
        .unwrap();
    assert_eq!(nunit.status, StageStatus::Unstable);
}

/// Test: critical findings are informational unless security gates
#[tokio::test]
async fn test_critical_findings() {
    let tree = nunit_tree();
    let scripted = || {
        Arc::new(ScriptedRunner::default().with(
            Stage::DependencyScan,
            Script {
                critical: 3,
                ..Default::default()
            },
        ))
    };

    let lenient = run(tree.path(), &Configuration::default(), scripted()).await;
    assert_eq!(lenient.verdict().overall, Outcome::Unstable);
    assert_eq!(
        lenient
            .summary
            .report
            .security_findings
            .get(&Scanner::DependencyCheck)
            .map(|c| c.critical),
        Some(3)
    );

    let strict = Configuration {
        fail_on_security_issues: true,
        ..Default::default()
    };
    let gated = run(tree.path(), &strict, scripted()).await;
    assert_eq!(gated.verdict().overall, Outcome::Failure);
    assert_eq!(
        gated.verdict().reasons[0],
        "dependency-check: 3 critical finding(s)"
    );
}

/// Test: a build failure skips tests and coverage but not security
#[tokio::test]
async fn test_build_failure_skips_tests() {
    let tree = nunit_tree();
    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::BuildDotnet,
        Script {
            fail: true,
            ..Default::default()
        },
    ));

    let run = run(tree.path(), &Configuration::default(), runner.clone()).await;

    assert_eq!(run.summary.build_status, BuildStatus::Failure);
    assert_eq!(run.verdict().overall, Outcome::Failure);
    assert_eq!(run.verdict().reasons[0], "build failed");

    let status_of = |stage| {
        run.summary
            .results
            .iter()
            .find(|r| r.stage == stage)
            .map(|r| (r.status, r.reason.clone()))
    };
    assert_eq!(
        status_of(Stage::TestNunit),
        Some((StageStatus::Skipped, Some("build failed".to_string())))
    );
    assert_eq!(
        status_of(Stage::CoverageDotnet).map(|(s, _)| s),
        Some(StageStatus::Skipped)
    );

    let called = runner.stages_called().await;
    assert!(!called.contains(&Stage::TestNunit));
    assert!(called.contains(&Stage::DependencyScan));
}

/// Test: stages of one group run concurrently
#[tokio::test]
async fn test_concurrent_group() {
    let tree = nunit_tree();
    write(
        tree.path(),
        "tests/Calculator.XTests/Calculator.XTests.csproj",
        XUNIT_PROJECT,
    );
    let slow = Script {
        passed: 3,
        delay_ms: 200,
        ..Default::default()
    };
    let runner = Arc::new(
        ScriptedRunner::default()
            .with(Stage::TestNunit, slow)
            .with(Stage::TestXunit, slow),
    );

    let run = run(tree.path(), &Configuration::default(), runner.clone()).await;

    assert!(runner.max_in_flight.load(Ordering::SeqCst) >= 2);
    assert_eq!(run.summary.report.test_totals.total, 6);
    assert_eq!(run.verdict().overall, Outcome::Success, "{:?}", run.verdict());
}

/// Test: nothing starts once the run deadline has passed
#[tokio::test]
async fn test_run_deadline_cancels_remaining_stages() {
    let tree = nunit_tree();
    let config = Configuration {
        timeouts: Timeouts {
            stage_secs: 60,
            run_secs: 1,
        },
        ..Default::default()
    };
    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::BuildDotnet,
        Script {
            delay_ms: 1200,
            ..Default::default()
        },
    ));

    let run = run(tree.path(), &config, runner.clone()).await;

    let nunit = run
        .summary
        .results
        .iter()
        .find(|r| r.stage == Stage::TestNunit)
        .unwrap();
    assert!(nunit.is_cancelled());
    // The build itself succeeded; the cut-off gates on its own.
    assert_eq!(run.summary.build_status, BuildStatus::Success);
    assert_eq!(run.verdict().overall, Outcome::Failure);
    assert_eq!(run.verdict().reasons[0], "run cancelled at deadline");
    assert!(!run.verdict().reasons.contains(&"build failed".to_string()));
    assert!(!runner.stages_called().await.contains(&Stage::TestNunit));
    // Reports are still published.
    assert!(run.summary_path.is_file());
}

/// Test: a panic inside a single-stage group is recorded and the run still publishes
#[tokio::test]
async fn test_panicking_stage_is_recorded_as_failure() {
    let tree = nunit_tree();
    let runner = Arc::new(PanickingRunner {
        stage: Stage::TestNunit,
        inner: ScriptedRunner::default(),
    });

    let run = Orchestrator::new(runner)
        .run(tree.path(), &Configuration::default())
        .await
        .expect("pipeline failed to run");

    assert!(!run.summary.plan.groups.iter().any(|g| {
        g.stages().contains(&Stage::TestNunit) && g.stages().len() > 1
    }));
    let nunit = run
        .summary
        .results
        .iter()
        .find(|r| r.stage == Stage::TestNunit)
        .unwrap();
    assert_eq!(nunit.status, StageStatus::Failure);
    assert!(nunit
        .reason
        .as_deref()
        .is_some_and(|r| r.starts_with("stage task aborted")));
    assert!(run.summary_path.is_file());
    assert_eq!(
        run.summary.results.last().map(|r| r.stage),
        Some(Stage::QualityGate)
    );
    assert!(run.summary.report.stage_issues.iter().any(|i| i.stage == Stage::TestNunit));
}

/// Test: projects sharing a name never share report or log paths
#[tokio::test]
async fn test_same_named_projects_keep_separate_reports() {
    let dir = tempfile::tempdir().unwrap();
    write(dir.path(), "a/Calc.Tests/Calc.Tests.csproj", NUNIT_PROJECT);
    write(dir.path(), "b/Calc.Tests/Calc.Tests.csproj", NUNIT_PROJECT);
    let config = Configuration::default();

    let preview = Orchestrator::preview(dir.path(), &config).unwrap();
    let nunit = preview
        .invocations
        .iter()
        .find(|s| s.stage == Stage::TestNunit)
        .unwrap();
    assert_eq!(nunit.invocations.len(), 2);
    let reports: Vec<_> = nunit.invocations.iter().map(|i| i.report.clone()).collect();
    assert_ne!(reports[0], reports[1]);

    let runner = Arc::new(ScriptedRunner::default().with(
        Stage::TestNunit,
        Script {
            passed: 2,
            ..Default::default()
        },
    ));
    let run = run(dir.path(), &config, runner.clone()).await;

    let mut targets: Vec<_> = runner
        .calls
        .lock()
        .await
        .iter()
        .filter(|(stage, _)| *stage == Stage::TestNunit)
        .filter_map(|(_, target)| target.clone())
        .collect();
    targets.sort();
    assert_eq!(targets, vec!["a/Calc.Tests", "b/Calc.Tests"]);
    assert_eq!(run.summary.report.test_totals.total, 4);
}

/// Test: summary.json and the aggregated report are written and reloadable
#[tokio::test]
async fn test_summary_published() {
    let tree = nunit_tree();
    let runner = Arc::new(ScriptedRunner::default());

    let run = run(tree.path(), &Configuration::default(), runner).await;

    assert_eq!(
        run.summary_path,
        tree.path().join("reports").join("summary.json")
    );
    assert!(run.aggregated_report_path.is_file());

    let loaded = RunSummary::load(&run.summary_path).unwrap();
    assert_eq!(loaded.run_id, run.summary.run_id);
    assert_eq!(loaded.verdict, run.summary.verdict);
    assert_eq!(loaded.plan_digest, run.summary.plan_digest);
    assert_eq!(loaded.results.first().map(|r| r.stage), Some(Stage::Discovery));
    assert_eq!(loaded.results.last().map(|r| r.stage), Some(Stage::QualityGate));
    assert!(loaded
        .artifacts
        .iter()
        .any(|a| a.path == run.aggregated_report_path));
}

/// Test: a JUnit-only selection plans only JVM stages
#[tokio::test]
async fn test_junit_preview() {
    let tree = nunit_tree();
    write(tree.path(), "java/calc/pom.xml", MAVEN_PROJECT);
    let config = Configuration {
        test_framework: FrameworkSelection::Junit,
        ..Default::default()
    };

    let preview = Orchestrator::preview(tree.path(), &config).unwrap();

    assert!(preview.plan.contains(Stage::BuildJvm));
    assert!(preview.plan.contains(Stage::TestJunit));
    assert!(!preview.plan.contains(Stage::BuildDotnet));
    assert!(!preview.plan.contains(Stage::TestNunit));
    assert_eq!(preview.discovery.projects.len(), 1);
    assert_eq!(preview.discovery.filtered.len(), 1);

    let junit = preview
        .invocations
        .iter()
        .find(|s| s.stage == Stage::TestJunit)
        .unwrap();
    assert_eq!(junit.invocations.len(), 1);
    assert_eq!(junit.invocations[0].program, "mvn");
    assert_eq!(junit.invocations[0].target.as_deref(), Some("calc"));
}

/// Test: fallback projects are used when nothing is classified
#[tokio::test]
async fn test_fallback_projects() {
    let dir = tempfile::tempdir().unwrap();
    write(
        dir.path(),
        "src/Legacy/Legacy.csproj",
        r#"<Project Sdk="Microsoft.NET.Sdk" />"#,
    );
    let config = Configuration {
        fallback_projects: vec![FallbackProject {
            path: "src/Legacy/Legacy.csproj".into(),
            framework: TestFramework::Nunit,
            build_system: None,
        }],
        ..Default::default()
    };

    let run = run(dir.path(), &config, Arc::new(ScriptedRunner::default())).await;

    assert!(run.summary.discovery.used_fallback);
    assert!(run.summary.plan.contains(Stage::TestNunit));
}

/// Test: an empty tree fails closed before any tool runs
#[tokio::test]
async fn test_no_projects_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::default());

    let err = Orchestrator::new(runner.clone())
        .run(dir.path(), &Configuration::default())
        .await
        .unwrap_err();

    assert!(matches!(err, OrchestrationError::Discovery(_)), "{err}");
    assert!(runner.stages_called().await.is_empty());
}
