//! Tool invocations per stage.
//!
//! Maps each stage onto the external commands that implement it for the
//! discovered projects. Every report path lives under the stage's own
//! report directory, except where a build tool fixes the location inside
//! the project (Surefire, JaCoCo, Checkstyle).

use std::path::{Path, PathBuf};

use polyci_core::{
    BuildSystem, Configuration, LogLevel, Platform, ProjectDescriptor, Stage, TestFramework,
};

use crate::discovery::Discovery;
use crate::graph::StageGraph;
use crate::layout::{sanitize, ReportLayout};
use crate::runner::ToolInvocation;

/// Everything needed to turn a stage into invocations.
#[derive(Debug, Clone)]
pub struct PlanContext {
    pub root: PathBuf,
    pub config: Configuration,
    pub discovery: Discovery,
    pub layout: ReportLayout,
}

impl PlanContext {
    pub fn new(
        root: impl Into<PathBuf>,
        config: Configuration,
        discovery: Discovery,
        layout: ReportLayout,
    ) -> Self {
        Self {
            root: root.into(),
            config,
            discovery,
            layout,
        }
    }

    fn stage_active(&self, stage: Stage) -> bool {
        StageGraph::is_active(stage, &self.config, &self.discovery)
    }

    fn tests_gate(&self) -> bool {
        self.config.fail_on_test_failure
    }

    fn security_gates(&self) -> bool {
        self.config.fail_on_security_issues
    }

    fn jvm_projects(&self) -> Vec<&ProjectDescriptor> {
        self.discovery.projects_on(Platform::Jvm)
    }

    /// Solutions when any exist, otherwise the .NET test projects themselves.
    fn dotnet_build_units(&self) -> Vec<(String, PathBuf)> {
        let solutions = &self.discovery.solutions;
        if !solutions.is_empty() {
            return solutions
                .iter()
                .map(|sln| {
                    let stem = file_stem(sln);
                    let shared = solutions.iter().filter(|s| file_stem(s) == stem).count() > 1;
                    let name = if shared { self.qualified(sln, &stem) } else { stem };
                    (name, sln.clone())
                })
                .collect();
        }
        self.discovery
            .projects_on(Platform::Dotnet)
            .into_iter()
            .map(|p| (self.target_name(p), p.path.clone()))
            .collect()
    }

    /// The target an invocation runs for. Names file paths under the report
    /// root, so it is unique across discovered projects.
    fn target_name(&self, project: &ProjectDescriptor) -> String {
        let shared = self
            .discovery
            .projects
            .iter()
            .filter(|p| p.name == project.name)
            .count()
            > 1;
        if shared {
            self.qualified(&project.path, &project.name)
        } else {
            project.name.clone()
        }
    }

    /// Root-relative directory of `path`, or `name` for files at the root.
    fn qualified(&self, path: &Path, name: &str) -> String {
        let dir = path.parent().unwrap_or(path);
        match dir.strip_prefix(&self.root) {
            Ok(relative) if !relative.as_os_str().is_empty() => {
                relative.to_string_lossy().replace('\\', "/")
            }
            _ => name.to_string(),
        }
    }
}

/// Invocations for one stage, in execution order.
///
/// Internal stages (discovery, publish, quality gate) have none.
pub fn plan(stage: Stage, ctx: &PlanContext) -> Vec<ToolInvocation> {
    match stage {
        Stage::Discovery | Stage::Publish | Stage::QualityGate => Vec::new(),
        Stage::Setup => setup(ctx),
        Stage::Restore => restore(ctx),
        Stage::BuildDotnet => build_dotnet(ctx),
        Stage::BuildJvm => build_jvm(ctx),
        Stage::TestNunit => test_dotnet(TestFramework::Nunit, stage, ctx),
        Stage::TestXunit => test_dotnet(TestFramework::Xunit, stage, ctx),
        Stage::TestJunit => test_jvm(ctx),
        Stage::CoverageDotnet => coverage_dotnet(ctx),
        Stage::CoverageJvm => coverage_jvm(ctx),
        Stage::DependencyScan => dependency_scan(ctx),
        Stage::Sast => sast(ctx),
        Stage::Lint => lint(ctx),
        Stage::SecretsScan => secrets_scan(ctx),
        Stage::LicenseCheck => license_check(ctx),
        Stage::ContainerScan => container_scan(ctx),
        Stage::QualityScan => quality_scan(ctx),
    }
}

// ---------------------------------------------------------------------------
// Verbosity
// ---------------------------------------------------------------------------

fn dotnet_verbosity(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Debug => "detailed",
        LogLevel::Info => "minimal",
        LogLevel::Warn | LogLevel::Error => "quiet",
    }
}

fn maven_args(level: LogLevel, pom: &Path) -> Vec<String> {
    let mut args = vec!["-B".to_string()];
    match level {
        LogLevel::Debug => args.push("-X".to_string()),
        LogLevel::Info => {}
        LogLevel::Warn | LogLevel::Error => args.push("-q".to_string()),
    }
    args.push("-f".to_string());
    args.push(path_arg(pom));
    args
}

fn gradle_args(level: LogLevel, dir: &Path) -> Vec<String> {
    let mut args = vec!["-p".to_string(), path_arg(dir)];
    match level {
        LogLevel::Debug => args.push("--info".to_string()),
        LogLevel::Info => {}
        LogLevel::Warn | LogLevel::Error => args.push("--quiet".to_string()),
    }
    args
}

// ---------------------------------------------------------------------------
// Setup and build
// ---------------------------------------------------------------------------

fn setup(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let mut invocations = Vec::new();
    if ctx.discovery.has_platform(Platform::Dotnet) {
        invocations.push(ToolInvocation::new("dotnet", ["--info"], &ctx.root).for_target("dotnet"));
    }
    if ctx.discovery.uses_build_system(BuildSystem::Maven) {
        invocations.push(ToolInvocation::new("mvn", ["-v"], &ctx.root).for_target("maven"));
    }
    if ctx.discovery.uses_build_system(BuildSystem::Gradle) {
        invocations
            .push(ToolInvocation::new("gradle", ["--version"], &ctx.root).for_target("gradle"));
    }
    invocations
}

fn restore(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let verbosity = dotnet_verbosity(ctx.config.log_level);
    ctx.dotnet_build_units()
        .into_iter()
        .map(|(name, unit)| {
            ToolInvocation::new(
                "dotnet",
                [
                    "restore".to_string(),
                    path_arg(&unit),
                    "--verbosity".to_string(),
                    verbosity.to_string(),
                ],
                &ctx.root,
            )
            .for_target(name)
        })
        .collect()
}

fn build_dotnet(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let verbosity = dotnet_verbosity(ctx.config.log_level);
    ctx.dotnet_build_units()
        .into_iter()
        .map(|(name, unit)| {
            ToolInvocation::new(
                "dotnet",
                [
                    "build".to_string(),
                    path_arg(&unit),
                    "--no-restore".to_string(),
                    "--configuration".to_string(),
                    "Release".to_string(),
                    "--verbosity".to_string(),
                    verbosity.to_string(),
                ],
                &ctx.root,
            )
            .for_target(name)
        })
        .collect()
}

fn build_jvm(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let level = ctx.config.log_level;
    ctx.jvm_projects()
        .into_iter()
        .map(|project| {
            let (program, args) = match project.build_system {
                BuildSystem::Gradle => {
                    let mut args = gradle_args(level, project.dir());
                    args.push("testClasses".to_string());
                    ("gradle", args)
                }
                _ => {
                    let mut args = maven_args(level, &project.path);
                    args.push("-DskipTests".to_string());
                    args.push("test-compile".to_string());
                    ("mvn", args)
                }
            };
            ToolInvocation::new(program, args, &ctx.root)
                .for_target(ctx.target_name(project))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests and coverage
// ---------------------------------------------------------------------------

fn test_dotnet(framework: TestFramework, stage: Stage, ctx: &PlanContext) -> Vec<ToolInvocation> {
    let results_dir = ctx.layout.stage_dir(stage);
    let verbosity = dotnet_verbosity(ctx.config.log_level);
    ctx.discovery
        .projects_for(framework)
        .into_iter()
        .map(|project| {
            let target = ctx.target_name(project);
            let trx_name = format!("{}.trx", sanitize(&target));
            let mut args = vec![
                "test".to_string(),
                path_arg(&project.path),
                "--no-build".to_string(),
                "--configuration".to_string(),
                "Release".to_string(),
                "--logger".to_string(),
                format!("trx;LogFileName={trx_name}"),
                "--results-directory".to_string(),
                path_arg(&results_dir),
                "--verbosity".to_string(),
                verbosity.to_string(),
            ];
            if ctx.config.generate_coverage {
                args.push("--collect".to_string());
                args.push("XPlat Code Coverage".to_string());
            }
            ToolInvocation::new("dotnet", args, &ctx.root)
                .for_target(target)
                .with_report(results_dir.join(trx_name))
                .non_gating(!ctx.tests_gate())
        })
        .collect()
}

fn test_jvm(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let level = ctx.config.log_level;
    let coverage = ctx.config.generate_coverage;
    ctx.discovery
        .projects_for(TestFramework::Junit)
        .into_iter()
        .map(|project| {
            let (program, args, report) = match project.build_system {
                BuildSystem::Gradle => {
                    let mut args = gradle_args(level, project.dir());
                    args.push("test".to_string());
                    args.push("--continue".to_string());
                    ("gradle", args, project.dir().join("build/test-results/test"))
                }
                _ => {
                    let mut args = maven_args(level, &project.path);
                    if coverage {
                        args.push("org.jacoco:jacoco-maven-plugin:prepare-agent".to_string());
                    }
                    args.push("test".to_string());
                    ("mvn", args, project.dir().join("target/surefire-reports"))
                }
            };
            ToolInvocation::new(program, args, &ctx.root)
                .for_target(ctx.target_name(project))
                .with_report(report)
                .non_gating(!ctx.tests_gate())
        })
        .collect()
}

fn coverage_dotnet(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let patterns: Vec<String> = [Stage::TestNunit, Stage::TestXunit]
        .into_iter()
        .filter(|s| ctx.stage_active(*s))
        .map(|s| format!("{}/**/coverage.cobertura.xml", ctx.layout.stage_dir(s).display()))
        .collect();
    if patterns.is_empty() {
        return Vec::new();
    }

    let target_dir = ctx.layout.stage_dir(Stage::CoverageDotnet);
    vec![ToolInvocation::new(
        "reportgenerator",
        [
            format!("-reports:{}", patterns.join(";")),
            format!("-targetdir:{}", target_dir.display()),
            "-reporttypes:Cobertura".to_string(),
        ],
        &ctx.root,
    )
    .for_target("reportgenerator")
    .with_report(target_dir.join("Cobertura.xml"))]
}

fn coverage_jvm(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let level = ctx.config.log_level;
    ctx.discovery
        .projects_for(TestFramework::Junit)
        .into_iter()
        .map(|project| {
            let (program, args, report) = match project.build_system {
                BuildSystem::Gradle => {
                    let mut args = gradle_args(level, project.dir());
                    args.push("jacocoTestReport".to_string());
                    (
                        "gradle",
                        args,
                        project
                            .dir()
                            .join("build/reports/jacoco/test/jacocoTestReport.xml"),
                    )
                }
                _ => {
                    let mut args = maven_args(level, &project.path);
                    args.push("org.jacoco:jacoco-maven-plugin:report".to_string());
                    ("mvn", args, project.dir().join("target/site/jacoco/jacoco.xml"))
                }
            };
            ToolInvocation::new(program, args, &ctx.root)
                .for_target(ctx.target_name(project))
                .with_report(report)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Security and quality
// ---------------------------------------------------------------------------

fn dependency_scan(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let out = ctx.layout.stage_dir(Stage::DependencyScan);
    vec![ToolInvocation::new(
        "dependency-check",
        [
            "--scan".to_string(),
            path_arg(&ctx.root),
            "--project".to_string(),
            project_label(&ctx.root),
            "--format".to_string(),
            "JSON".to_string(),
            "--out".to_string(),
            path_arg(&out),
        ],
        &ctx.root,
    )
    .for_target("dependency-check")
    .with_report(out.join("dependency-check-report.json"))
    .non_gating(!ctx.security_gates())]
}

fn sast(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let report = ctx.layout.report_path(Stage::Sast, "semgrep.json");
    vec![ToolInvocation::new(
        "semgrep",
        [
            "scan".to_string(),
            "--config".to_string(),
            "auto".to_string(),
            "--json".to_string(),
            "--output".to_string(),
            path_arg(&report),
            "--error".to_string(),
            path_arg(&ctx.root),
        ],
        &ctx.root,
    )
    .for_target("semgrep")
    .with_report(report)
    .non_gating(!ctx.security_gates())]
}

/// Lint findings never gate.
fn lint(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let level = ctx.config.log_level;
    let mut invocations = Vec::new();

    if ctx.discovery.has_platform(Platform::Dotnet) {
        for (name, unit) in ctx.dotnet_build_units() {
            let report_dir = ctx.layout.stage_dir(Stage::Lint).join(sanitize(&name));
            invocations.push(
                ToolInvocation::new(
                    "dotnet",
                    [
                        "format".to_string(),
                        path_arg(&unit),
                        "--verify-no-changes".to_string(),
                        "--report".to_string(),
                        path_arg(&report_dir),
                    ],
                    &ctx.root,
                )
                .for_target(name)
                .with_report(report_dir.join("format-report.json"))
                .non_gating(true),
            );
        }
    }

    for project in ctx.jvm_projects() {
        let (program, args, report) = match project.build_system {
            BuildSystem::Gradle => {
                let mut args = gradle_args(level, project.dir());
                args.push("checkstyleMain".to_string());
                (
                    "gradle",
                    args,
                    project.dir().join("build/reports/checkstyle/main.xml"),
                )
            }
            _ => {
                let mut args = maven_args(level, &project.path);
                args.push("checkstyle:check".to_string());
                ("mvn", args, project.dir().join("target/checkstyle-result.xml"))
            }
        };
        invocations.push(
            ToolInvocation::new(program, args, &ctx.root)
                .for_target(ctx.target_name(project))
                .with_report(report)
                .non_gating(true),
        );
    }

    invocations
}

fn secrets_scan(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let report = ctx.layout.report_path(Stage::SecretsScan, "gitleaks.json");
    vec![ToolInvocation::new(
        "gitleaks",
        [
            "detect".to_string(),
            "--source".to_string(),
            path_arg(&ctx.root),
            "--report-format".to_string(),
            "json".to_string(),
            "--report-path".to_string(),
            path_arg(&report),
            "--redact".to_string(),
            "--no-banner".to_string(),
        ],
        &ctx.root,
    )
    .for_target("gitleaks")
    .with_report(report)
    .non_gating(!ctx.security_gates())]
}

fn license_check(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let report = ctx.layout.report_path(Stage::LicenseCheck, "fossa-test.json");
    vec![
        ToolInvocation::new("fossa", ["analyze"], &ctx.root)
            .for_target("fossa-analyze")
            .non_gating(!ctx.security_gates()),
        ToolInvocation::new("fossa", ["test", "--format", "json"], &ctx.root)
            .for_target("fossa-test")
            .report_from_stdout(report)
            .non_gating(!ctx.security_gates()),
    ]
}

fn container_scan(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let report = ctx.layout.report_path(Stage::ContainerScan, "trivy.json");
    vec![ToolInvocation::new(
        "trivy",
        [
            "fs".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--output".to_string(),
            path_arg(&report),
            "--skip-dirs".to_string(),
            path_arg(ctx.layout.root()),
            "--exit-code".to_string(),
            "1".to_string(),
            path_arg(&ctx.root),
        ],
        &ctx.root,
    )
    .for_target("trivy")
    .with_report(report)
    .non_gating(!ctx.security_gates())]
}

/// SonarQube keeps its results server-side; only the exit status is local.
fn quality_scan(ctx: &PlanContext) -> Vec<ToolInvocation> {
    let Some(host) = ctx.config.sonar_host_url.as_deref() else {
        return Vec::new();
    };
    let mut args = vec![
        format!("-Dsonar.host.url={host}"),
        format!("-Dsonar.projectBaseDir={}", ctx.root.display()),
        "-Dsonar.qualitygate.wait=true".to_string(),
    ];
    if ctx.config.log_level == LogLevel::Debug {
        args.push("-X".to_string());
    }
    vec![ToolInvocation::new("sonar-scanner", args, &ctx.root)
        .for_target("sonarqube")
        .non_gating(!ctx.security_gates())]
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| path_arg(path))
}

fn project_label(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "project".to_string())
}
