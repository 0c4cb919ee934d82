//! polyci - polyglot CI pipeline orchestrator
//!
//! ## Commands
//!
//! - `run`: discover, execute every active stage and evaluate the quality gate
//! - `discover`: list the test projects found under a source root
//! - `plan`: show the stage plan and tool commands without running them
//! - `gate`: re-evaluate the quality gate for a published `summary.json`
//!
//! The process exit code is the verdict: 0 SUCCESS, 2 UNSTABLE, 1 FAILURE.
//! Errors that stop the pipeline before a verdict exits with 1.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};

use polyci_ci::{
    Discovery, Orchestrator, PlanPreview, ProcessToolRunner, QualityGateEvaluator, ReportLayout,
    RunSummary,
};
use polyci_core::{
    ConfigOverrides, Configuration, FrameworkSelection, LogLevel, Outcome, SecurityScanLevel,
    StageStatus, Verdict, DEFAULT_CONFIG_FILE,
};

#[derive(Parser)]
#[command(name = "polyci")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Polyglot CI pipeline orchestrator and quality gate", long_about = None)]
struct Cli {
    /// Enable verbose output (forces log level DEBUG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Configuration file (default: polyci.toml in the source root, if present)
    #[arg(short, long, global = true, env = "POLYCI_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline and evaluate the quality gate
    Run {
        /// Source root (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,
    },

    /// Discover and classify test projects
    Discover {
        /// Source root (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Show the stage plan and tool commands without executing them
    Plan {
        /// Source root (default: current directory)
        #[arg(default_value = ".")]
        root: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },

    /// Re-evaluate the quality gate for a published run summary
    Gate {
        /// Path to summary.json
        summary: PathBuf,

        #[command(flatten)]
        overrides: OverrideArgs,

        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

/// Pipeline parameters; each wins over the configuration file.
#[derive(Debug, Default, Args)]
struct OverrideArgs {
    /// Collect and merge code coverage
    #[arg(long, env = "POLYCI_GENERATE_COVERAGE", value_name = "BOOL")]
    generate_coverage: Option<bool>,

    /// Fail the gate when any test fails
    #[arg(long, env = "POLYCI_FAIL_ON_TEST_FAILURE", value_name = "BOOL")]
    fail_on_test_failure: Option<bool>,

    /// INFO, DEBUG, WARN or ERROR
    #[arg(long, env = "POLYCI_LOG_LEVEL")]
    log_level: Option<LogLevel>,

    /// AUTO, NUNIT, XUNIT, BOTH or JUNIT
    #[arg(long, env = "POLYCI_TEST_FRAMEWORK")]
    test_framework: Option<FrameworkSelection>,

    /// BASIC, COMPREHENSIVE or FULL
    #[arg(long, env = "POLYCI_SECURITY_SCAN_LEVEL")]
    security_scan_level: Option<SecurityScanLevel>,

    /// Run the security analysis group
    #[arg(long, env = "POLYCI_ENABLE_SECURITY_SCAN", value_name = "BOOL")]
    enable_security_scan: Option<bool>,

    /// Fail the gate on critical security findings
    #[arg(long, env = "POLYCI_FAIL_ON_SECURITY_ISSUES", value_name = "BOOL")]
    fail_on_security_issues: Option<bool>,

    /// Run the lint stage
    #[arg(long, env = "POLYCI_ENABLE_LINTING", value_name = "BOOL")]
    enable_linting: Option<bool>,

    /// Run the secrets scan
    #[arg(long, env = "POLYCI_ENABLE_SECRETS_SCAN", value_name = "BOOL")]
    enable_secrets_scan: Option<bool>,

    /// Run the license check
    #[arg(long, env = "POLYCI_ENABLE_LICENSE_CHECK", value_name = "BOOL")]
    enable_license_check: Option<bool>,

    /// Report directory, relative to the source root unless absolute
    #[arg(long, env = "POLYCI_REPORT_DIR")]
    report_dir: Option<PathBuf>,

    /// Per-invocation timeout in seconds
    #[arg(long, env = "POLYCI_STAGE_TIMEOUT", value_name = "SECS")]
    stage_timeout: Option<u64>,

    /// Whole-run timeout in seconds
    #[arg(long, env = "POLYCI_RUN_TIMEOUT", value_name = "SECS")]
    run_timeout: Option<u64>,

    /// SonarQube server URL; enables the quality scan at FULL level
    #[arg(long, env = "SONAR_HOST_URL")]
    sonar_host_url: Option<String>,
}

impl OverrideArgs {
    fn to_overrides(&self, verbose: bool) -> ConfigOverrides {
        ConfigOverrides {
            generate_coverage: self.generate_coverage,
            fail_on_test_failure: self.fail_on_test_failure,
            log_level: if verbose {
                Some(LogLevel::Debug)
            } else {
                self.log_level
            },
            test_framework: self.test_framework,
            security_scan_level: self.security_scan_level,
            enable_security_scan: self.enable_security_scan,
            fail_on_security_issues: self.fail_on_security_issues,
            enable_linting: self.enable_linting,
            enable_secrets_scan: self.enable_secrets_scan,
            enable_license_check: self.enable_license_check,
            report_dir: self.report_dir.clone(),
            stage_timeout_secs: self.stage_timeout,
            run_timeout_secs: self.run_timeout,
            sonar_host_url: self.sonar_host_url.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match dispatch(cli).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(Outcome::Failure.exit_code())
        }
    }
}

async fn dispatch(cli: Cli) -> Result<u8> {
    let config_file = cli.config.as_deref();
    match &cli.command {
        Commands::Run { root, overrides } => {
            let root = source_root(root)?;
            let config = resolve_config(config_file, Some(&root), overrides, cli.verbose)?;
            polyci_core::init_tracing(cli.json, config.log_level);
            cmd_run(&root, &config).await
        }
        Commands::Discover {
            root,
            overrides,
            output,
        } => {
            let root = source_root(root)?;
            let config = resolve_config(config_file, Some(&root), overrides, cli.verbose)?;
            polyci_core::init_tracing(cli.json, config.log_level);
            cmd_discover(&root, &config, *output)
        }
        Commands::Plan {
            root,
            overrides,
            output,
        } => {
            let root = source_root(root)?;
            let config = resolve_config(config_file, Some(&root), overrides, cli.verbose)?;
            polyci_core::init_tracing(cli.json, config.log_level);
            cmd_plan(&root, &config, *output)
        }
        Commands::Gate {
            summary,
            overrides,
            output,
        } => {
            let level = if cli.verbose {
                LogLevel::Debug
            } else {
                overrides.log_level.unwrap_or_default()
            };
            polyci_core::init_tracing(cli.json, level);
            cmd_gate(summary, config_file, overrides, cli.verbose, *output)
        }
    }
}

fn source_root(root: &Path) -> Result<PathBuf> {
    std::fs::canonicalize(root)
        .with_context(|| format!("Source root {} is not accessible", root.display()))
}

/// Defaults, then the config file, then flags and environment.
fn resolve_config(
    config_file: Option<&Path>,
    root: Option<&Path>,
    overrides: &OverrideArgs,
    verbose: bool,
) -> Result<Configuration> {
    let default_file = root
        .map(|r| r.join(DEFAULT_CONFIG_FILE))
        .filter(|p| p.is_file());
    let file = config_file.map(Path::to_path_buf).or(default_file);

    let config = Configuration::load(file.as_deref())
        .with_context(|| match &file {
            Some(path) => format!("Failed to load configuration from {}", path.display()),
            None => "Invalid default configuration".to_string(),
        })?
        .with_overrides(&overrides.to_overrides(verbose))
        .context("Invalid configuration override")?;
    Ok(config)
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

/// Run the full pipeline
async fn cmd_run(root: &Path, config: &Configuration) -> Result<u8> {
    let layout = ReportLayout::new(config.report_root(root));
    let runner = Arc::new(ProcessToolRunner::new(layout));

    println!("Running pipeline for: {}", root.display());
    println!();

    let run = Orchestrator::new(runner)
        .run(root, config)
        .await
        .context("Pipeline aborted")?;
    let summary = &run.summary;

    println!("Run ID: {}", summary.run_id);
    println!("Plan: {}", summary.plan_digest);
    println!("Duration: {}ms", summary.duration_ms);
    println!();

    for result in &summary.results {
        let mark = match result.status {
            StageStatus::Success => "✓",
            StageStatus::Failure => "✗",
            StageStatus::Unstable => "!",
            StageStatus::Skipped => "-",
        };
        let reason = result
            .reason
            .as_deref()
            .map(|r| format!(": {r}"))
            .unwrap_or_default();
        println!(
            "  {} {} [{}] ({}ms){}",
            mark,
            result.label(),
            result.status,
            result.duration_ms,
            reason
        );
    }

    println!();
    let tests = &summary.report.test_totals;
    println!(
        "Tests: {} total, {} passed, {} failed, {} skipped",
        tests.total, tests.passed, tests.failed, tests.skipped
    );
    match summary.report.coverage_percent {
        Some(percent) => println!("Coverage: {percent:.2}%"),
        None => println!("Coverage: n/a"),
    }
    for (scanner, counts) in &summary.report.security_findings {
        println!(
            "Findings: {}: {} total, {} critical",
            scanner, counts.total, counts.critical
        );
    }
    for warning in &summary.report.warnings {
        println!("Warning: {warning}");
    }
    println!(
        "Summary: {}/{} stage results passed",
        summary.passed_count(),
        summary.results.len()
    );

    println!();
    print_verdict(&summary.verdict);
    println!();
    println!("Aggregated report: {}", run.aggregated_report_path.display());
    println!("Run summary: {}", run.summary_path.display());

    Ok(run.exit_code())
}

/// List discovered projects
fn cmd_discover(root: &Path, config: &Configuration, output: OutputFormat) -> Result<u8> {
    let preview = Orchestrator::preview(root, config).context("Discovery failed")?;
    let discovery = &preview.discovery;

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(discovery)?);
        return Ok(0);
    }

    print_discovery(discovery);
    Ok(0)
}

/// Show the plan without executing it
fn cmd_plan(root: &Path, config: &Configuration, output: OutputFormat) -> Result<u8> {
    let preview = Orchestrator::preview(root, config).context("Planning failed")?;

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&preview)?);
        return Ok(0);
    }

    print_plan(&preview);
    Ok(0)
}

/// Re-evaluate the gate for a published summary, optionally under a different policy
fn cmd_gate(
    summary_path: &Path,
    config_file: Option<&Path>,
    overrides: &OverrideArgs,
    verbose: bool,
    output: OutputFormat,
) -> Result<u8> {
    let summary = RunSummary::load(summary_path)
        .with_context(|| format!("Failed to read run summary {}", summary_path.display()))?;

    let base = match config_file {
        Some(path) => Configuration::load(Some(path))
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => summary.configuration.clone(),
    };
    let config = base
        .with_overrides(&overrides.to_overrides(verbose))
        .context("Invalid configuration override")?;
    debug!(run_id = %summary.run_id, "Re-evaluating quality gate");

    let verdict = QualityGateEvaluator::evaluate(&summary.report, &config, summary.build_status);
    info!(
        run_id = %summary.run_id,
        recorded = %summary.verdict.overall,
        evaluated = %verdict.overall,
        "Gate re-evaluated"
    );

    if output == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("Run ID: {}", summary.run_id);
        if verdict.overall != summary.verdict.overall {
            println!("Recorded verdict: {}", summary.verdict.overall);
        }
        print_verdict(&verdict);
    }
    Ok(verdict.exit_code())
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn print_discovery(discovery: &Discovery) {
    println!("Source root: {}", discovery.root.display());
    if discovery.used_fallback {
        println!("Using configured fallback projects");
    }
    println!("Test projects ({}):", discovery.projects.len());
    for project in &discovery.projects {
        println!("  ✓ {}", project);
    }
    if !discovery.filtered.is_empty() {
        println!("Filtered by framework selection ({}):", discovery.filtered.len());
        for project in &discovery.filtered {
            println!("  - {}", project);
        }
    }
    if !discovery.unrecognized.is_empty() {
        println!("Unrecognized ({}):", discovery.unrecognized.len());
        for project in &discovery.unrecognized {
            println!("  ? {}", project);
        }
    }
    for solution in &discovery.solutions {
        println!("Solution: {}", solution.display());
    }
}

fn print_plan(preview: &PlanPreview) {
    print_discovery(&preview.discovery);
    println!();
    println!("Plan {}:", preview.plan_digest);
    println!("{}", preview.plan);
    for stage in &preview.invocations {
        if stage.invocations.is_empty() {
            continue;
        }
        println!("{}:", stage.stage);
        for invocation in &stage.invocations {
            let gating = if invocation.non_gating {
                " (non-gating)"
            } else {
                ""
            };
            println!("  $ {}{}", invocation.command_line(), gating);
        }
    }
}

fn print_verdict(verdict: &Verdict) {
    let mark = match verdict.overall {
        Outcome::Success => "✓",
        Outcome::Unstable => "!",
        Outcome::Failure => "✗",
    };
    println!("Verdict: {} {}", mark, verdict.overall);
    if !verdict.reasons.is_empty() {
        println!("Reasons:");
        for reason in &verdict.reasons {
            println!("  - {}", reason);
        }
    }
}
