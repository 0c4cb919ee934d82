//! polyci CI - pipeline orchestration and quality gate
//!
//! Given a source tree and a [`polyci_core::Configuration`], this crate:
//! - Discovers .NET and JVM test projects and their frameworks
//! - Plans the active stages and their concurrent groups
//! - Runs each stage's tools with per-stage and per-run time limits
//! - Merges every report into one aggregated report
//! - Decides SUCCESS / UNSTABLE / FAILURE and publishes `summary.json`

pub mod aggregate;
pub mod commands;
pub mod discovery;
pub mod error;
pub mod gate;
pub mod graph;
pub mod layout;
pub mod parsers;
pub mod pipeline;
pub mod publish;
pub mod runner;

// Re-export key types
pub use aggregate::ReportAggregator;
pub use commands::PlanContext;
pub use discovery::{Discovery, ProjectDiscoverer};
pub use error::{DiscoveryError, OrchestrationError, Result, RunnerError};
pub use gate::QualityGateEvaluator;
pub use graph::StageGraph;
pub use layout::ReportLayout;
pub use parsers::{parse_report, Contribution, ParseError, ReportFormat};
pub use pipeline::{build_status, Orchestrator, PipelineRun, PlanPreview, StageInvocations};
pub use publish::{ArtifactRecord, Publisher, RunSummary};
pub use runner::{ExecutionLimits, ProcessToolRunner, ToolInvocation, ToolRunner};
