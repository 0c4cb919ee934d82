//! polyci core - domain values for the pipeline orchestrator.
//!
//! Everything here is an immutable value object threaded through the
//! orchestration layer (`polyci-ci`):
//! - [`Configuration`]: the pipeline parameters
//! - [`ProjectDescriptor`]: a discovered build/test unit
//! - [`StagePlan`]: the ordered, grouped set of active stages
//! - [`StageResult`], [`AggregatedReport`], [`Verdict`]: what a run produces

pub mod config;
pub mod error;
pub mod project;
pub mod report;
pub mod result;
pub mod stage;
pub mod telemetry;
pub mod verdict;

pub use config::{
    ConfigOverrides, Configuration, FallbackProject, FrameworkSelection, GateThresholds,
    InformationalThreshold, LogLevel, SecurityScanLevel, Timeouts, DEFAULT_CONFIG_FILE,
};
pub use error::{ConfigError, Result};
pub use project::{BuildSystem, Platform, ProjectDescriptor, TestFramework};
pub use report::{AggregatedReport, FindingCounts, Scanner, StageIssue, TestTotals};
pub use result::{metric, StageResult, StageStatus, CANCELLED_REASON};
pub use stage::{Stage, StageGroup, StageKind, StagePlan};
pub use telemetry::init_tracing;
pub use verdict::{BuildStatus, Outcome, Verdict};
