//! Stage catalog and the execution plan shape.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::project::Platform;
use crate::report::Scanner;

/// Every stage the pipeline can declare.
///
/// The variant order is the fixed pipeline order; no stage runs before a
/// stage declared earlier.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Discovery,
    Setup,
    /// `dotnet restore`
    Restore,
    BuildDotnet,
    BuildJvm,
    TestNunit,
    TestXunit,
    TestJunit,
    CoverageDotnet,
    CoverageJvm,
    DependencyScan,
    Sast,
    Lint,
    SecretsScan,
    LicenseCheck,
    ContainerScan,
    QualityScan,
    Publish,
    QualityGate,
}

/// Coarse grouping used for ordering and for gate decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// Runs inside the orchestrator (discovery, publish, gate).
    Internal,
    /// Setup, restore and build; a failure here is a build failure.
    Build,
    Test,
    Coverage,
    Security,
}

impl Stage {
    pub const ALL: &'static [Stage] = &[
        Stage::Discovery,
        Stage::Setup,
        Stage::Restore,
        Stage::BuildDotnet,
        Stage::BuildJvm,
        Stage::TestNunit,
        Stage::TestXunit,
        Stage::TestJunit,
        Stage::CoverageDotnet,
        Stage::CoverageJvm,
        Stage::DependencyScan,
        Stage::Sast,
        Stage::Lint,
        Stage::SecretsScan,
        Stage::LicenseCheck,
        Stage::ContainerScan,
        Stage::QualityScan,
        Stage::Publish,
        Stage::QualityGate,
    ];

    /// Stable identifier, also the name of the stage's report directory.
    pub fn id(&self) -> &'static str {
        match self {
            Stage::Discovery => "discovery",
            Stage::Setup => "setup",
            Stage::Restore => "restore",
            Stage::BuildDotnet => "build-dotnet",
            Stage::BuildJvm => "build-jvm",
            Stage::TestNunit => "test-nunit",
            Stage::TestXunit => "test-xunit",
            Stage::TestJunit => "test-junit",
            Stage::CoverageDotnet => "coverage-dotnet",
            Stage::CoverageJvm => "coverage-jvm",
            Stage::DependencyScan => "dependency-scan",
            Stage::Sast => "sast",
            Stage::Lint => "lint",
            Stage::SecretsScan => "secrets-scan",
            Stage::LicenseCheck => "license-check",
            Stage::ContainerScan => "container-scan",
            Stage::QualityScan => "quality-scan",
            Stage::Publish => "publish",
            Stage::QualityGate => "quality-gate",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.id() == id)
    }

    pub fn kind(&self) -> StageKind {
        match self {
            Stage::Discovery | Stage::Publish | Stage::QualityGate => StageKind::Internal,
            Stage::Setup | Stage::Restore | Stage::BuildDotnet | Stage::BuildJvm => {
                StageKind::Build
            }
            Stage::TestNunit | Stage::TestXunit | Stage::TestJunit => StageKind::Test,
            Stage::CoverageDotnet | Stage::CoverageJvm => StageKind::Coverage,
            Stage::DependencyScan
            | Stage::Sast
            | Stage::Lint
            | Stage::SecretsScan
            | Stage::LicenseCheck
            | Stage::ContainerScan
            | Stage::QualityScan => StageKind::Security,
        }
    }

    /// Toolchain-specific stages; `None` for platform-neutral ones.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            Stage::Restore | Stage::BuildDotnet | Stage::TestNunit | Stage::TestXunit => {
                Some(Platform::Dotnet)
            }
            Stage::CoverageDotnet => Some(Platform::Dotnet),
            Stage::BuildJvm | Stage::TestJunit | Stage::CoverageJvm => Some(Platform::Jvm),
            _ => None,
        }
    }

    /// Scanner whose findings this stage reports.
    pub fn scanner(&self) -> Option<Scanner> {
        match self {
            Stage::DependencyScan => Some(Scanner::DependencyCheck),
            Stage::Sast => Some(Scanner::Semgrep),
            Stage::Lint => Some(Scanner::Lint),
            Stage::SecretsScan => Some(Scanner::Gitleaks),
            Stage::LicenseCheck => Some(Scanner::Fossa),
            Stage::ContainerScan => Some(Scanner::Trivy),
            Stage::QualityScan => Some(Scanner::Sonarqube),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

/// One scheduling unit of the plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "mode", content = "stages", rename_all = "snake_case")]
pub enum StageGroup {
    Single(Stage),
    /// Stages with no relative ordering; failures are isolated per stage.
    Concurrent(Vec<Stage>),
}

impl StageGroup {
    /// Group a set of stages, collapsing a lone stage into `Single`.
    ///
    /// Returns `None` for an empty set.
    pub fn from_stages(mut stages: Vec<Stage>) -> Option<Self> {
        stages.sort();
        stages.dedup();
        match stages.len() {
            0 => None,
            1 => Some(StageGroup::Single(stages[0])),
            _ => Some(StageGroup::Concurrent(stages)),
        }
    }

    pub fn stages(&self) -> &[Stage] {
        match self {
            StageGroup::Single(stage) => std::slice::from_ref(stage),
            StageGroup::Concurrent(stages) => stages,
        }
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }
}

/// Ordered list of groups the orchestrator executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StagePlan {
    pub groups: Vec<StageGroup>,
}

impl StagePlan {
    pub fn new(groups: Vec<StageGroup>) -> Self {
        Self { groups }
    }

    /// All active stages in plan order.
    pub fn stages(&self) -> Vec<Stage> {
        self.groups
            .iter()
            .flat_map(|g| g.stages().iter().copied())
            .collect()
    }

    pub fn contains(&self, stage: Stage) -> bool {
        self.groups.iter().any(|g| g.contains(stage))
    }

    /// The group a stage belongs to, if active.
    pub fn group_of(&self, stage: Stage) -> Option<&StageGroup> {
        self.groups.iter().find(|g| g.contains(stage))
    }

    /// Deterministic digest of the ordered plan.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        for group in &self.groups {
            match group {
                StageGroup::Single(_) => hasher.update(b"single:"),
                StageGroup::Concurrent(_) => hasher.update(b"concurrent:"),
            }
            for stage in group.stages() {
                hasher.update(stage.id().as_bytes());
                hasher.update(b"\0");
            }
            hasher.update(b"\n");
        }
        hex::encode(hasher.finalize())
    }
}

impl fmt::Display for StagePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, group) in self.groups.iter().enumerate() {
            let names: Vec<&str> = group.stages().iter().map(|s| s.id()).collect();
            match group {
                StageGroup::Single(_) => writeln!(f, "{:>2}. {}", idx + 1, names[0])?,
                StageGroup::Concurrent(_) => {
                    writeln!(f, "{:>2}. parallel [{}]", idx + 1, names.join(", "))?
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_ids_roundtrip() {
        for stage in Stage::ALL {
            assert_eq!(Stage::from_id(stage.id()), Some(*stage));
        }
    }

    #[test]
    fn test_stage_serde_uses_id() {
        let json = serde_json::to_string(&Stage::TestNunit).unwrap();
        assert_eq!(json, "\"test-nunit\"");
        let back: Stage = serde_json::from_str("\"secrets-scan\"").unwrap();
        assert_eq!(back, Stage::SecretsScan);
    }

    #[test]
    fn test_all_is_in_declaration_order() {
        let mut sorted = Stage::ALL.to_vec();
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
    }

    #[test]
    fn test_group_from_stages() {
        assert_eq!(StageGroup::from_stages(vec![]), None);
        assert_eq!(
            StageGroup::from_stages(vec![Stage::TestJunit]),
            Some(StageGroup::Single(Stage::TestJunit))
        );
        assert_eq!(
            StageGroup::from_stages(vec![Stage::TestXunit, Stage::TestNunit]),
            Some(StageGroup::Concurrent(vec![Stage::TestNunit, Stage::TestXunit]))
        );
    }

    #[test]
    fn test_plan_digest_is_order_sensitive() {
        let a = StagePlan::new(vec![
            StageGroup::Single(Stage::Discovery),
            StageGroup::Single(Stage::Setup),
        ]);
        let b = StagePlan::new(vec![
            StageGroup::Single(Stage::Setup),
            StageGroup::Single(Stage::Discovery),
        ]);
        assert_eq!(a.digest(), a.clone().digest());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn test_stage_kinds() {
        assert_eq!(Stage::BuildJvm.kind(), StageKind::Build);
        assert_eq!(Stage::Lint.kind(), StageKind::Security);
        assert_eq!(Stage::Lint.scanner(), Some(Scanner::Lint));
        assert_eq!(Stage::TestXunit.platform(), Some(Platform::Dotnet));
        assert_eq!(Stage::DependencyScan.platform(), None);
    }
}
