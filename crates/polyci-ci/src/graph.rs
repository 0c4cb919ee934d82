//! Stage topology: which stages are active and how they are grouped.

use polyci_core::{
    Configuration, FrameworkSelection, SecurityScanLevel, Stage, StageGroup, StagePlan,
    TestFramework,
};

use crate::discovery::Discovery;

/// Scheduling layers in pipeline order. Stages within a layer run concurrently.
const LAYERS: &[&[Stage]] = &[
    &[Stage::Discovery],
    &[Stage::Setup],
    &[Stage::Restore],
    &[Stage::BuildDotnet],
    &[Stage::BuildJvm],
    &[Stage::TestNunit, Stage::TestXunit, Stage::TestJunit],
    &[Stage::CoverageDotnet, Stage::CoverageJvm],
    &[
        Stage::DependencyScan,
        Stage::Sast,
        Stage::Lint,
        Stage::SecretsScan,
        Stage::LicenseCheck,
        Stage::ContainerScan,
        Stage::QualityScan,
    ],
    &[Stage::Publish],
    &[Stage::QualityGate],
];

/// Builds the [`StagePlan`] for a run. Pure: no I/O, no state.
pub struct StageGraph;

impl StageGraph {
    /// Active stages grouped in fixed pipeline order; empty layers are dropped.
    pub fn active_stages(config: &Configuration, discovery: &Discovery) -> StagePlan {
        let groups = LAYERS
            .iter()
            .filter_map(|layer| {
                StageGroup::from_stages(
                    layer
                        .iter()
                        .copied()
                        .filter(|stage| Self::is_active(*stage, config, discovery))
                        .collect(),
                )
            })
            .collect();
        StagePlan::new(groups)
    }

    /// Enablement predicate for a single stage.
    pub fn is_active(stage: Stage, config: &Configuration, discovery: &Discovery) -> bool {
        let security = config.enable_security_scan;
        let level = config.security_scan_level;
        match stage {
            Stage::Discovery | Stage::Setup | Stage::Publish | Stage::QualityGate => true,
            Stage::Restore | Stage::BuildDotnet => dotnet_active(config, discovery),
            Stage::BuildJvm => jvm_active(config, discovery),
            Stage::TestNunit => test_active(TestFramework::Nunit, config, discovery),
            Stage::TestXunit => test_active(TestFramework::Xunit, config, discovery),
            Stage::TestJunit => test_active(TestFramework::Junit, config, discovery),
            Stage::CoverageDotnet => config.generate_coverage && dotnet_active(config, discovery),
            Stage::CoverageJvm => config.generate_coverage && jvm_active(config, discovery),
            Stage::DependencyScan => security && level >= SecurityScanLevel::Basic,
            Stage::Sast => security && level >= SecurityScanLevel::Comprehensive,
            Stage::Lint => security && config.enable_linting,
            Stage::SecretsScan => security && config.enable_secrets_scan,
            Stage::LicenseCheck => security && config.enable_license_check,
            Stage::ContainerScan => security && level == SecurityScanLevel::Full,
            Stage::QualityScan => {
                security && level == SecurityScanLevel::Full && config.sonar_host_url.is_some()
            }
        }
    }
}

fn test_active(framework: TestFramework, config: &Configuration, discovery: &Discovery) -> bool {
    let selected = match framework {
        TestFramework::Nunit => matches!(
            config.test_framework,
            FrameworkSelection::Auto | FrameworkSelection::Nunit | FrameworkSelection::Both
        ),
        TestFramework::Xunit => matches!(
            config.test_framework,
            FrameworkSelection::Auto | FrameworkSelection::Xunit | FrameworkSelection::Both
        ),
        TestFramework::Junit => matches!(
            config.test_framework,
            FrameworkSelection::Auto | FrameworkSelection::Junit
        ),
        TestFramework::Unknown => false,
    };
    selected && discovery.has_framework(framework)
}

fn dotnet_active(config: &Configuration, discovery: &Discovery) -> bool {
    test_active(TestFramework::Nunit, config, discovery)
        || test_active(TestFramework::Xunit, config, discovery)
}

fn jvm_active(config: &Configuration, discovery: &Discovery) -> bool {
    test_active(TestFramework::Junit, config, discovery)
}
