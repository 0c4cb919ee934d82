//! Pipeline configuration.
//!
//! A [`Configuration`] is created once at pipeline start (defaults, then an
//! optional TOML file, then explicit overrides) and is immutable afterwards.
//! Every enum-valued option is parsed case-insensitively; an unknown value
//! fails fast with [`ConfigError::InvalidChoice`] before any stage runs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, Level};

use crate::error::{ConfigError, Result};
use crate::project::{BuildSystem, ProjectDescriptor, TestFramework};
use crate::report::Scanner;

/// Default config file name looked up in the source root.
pub const DEFAULT_CONFIG_FILE: &str = "polyci.toml";

// ---------------------------------------------------------------------------
// Enumerated options
// ---------------------------------------------------------------------------

/// A closed set of named values for a configuration option.
pub trait Choice: Copy + Sized + 'static {
    /// Option name used in error messages.
    const OPTION: &'static str;
    const ALL: &'static [Self];

    fn as_str(&self) -> &'static str;
}

/// Parse a [`Choice`] case-insensitively.
pub fn parse_choice<T: Choice>(value: &str) -> Result<T> {
    let wanted = value.trim();
    T::ALL
        .iter()
        .copied()
        .find(|c| c.as_str().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| ConfigError::InvalidChoice {
            option: T::OPTION,
            value: value.to_string(),
            expected: T::ALL
                .iter()
                .map(|c| c.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        })
}

/// `FromStr`, `TryFrom<String>` and `Display` for a [`Choice`] type.
macro_rules! choice_impls {
    ($ty:ty) => {
        impl std::str::FromStr for $ty {
            type Err = $crate::error::ConfigError;

            fn from_str(s: &str) -> std::result::Result<Self, $crate::error::ConfigError> {
                $crate::config::parse_choice(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = $crate::error::ConfigError;

            fn try_from(s: String) -> std::result::Result<Self, $crate::error::ConfigError> {
                $crate::config::parse_choice(&s)
            }
        }

        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str($crate::config::Choice::as_str(self))
            }
        }
    };
}
pub(crate) use choice_impls;

/// Pipeline log verbosity; also drives the verbosity flags passed to tools.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum LogLevel {
    #[default]
    Info,
    Debug,
    Warn,
    Error,
}

impl Choice for LogLevel {
    const OPTION: &'static str = "log level";
    const ALL: &'static [Self] = &[LogLevel::Info, LogLevel::Debug, LogLevel::Warn, LogLevel::Error];

    fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

choice_impls!(LogLevel);

impl LogLevel {
    pub fn tracing_level(&self) -> Level {
        match self {
            LogLevel::Info => Level::INFO,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// Which test frameworks the pipeline should run.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum FrameworkSelection {
    /// Run whatever discovery classifies.
    #[default]
    Auto,
    Nunit,
    Xunit,
    /// NUnit and xUnit.
    Both,
    Junit,
}

impl Choice for FrameworkSelection {
    const OPTION: &'static str = "test framework";
    const ALL: &'static [Self] = &[
        FrameworkSelection::Auto,
        FrameworkSelection::Nunit,
        FrameworkSelection::Xunit,
        FrameworkSelection::Both,
        FrameworkSelection::Junit,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            FrameworkSelection::Auto => "AUTO",
            FrameworkSelection::Nunit => "NUNIT",
            FrameworkSelection::Xunit => "XUNIT",
            FrameworkSelection::Both => "BOTH",
            FrameworkSelection::Junit => "JUNIT",
        }
    }
}

choice_impls!(FrameworkSelection);

impl FrameworkSelection {
    /// Whether projects classified as `framework` may run under this selection.
    pub fn accepts(&self, framework: TestFramework) -> bool {
        match (self, framework) {
            (_, TestFramework::Unknown) => false,
            (FrameworkSelection::Auto, _) => true,
            (FrameworkSelection::Nunit, TestFramework::Nunit) => true,
            (FrameworkSelection::Xunit, TestFramework::Xunit) => true,
            (FrameworkSelection::Both, TestFramework::Nunit | TestFramework::Xunit) => true,
            (FrameworkSelection::Junit, TestFramework::Junit) => true,
            _ => false,
        }
    }
}

/// Breadth of the security analysis group.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum SecurityScanLevel {
    /// Dependency scan.
    #[default]
    Basic,
    /// Adds static analysis.
    Comprehensive,
    /// Adds container/filesystem scanning and SonarQube.
    Full,
}

impl Choice for SecurityScanLevel {
    const OPTION: &'static str = "security scan level";
    const ALL: &'static [Self] = &[
        SecurityScanLevel::Basic,
        SecurityScanLevel::Comprehensive,
        SecurityScanLevel::Full,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            SecurityScanLevel::Basic => "BASIC",
            SecurityScanLevel::Comprehensive => "COMPREHENSIVE",
            SecurityScanLevel::Full => "FULL",
        }
    }
}

choice_impls!(SecurityScanLevel);

// ---------------------------------------------------------------------------
// Nested sections
// ---------------------------------------------------------------------------

/// A project to use when discovery classifies nothing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct FallbackProject {
    /// Build-unit file, relative to the source root.
    pub path: PathBuf,
    pub framework: TestFramework,
    /// Inferred from the file name when omitted.
    #[serde(default)]
    pub build_system: Option<BuildSystem>,
}

impl FallbackProject {
    /// Resolve into a descriptor rooted at `root`.
    pub fn to_descriptor(&self, root: &Path) -> Option<ProjectDescriptor> {
        let build_system = self
            .build_system
            .or_else(|| BuildSystem::from_path(&self.path))?;
        Some(ProjectDescriptor::new(
            root.join(&self.path),
            build_system,
            self.framework,
        ))
    }
}

/// Informational (non-gating) threshold for one scanner.
///
/// Exceeding it degrades the verdict to Unstable, never to Failure.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct InformationalThreshold {
    /// Critical findings tolerated before the run is marked unstable.
    pub max_critical: u32,
    /// Total findings tolerated; unlimited when unset.
    pub max_total: Option<u32>,
}

impl InformationalThreshold {
    pub fn exceeded_by(&self, total: u32, critical: u32) -> bool {
        critical > self.max_critical || self.max_total.is_some_and(|max| total > max)
    }
}

/// Quality-gate policy knobs.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct GateThresholds {
    /// Per-scanner thresholds keyed by scanner id (e.g. `semgrep`).
    pub scanners: BTreeMap<String, InformationalThreshold>,
}

impl GateThresholds {
    pub fn threshold_for(&self, scanner: Scanner) -> InformationalThreshold {
        self.scanners
            .get(scanner.id())
            .copied()
            .unwrap_or_default()
    }
}

/// Time budgets, in seconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Timeouts {
    /// Upper bound for a single tool invocation.
    pub stage_secs: u64,
    /// Wall-clock budget for the whole run.
    pub run_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            stage_secs: 1800,
            run_secs: 3600,
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// The recognised pipeline parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Configuration {
    pub generate_coverage: bool,
    pub fail_on_test_failure: bool,
    pub log_level: LogLevel,
    pub test_framework: FrameworkSelection,
    pub security_scan_level: SecurityScanLevel,
    pub enable_security_scan: bool,
    pub fail_on_security_issues: bool,
    pub enable_linting: bool,
    pub enable_secrets_scan: bool,
    pub enable_license_check: bool,

    pub fallback_projects: Vec<FallbackProject>,
    pub gate: GateThresholds,
    pub timeouts: Timeouts,
    /// Report root, relative to the source root unless absolute.
    pub report_dir: PathBuf,
    /// SonarQube server; the quality scan only runs when set.
    pub sonar_host_url: Option<String>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            generate_coverage: true,
            fail_on_test_failure: true,
            log_level: LogLevel::Info,
            test_framework: FrameworkSelection::Auto,
            security_scan_level: SecurityScanLevel::Basic,
            enable_security_scan: true,
            fail_on_security_issues: false,
            enable_linting: true,
            enable_secrets_scan: true,
            enable_license_check: false,
            fallback_projects: Vec::new(),
            gate: GateThresholds::default(),
            timeouts: Timeouts::default(),
            report_dir: PathBuf::from("reports"),
            sonar_host_url: None,
        }
    }
}

impl Configuration {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Configuration = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file, or defaults when `path` is `None`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_toml_str(&content)
    }

    /// Apply explicit overrides on top of this configuration.
    pub fn with_overrides(mut self, overrides: &ConfigOverrides) -> Result<Self> {
        macro_rules! apply {
            ($($field:ident),* $(,)?) => {
                $(if let Some(value) = overrides.$field.clone() {
                    self.$field = value;
                })*
            };
        }
        apply!(
            generate_coverage,
            fail_on_test_failure,
            log_level,
            test_framework,
            security_scan_level,
            enable_security_scan,
            fail_on_security_issues,
            enable_linting,
            enable_secrets_scan,
            enable_license_check,
            report_dir,
        );
        if let Some(secs) = overrides.stage_timeout_secs {
            self.timeouts.stage_secs = secs;
        }
        if let Some(secs) = overrides.run_timeout_secs {
            self.timeouts.run_secs = secs;
        }
        if let Some(url) = overrides.sonar_host_url.clone() {
            self.sonar_host_url = Some(url);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check cross-field constraints serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.timeouts.stage_secs == 0 || self.timeouts.run_secs == 0 {
            return Err(ConfigError::Invalid(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if self.report_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("report_dir must not be empty".to_string()));
        }
        for key in self.gate.scanners.keys() {
            if Scanner::from_id(key).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "unknown scanner '{}' in gate.scanners (expected one of: {})",
                    key,
                    Scanner::ALL.iter().map(|s| s.id()).collect::<Vec<_>>().join(", ")
                )));
            }
        }
        for fallback in &self.fallback_projects {
            if fallback.framework == TestFramework::Unknown {
                return Err(ConfigError::Invalid(format!(
                    "fallback project {} must name a concrete framework",
                    fallback.path.display()
                )));
            }
            if fallback.build_system.is_none() && BuildSystem::from_path(&fallback.path).is_none()
            {
                return Err(ConfigError::Invalid(format!(
                    "cannot infer build system for fallback project {}",
                    fallback.path.display()
                )));
            }
        }
        Ok(())
    }

    /// Absolute report root for a source tree.
    pub fn report_root(&self, source_root: &Path) -> PathBuf {
        if self.report_dir.is_absolute() {
            self.report_dir.clone()
        } else {
            source_root.join(&self.report_dir)
        }
    }
}

/// Explicitly supplied parameters (CLI flags, environment) that win over the file.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub generate_coverage: Option<bool>,
    pub fail_on_test_failure: Option<bool>,
    pub log_level: Option<LogLevel>,
    pub test_framework: Option<FrameworkSelection>,
    pub security_scan_level: Option<SecurityScanLevel>,
    pub enable_security_scan: Option<bool>,
    pub fail_on_security_issues: Option<bool>,
    pub enable_linting: Option<bool>,
    pub enable_secrets_scan: Option<bool>,
    pub enable_license_check: Option<bool>,
    pub report_dir: Option<PathBuf>,
    pub stage_timeout_secs: Option<u64>,
    pub run_timeout_secs: Option<u64>,
    pub sonar_host_url: Option<String>,
}
