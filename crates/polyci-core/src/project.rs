//! Discovered build units and their classification.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::Choice;

/// Build system that owns a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum BuildSystem {
    /// .NET project built through `dotnet` (usually part of a solution).
    Solution,
    /// Maven module (`pom.xml`).
    Maven,
    /// Gradle module (`build.gradle` / `build.gradle.kts`).
    Gradle,
}

impl BuildSystem {
    /// Infer the build system from a build-unit file name.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_string_lossy().to_ascii_lowercase();
        if name.ends_with(".csproj") || name.ends_with(".fsproj") || name.ends_with(".vbproj") {
            Some(BuildSystem::Solution)
        } else if name == "pom.xml" {
            Some(BuildSystem::Maven)
        } else if name == "build.gradle" || name == "build.gradle.kts" {
            Some(BuildSystem::Gradle)
        } else {
            None
        }
    }

    pub fn platform(&self) -> Platform {
        match self {
            BuildSystem::Solution => Platform::Dotnet,
            BuildSystem::Maven | BuildSystem::Gradle => Platform::Jvm,
        }
    }
}

/// Toolchain family a project or stage belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    Dotnet,
    Jvm,
}

/// Test framework a project was classified as.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum TestFramework {
    Nunit,
    Xunit,
    Junit,
    Unknown,
}

impl Choice for TestFramework {
    const OPTION: &'static str = "test framework";
    const ALL: &'static [Self] = &[
        TestFramework::Nunit,
        TestFramework::Xunit,
        TestFramework::Junit,
        TestFramework::Unknown,
    ];

    fn as_str(&self) -> &'static str {
        match self {
            TestFramework::Nunit => "NUNIT",
            TestFramework::Xunit => "XUNIT",
            TestFramework::Junit => "JUNIT",
            TestFramework::Unknown => "UNKNOWN",
        }
    }
}

crate::config::choice_impls!(TestFramework);

impl TestFramework {
    /// Platform the framework runs on; `None` for unclassified projects.
    pub fn platform(&self) -> Option<Platform> {
        match self {
            TestFramework::Nunit | TestFramework::Xunit => Some(Platform::Dotnet),
            TestFramework::Junit => Some(Platform::Jvm),
            TestFramework::Unknown => None,
        }
    }
}

/// A build/test unit found by discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectDescriptor {
    /// Path to the build-unit file (`.csproj`, `pom.xml`, `build.gradle`).
    pub path: PathBuf,
    pub build_system: BuildSystem,
    pub test_framework: TestFramework,
    /// Short display name, also used to name per-project report files.
    pub name: String,
}

impl ProjectDescriptor {
    pub fn new(path: PathBuf, build_system: BuildSystem, test_framework: TestFramework) -> Self {
        let name = project_name(&path, build_system);
        Self {
            path,
            build_system,
            test_framework,
            name,
        }
    }

    /// Directory containing the build-unit file.
    pub fn dir(&self) -> &Path {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn is_classified(&self) -> bool {
        self.test_framework != TestFramework::Unknown
    }
}

impl fmt::Display for ProjectDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] ({})",
            self.name,
            self.test_framework,
            self.path.display()
        )
    }
}

/// .NET projects are named after their project file, JVM modules after their directory.
fn project_name(path: &Path, build_system: BuildSystem) -> String {
    let from_dir = || {
        path.parent()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().to_string())
    };
    let from_stem = || path.file_stem().map(|n| n.to_string_lossy().to_string());

    let name = match build_system {
        BuildSystem::Solution => from_stem(),
        BuildSystem::Maven | BuildSystem::Gradle => from_dir().or_else(from_stem),
    };
    name.filter(|n| !n.is_empty())
        .unwrap_or_else(|| "root".to_string())
}
