//! Project discovery: find and classify test projects under a source root.
//!
//! Candidates come from three independent filename heuristics (test-named
//! .NET project files, build files under a test directory, JVM build
//! modules). Their union is de-duplicated by path and each candidate is
//! classified by looking for framework markers in its build file.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use polyci_core::{
    BuildSystem, FallbackProject, FrameworkSelection, Platform, ProjectDescriptor, TestFramework,
};

use crate::error::DiscoveryError;

/// Directory names never descended into.
pub const IGNORED_DIRS: &[&str] = &["bin", "obj", "target", "build", "out", "node_modules"];

/// Marker every .NET test project references.
const DOTNET_TEST_SDK: &str = "microsoft.net.test.sdk";

static MAVEN_AGGREGATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<packaging>\s*pom\s*</packaging>")
        .unwrap_or_else(|e| panic!("invalid aggregator pattern: {e}"))
});

/// What discovery found under a source root.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Discovery {
    pub root: PathBuf,
    /// Classified projects accepted by the framework selection.
    pub projects: Vec<ProjectDescriptor>,
    /// Candidates that carried no recognised framework marker.
    pub unrecognized: Vec<ProjectDescriptor>,
    /// Classified projects the framework selection rejected.
    pub filtered: Vec<ProjectDescriptor>,
    /// `.sln` files, used for restore/build/lint when present.
    pub solutions: Vec<PathBuf>,
    /// Whether `projects` came from configured fallback projects.
    pub used_fallback: bool,
}

impl Discovery {
    pub fn projects_for(&self, framework: TestFramework) -> Vec<&ProjectDescriptor> {
        self.projects
            .iter()
            .filter(|p| p.test_framework == framework)
            .collect()
    }

    pub fn has_framework(&self, framework: TestFramework) -> bool {
        self.projects.iter().any(|p| p.test_framework == framework)
    }

    pub fn projects_on(&self, platform: Platform) -> Vec<&ProjectDescriptor> {
        self.projects
            .iter()
            .filter(|p| p.build_system.platform() == platform)
            .collect()
    }

    pub fn has_platform(&self, platform: Platform) -> bool {
        self.projects
            .iter()
            .any(|p| p.build_system.platform() == platform)
    }

    pub fn uses_build_system(&self, build_system: BuildSystem) -> bool {
        self.projects.iter().any(|p| p.build_system == build_system)
    }
}

/// Walks a source tree for test projects.
#[derive(Debug, Clone)]
pub struct ProjectDiscoverer {
    /// Absolute or root-relative report directory, excluded from the walk.
    report_dir: Option<PathBuf>,
}

impl ProjectDiscoverer {
    pub fn new() -> Self {
        Self { report_dir: None }
    }

    /// Exclude the report directory so published artifacts are never rediscovered.
    pub fn with_report_dir(mut self, report_dir: impl Into<PathBuf>) -> Self {
        self.report_dir = Some(report_dir.into());
        self
    }

    /// Discover and classify test projects under `root`.
    ///
    /// When nothing is classified and `hint` is `AUTO`, the configured
    /// fallback projects that exist on disk are used instead.
    pub fn discover(
        &self,
        root: &Path,
        hint: FrameworkSelection,
        fallback: &[FallbackProject],
    ) -> Result<Discovery, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::RootNotFound(root.to_path_buf()));
        }

        let (build_files, solutions) = self.walk(root)?;
        debug!(
            build_files = build_files.len(),
            solutions = solutions.len(),
            "Walked source tree"
        );

        let mut candidates = BTreeSet::new();
        for (heuristic, matches) in [
            ("test-named project", by_project_name(&build_files)),
            ("test directory", by_test_directory(root, &build_files)),
            ("jvm module", jvm_modules(&build_files)),
        ] {
            debug!(heuristic, matches = matches.len(), "Candidate heuristic");
            candidates.extend(matches);
        }

        let mut discovery = Discovery {
            root: root.to_path_buf(),
            solutions,
            ..Default::default()
        };

        for path in candidates {
            let Some(build_system) = BuildSystem::from_path(&path) else {
                continue;
            };
            let content = std::fs::read_to_string(&path).map_err(|source| DiscoveryError::Read {
                path: path.clone(),
                source,
            })?;
            if build_system == BuildSystem::Maven && MAVEN_AGGREGATOR.is_match(&content) {
                debug!(path = %path.display(), "Skipping Maven aggregator pom");
                continue;
            }

            let framework = classify(build_system, &content);
            let project = ProjectDescriptor::new(path, build_system, framework);
            if !project.is_classified() {
                debug!(project = %project, "No test framework marker");
                discovery.unrecognized.push(project);
            } else if hint.accepts(framework) {
                debug!(project = %project, "Accepted test project");
                discovery.projects.push(project);
            } else {
                debug!(project = %project, hint = %hint, "Filtered out by framework selection");
                discovery.filtered.push(project);
            }
        }

        if discovery.projects.is_empty() && hint == FrameworkSelection::Auto {
            let resolved = resolve_fallback(root, fallback);
            if !resolved.is_empty() {
                warn!(
                    projects = resolved.len(),
                    "No test projects classified, using fallback projects"
                );
                discovery.projects = resolved;
                discovery.used_fallback = true;
            }
        }

        if discovery.projects.is_empty() {
            return Err(DiscoveryError::NoProjects {
                root: root.to_path_buf(),
                hint,
            });
        }

        info!(
            projects = discovery.projects.len(),
            unrecognized = discovery.unrecognized.len(),
            filtered = discovery.filtered.len(),
            fallback = discovery.used_fallback,
            "Discovery complete"
        );
        Ok(discovery)
    }

    /// Collect build-unit files and solution files, sorted.
    fn walk(&self, root: &Path) -> Result<(Vec<PathBuf>, Vec<PathBuf>), DiscoveryError> {
        let report_dir = self.report_dir.as_ref().map(|dir| {
            if dir.is_absolute() {
                dir.clone()
            } else {
                root.join(dir)
            }
        });

        let walker = WalkDir::new(root)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_pruned(e, report_dir.as_deref()));

        let mut build_files = Vec::new();
        let mut solutions = Vec::new();
        for entry in walker {
            let entry = entry.map_err(|source| DiscoveryError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.into_path();
            if BuildSystem::from_path(&path).is_some() {
                build_files.push(path);
            } else if has_extension(&path, "sln") {
                solutions.push(path);
            }
        }
        Ok((build_files, solutions))
    }
}

impl Default for ProjectDiscoverer {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify a build file by its framework markers.
///
/// A .NET project is a test project only when it references the test SDK;
/// NUnit is checked before xUnit.
pub fn classify(build_system: BuildSystem, content: &str) -> TestFramework {
    let content = content.to_ascii_lowercase();
    match build_system {
        BuildSystem::Solution => {
            if !content.contains(DOTNET_TEST_SDK) {
                TestFramework::Unknown
            } else if content.contains("nunit") {
                TestFramework::Nunit
            } else if content.contains("xunit") {
                TestFramework::Xunit
            } else {
                TestFramework::Unknown
            }
        }
        BuildSystem::Maven | BuildSystem::Gradle => {
            if content.contains("junit") {
                TestFramework::Junit
            } else {
                TestFramework::Unknown
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Candidate heuristics
// ---------------------------------------------------------------------------

/// .NET project files whose name mentions "test".
fn by_project_name(build_files: &[PathBuf]) -> Vec<PathBuf> {
    build_files
        .iter()
        .filter(|p| BuildSystem::from_path(p) == Some(BuildSystem::Solution))
        .filter(|p| {
            p.file_name()
                .is_some_and(|n| n.to_string_lossy().to_ascii_lowercase().contains("test"))
        })
        .cloned()
        .collect()
}

/// Build files below a directory whose name mentions "test".
fn by_test_directory(root: &Path, build_files: &[PathBuf]) -> Vec<PathBuf> {
    build_files
        .iter()
        .filter(|p| {
            let relative = p.strip_prefix(root).unwrap_or(p);
            relative
                .parent()
                .map(|dir| {
                    dir.components().any(|c| match c {
                        Component::Normal(name) => {
                            name.to_string_lossy().to_ascii_lowercase().contains("test")
                        }
                        _ => false,
                    })
                })
                .unwrap_or(false)
        })
        .cloned()
        .collect()
}

/// Every Maven/Gradle module; JVM tests live beside main code.
fn jvm_modules(build_files: &[PathBuf]) -> Vec<PathBuf> {
    build_files
        .iter()
        .filter(|p| {
            BuildSystem::from_path(p).is_some_and(|bs| bs.platform() == Platform::Jvm)
        })
        .cloned()
        .collect()
}

fn resolve_fallback(root: &Path, fallback: &[FallbackProject]) -> Vec<ProjectDescriptor> {
    fallback
        .iter()
        .filter_map(|f| f.to_descriptor(root))
        .filter(|p| {
            let exists = p.path.is_file();
            if !exists {
                debug!(path = %p.path.display(), "Fallback project does not exist");
            }
            exists
        })
        .collect()
}

fn is_pruned(entry: &DirEntry, report_dir: Option<&Path>) -> bool {
    if !entry.file_type().is_dir() {
        return false;
    }
    if report_dir.is_some_and(|dir| entry.path() == dir) {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || IGNORED_DIRS.contains(&name.as_ref())
}

fn has_extension(path: &Path, ext: &str) -> bool {
    path.extension()
        .is_some_and(|e| e.to_string_lossy().eq_ignore_ascii_case(ext))
}
