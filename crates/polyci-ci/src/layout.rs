//! Where reports and logs land under the report root.
//!
//! Every stage writes only inside its own `<root>/<stage-id>/` directory.

use std::path::{Path, PathBuf};

use polyci_core::Stage;

pub const AGGREGATED_REPORT_FILE: &str = "aggregated-report.json";
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportLayout {
    root: PathBuf,
}

impl ReportLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn stage_dir(&self, stage: Stage) -> PathBuf {
        self.root.join(stage.id())
    }

    /// A report file inside the stage directory.
    pub fn report_path(&self, stage: Stage, file_name: &str) -> PathBuf {
        self.stage_dir(stage).join(file_name)
    }

    /// Captured tool output for one invocation.
    pub fn log_path(&self, stage: Stage, target: Option<&str>) -> PathBuf {
        let name = target.map(sanitize).unwrap_or_else(|| stage.id().to_string());
        self.stage_dir(stage).join(format!("{name}.log"))
    }

    pub fn aggregated_report(&self) -> PathBuf {
        self.root.join(AGGREGATED_REPORT_FILE)
    }

    pub fn summary(&self) -> PathBuf {
        self.root.join(SUMMARY_FILE)
    }
}

/// Make a target name safe to use as a file name.
pub fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "_".to_string()
    } else {
        cleaned
    }
}
