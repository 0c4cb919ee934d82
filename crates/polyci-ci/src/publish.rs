//! Report publication: aggregated report, run summary and artifact manifest.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use uuid::Uuid;
use walkdir::WalkDir;

use polyci_core::{
    AggregatedReport, BuildStatus, Configuration, Stage, StagePlan, StageResult, StageStatus,
    Verdict,
};

use crate::discovery::Discovery;
use crate::error::{OrchestrationError, Result};
use crate::layout::ReportLayout;

/// One archived file with its content digest.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub stage: Stage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    pub path: PathBuf,
    pub sha256: String,
    pub bytes: u64,
}

/// Everything a run produced, written to `summary.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub root: PathBuf,
    pub configuration: Configuration,
    pub plan: StagePlan,
    pub plan_digest: String,
    pub discovery: Discovery,
    pub results: Vec<StageResult>,
    pub report: AggregatedReport,
    pub build_status: BuildStatus,
    pub verdict: Verdict,
    pub artifacts: Vec<ArtifactRecord>,
}

impl RunSummary {
    pub fn passed_count(&self) -> usize {
        self.results.iter().filter(|r| r.passed()).count()
    }

    pub fn failed_count(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.status == StageStatus::Failure)
            .count()
    }

    /// Load a previously written summary.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read(path).map_err(|source| OrchestrationError::Publish {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(serde_json::from_slice(&content)?)
    }
}

pub struct Publisher;

impl Publisher {
    pub fn write_aggregated(layout: &ReportLayout, report: &AggregatedReport) -> Result<PathBuf> {
        let path = layout.aggregated_report();
        write_json(&path, report)?;
        info!(path = %path.display(), "Wrote aggregated report");
        Ok(path)
    }

    pub fn write_summary(layout: &ReportLayout, summary: &RunSummary) -> Result<PathBuf> {
        let path = layout.summary();
        write_json(&path, summary)?;
        info!(path = %path.display(), artifacts = summary.artifacts.len(), "Wrote run summary");
        Ok(path)
    }

    /// Digest every report and log the results point at that exists on disk.
    ///
    /// Directory artifacts (e.g. Surefire report folders) contribute each file
    /// inside them. The manifest is sorted by path.
    pub fn artifact_manifest(results: &[StageResult]) -> Vec<ArtifactRecord> {
        let mut records: BTreeMap<PathBuf, ArtifactRecord> = BTreeMap::new();
        for result in results {
            for path in result.artifacts.iter().chain(result.log.iter()) {
                for file in files_under(path) {
                    if records.contains_key(&file) {
                        continue;
                    }
                    match digest_file(&file) {
                        Ok((sha256, bytes)) => {
                            records.insert(
                                file.clone(),
                                ArtifactRecord {
                                    stage: result.stage,
                                    target: result.target.clone(),
                                    path: file,
                                    sha256,
                                    bytes,
                                },
                            );
                        }
                        Err(err) => {
                            debug!(path = %file.display(), error = %err, "Skipping unreadable artifact")
                        }
                    }
                }
            }
        }
        records.into_values().collect()
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let publish_err = |source| OrchestrationError::Publish {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(publish_err)?;
    }
    let mut content = serde_json::to_vec_pretty(value)?;
    content.push(b'\n');
    std::fs::write(path, content).map_err(publish_err)
}

fn files_under(path: &Path) -> Vec<PathBuf> {
    if path.is_file() {
        return vec![path.to_path_buf()];
    }
    if !path.is_dir() {
        return Vec::new();
    }
    WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect()
}

fn digest_file(path: &Path) -> std::io::Result<(String, u64)> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let bytes = std::io::copy(&mut file, &mut hasher)?;
    Ok((hex::encode(hasher.finalize()), bytes))
}
