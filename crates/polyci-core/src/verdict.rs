//! Final three-state build outcome.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Overall outcome, matching the host engine's three-state build result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Unstable,
    Failure,
}

impl Outcome {
    /// Process exit code: 0 only for success.
    pub fn exit_code(&self) -> u8 {
        match self {
            Outcome::Success => 0,
            Outcome::Failure => 1,
            Outcome::Unstable => 2,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Success => "SUCCESS",
            Outcome::Unstable => "UNSTABLE",
            Outcome::Failure => "FAILURE",
        };
        f.write_str(s)
    }
}

/// Status of the setup/restore/build phase as seen by the gate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Success,
    Failure,
}

/// The gate's decision. Computed once per run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Verdict {
    pub overall: Outcome,
    pub reasons: Vec<String>,
}

impl Verdict {
    pub fn is_success(&self) -> bool {
        self.overall == Outcome::Success
    }

    pub fn exit_code(&self) -> u8 {
        self.overall.exit_code()
    }
}
