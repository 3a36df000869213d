//! Core types for tripdata-sync

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Calendar month a dataset export covers
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    /// Four-digit year
    pub year: i32,
    /// Month of the year, 1-12
    pub month: u32,
}

impl Period {
    /// Create a new Period
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month)
    }
}

/// One remote file to move from the source into the destination bucket
///
/// Every field is derived from the catalog parameters; `(category, period)`
/// identifies a task uniquely within a run.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileTask {
    /// Dataset category (e.g. "yellow", "green", "fhv")
    pub category: String,
    /// Month covered by the file
    pub period: Period,
    /// Source URL the file is fetched from
    pub remote_url: String,
    /// File name used in the staging directory
    pub file_name: String,
    /// Object key in the destination bucket
    pub remote_key: String,
}

impl std::fmt::Display for FileTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.file_name)
    }
}

/// A fully written, non-empty file in the staging directory
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArtifact {
    /// Absolute or config-relative path of the staged file
    pub path: PathBuf,
    /// Size of the file in bytes (always > 0)
    pub size_bytes: u64,
}

/// Result of one task going through one phase
///
/// Failures are carried on the `Err` side of the phase's `Result`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferOutcome {
    /// Work was already done by an earlier run
    Skipped,
    /// Work was performed in this run
    Succeeded,
}

/// Transfer phase of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Source → staging directory
    Download,
    /// Staging directory → destination bucket
    Upload,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Download => f.write_str("download"),
            Phase::Upload => f.write_str("upload"),
        }
    }
}

/// Lifecycle state of one orchestrator run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// Validating prerequisites and building the task list
    Init,
    /// Download phase in progress
    Downloading,
    /// Every download resolved; deciding whether uploads may start
    Barrier,
    /// Upload phase in progress
    Uploading,
    /// Every task went through both phases
    Done,
    /// Run aborted (absorbing)
    Failed,
}

impl RunState {
    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Init, Downloading)
                | (Downloading, Barrier)
                | (Barrier, Uploading)
                | (Uploading, Done)
                | (Init | Downloading | Barrier | Uploading, Failed)
        )
    }
}

/// Event emitted while a run progresses
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Orchestrator moved to a new state
    StateChanged {
        /// Previous state
        from: RunState,
        /// New state
        to: RunState,
    },

    /// Phase started with `total` tasks submitted
    PhaseStarted {
        /// Phase that started
        phase: Phase,
        /// Number of tasks submitted to the pool
        total: usize,
    },

    /// Phase finished with every task resolved successfully
    PhaseComplete {
        /// Phase that finished
        phase: Phase,
        /// Number of tasks that resolved
        completed: usize,
    },

    /// A download attempt failed and will be retried
    DownloadRetrying {
        /// Staged file name
        file: String,
        /// Attempt that failed (1-based)
        attempt: u32,
        /// Why the attempt failed
        error: String,
    },

    /// Download resolved (freshly fetched or already staged)
    Downloaded {
        /// Staged file name
        file: String,
        /// Size of the staged file
        size_bytes: u64,
        /// Whether the network was used
        outcome: TransferOutcome,
    },

    /// Upload resolved (written or already present)
    Uploaded {
        /// Destination object key
        key: String,
        /// Whether an object write happened
        outcome: TransferOutcome,
    },

    /// A task failed and the run is aborting
    TaskFailed {
        /// Phase the failure happened in
        phase: Phase,
        /// Error description
        error: String,
    },
}

/// Summary returned by a successful run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Number of tasks in the catalog (each went through both phases)
    pub tasks: usize,
    /// Tasks fetched from the source during this run
    pub downloaded: usize,
    /// Tasks already present in the staging directory
    pub download_skipped: usize,
    /// Tasks written to the destination during this run
    pub uploaded: usize,
    /// Tasks already present in the destination
    pub upload_skipped: usize,
    /// Total size of all staged artifacts
    pub staged_bytes: u64,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the run finished
    pub finished_at: DateTime<Utc>,
}
