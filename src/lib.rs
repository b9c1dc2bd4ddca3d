//! Job state, checkpoint continuation, and remote synchronisation for step-directory
//! simulation jobs.
//!
//! Every operation takes a [`WorkingDirectory`] (the job root holding `state.json` and the
//! `sNN-name/` step directories) instead of reaching for a shared "current job".

use std::path::{Path, PathBuf};

use crate::state::store::StateStore;

/// Error taxonomy shared by every operation
pub mod error;

/// Blocking external processes and user confirmation
pub mod process;

/// The persisted job-state document
pub mod state;

/// Locate the current step directory
pub mod step;

/// Rebuild a state document from checkpoint files
pub mod checkpoint;

/// Machine configuration: schema, host catalog, wall-time policy
pub mod machine;

/// Script templating and continuation script generation
pub mod script;

/// Push and pull job files to a remote host
pub mod sync;

/// Hand the composed cluster script to the queue
pub mod submit;

pub use error::JobError;

/// Fallback job name when the job root has no usable base name
pub static DEFAULT_JOB_NAME: &str = "gmxjob";

/// The job root directory: contains `state.json` and the step directories
#[derive(Debug, Clone)]
pub struct WorkingDirectory {
    pub path: PathBuf,
}

impl WorkingDirectory {
    pub fn new(path: impl Into<PathBuf>) -> WorkingDirectory {
        WorkingDirectory { path: path.into() }
    }

    pub fn state_store(&self) -> StateStore {
        StateStore::new(&self.path)
    }

    /// Base name of the job root, used as the cluster job name and the remote directory name
    pub fn job_name(&self) -> String {
        let resolved = self.path.canonicalize().unwrap_or_else(|_| self.path.clone());
        resolved
            .file_name()
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string())
    }

    pub fn join(&self, path: impl AsRef<Path>) -> PathBuf {
        self.path.join(path)
    }
}
