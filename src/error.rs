use std::io;
use std::path::PathBuf;

/// Every failure a job operation can end with. None are retried.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("no step directory matching s<digits>-<name> in {}", .0.display())]
    NoStepFound(PathBuf),

    #[error("cannot find a {kind} file in {}", .directory.display())]
    MissingArtifact { kind: String, directory: PathBuf },

    #[error("a state document already exists at {}", .0.display())]
    AlreadyInitialized(PathBuf),

    #[error("invalid machine configuration: {0}")]
    InvalidMachineConfig(String),

    #[error("machine configuration has neither a walltime nor an extend/until continuation mode")]
    MissingWalltimePolicy,

    #[error("machine configuration has no cluster_header")]
    MissingClusterHeader,

    #[error("refusing to overwrite {}", .0.display())]
    RefuseOverwrite(PathBuf),

    #[error("missing upload files: {}", display_paths(.missing))]
    IncompleteArtifactSet { missing: Vec<PathBuf> },

    #[error("no `{0}` call in the command history")]
    NoSimulationRecord(String),

    #[error("{operation} failed ({status})")]
    TransferFailed { operation: String, status: String },

    #[error("the state document has no upload record; upload this job first")]
    NoPriorUpload,

    #[error("cannot merge upload history: {0}")]
    HistoryMergeConflict(String),

    #[error("cannot find {}; run `cluster` to generate it", .0.display())]
    MissingSubmissionScript(PathBuf),

    #[error("`{command}` exited with {status}")]
    SubmitCommandFailed { command: String, status: String },

    #[error("cannot render {name} template: {message}")]
    Template { name: String, message: String },

    /// Another failure plus what the user can do to recover from it
    #[error("{error}; {hint}")]
    Recoverable { error: Box<JobError>, hint: String },

    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("malformed JSON in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

impl JobError {
    /// Short label printed in front of the message by the command line
    pub fn category(&self) -> &'static str {
        match self {
            JobError::NoStepFound(_) => "no step",
            JobError::MissingArtifact { .. } => "missing artifact",
            JobError::AlreadyInitialized(_) => "already initialized",
            JobError::InvalidMachineConfig(_) => "machine config",
            JobError::MissingWalltimePolicy => "machine config",
            JobError::MissingClusterHeader => "machine config",
            JobError::RefuseOverwrite(_) => "refuse overwrite",
            JobError::IncompleteArtifactSet { .. } => "upload",
            JobError::NoSimulationRecord(_) => "upload",
            JobError::TransferFailed { .. } => "transfer",
            JobError::NoPriorUpload => "download",
            JobError::HistoryMergeConflict(_) => "download",
            JobError::MissingSubmissionScript(_) => "submit",
            JobError::SubmitCommandFailed { .. } => "submit",
            JobError::Template { .. } => "template",
            JobError::Recoverable { error, .. } => error.category(),
            JobError::Io { .. } => "io",
            JobError::Json { .. } => "state",
        }
    }

    /// The failure itself, looking through any attached recovery hint
    pub fn cause(&self) -> &JobError {
        match self {
            JobError::Recoverable { error, .. } => error.cause(),
            other => other,
        }
    }

    pub fn hint(&self) -> Option<&str> {
        match self {
            JobError::Recoverable { hint, .. } => Some(hint.as_str()),
            _ => None,
        }
    }

    pub fn with_hint(self, hint: String) -> JobError {
        JobError::Recoverable {
            error: Box::new(self),
            hint,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> JobError {
        let path = path.into();
        move |source| JobError::Io { path, source }
    }
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
