//! Hard restart: rebuild `state.json` from the restart files in the latest step directory.
//!
//! Useful after dropping a checkpoint and its run input into a fresh `sNN-name/` directory.
//! Nothing is written unless both files are found.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::info;

use crate::error::JobError;
use crate::state::document::{
    CommandRecord, StateDocument, CHECKPOINT_FLAG, RUN_INPUT_FLAG, SIMULATION_COMMAND,
};
use crate::step;
use crate::WorkingDirectory;

/// Restart file kinds a continuation needs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Checkpoint,
    RunInput,
}

impl ArtifactKind {
    fn extension(&self) -> &'static str {
        match self {
            ArtifactKind::Checkpoint => "cpt",
            ArtifactKind::RunInput => "tpr",
        }
    }

    fn flag(&self) -> &'static str {
        match self {
            ArtifactKind::Checkpoint => CHECKPOINT_FLAG,
            ArtifactKind::RunInput => RUN_INPUT_FLAG,
        }
    }
}

/// `md.partNNNN.<ext>` with exactly four digits
fn is_part_file(name: &str, kind: ArtifactKind) -> bool {
    let Some(rest) = name.strip_prefix("md.part") else {
        return false;
    };
    match rest.split_once('.') {
        Some((digits, ext)) => {
            digits.len() == 4 && digits.bytes().all(|b| b.is_ascii_digit()) && ext == kind.extension()
        }
        None => false,
    }
}

/// Newest `md.partNNNN.<ext>` file of `kind` in `dir`, by modification time
pub fn latest_artifact(dir: &Path, kind: ArtifactKind) -> Result<PathBuf, JobError> {
    let mut candidates: Vec<(SystemTime, PathBuf)> = Vec::new();
    for entry in fs::read_dir(dir).map_err(JobError::io(dir))? {
        let entry = entry.map_err(JobError::io(dir))?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_part_file(name, kind) {
            continue;
        }
        let path = entry.path();
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(JobError::io(&path))?;
        candidates.push((modified, path));
    }
    candidates.sort();
    candidates
        .pop()
        .map(|(_, path)| path)
        .ok_or_else(|| JobError::MissingArtifact {
            kind: kind.extension().to_string(),
            directory: dir.to_path_buf(),
        })
}

/// Write a fresh state document pointing at the latest step and its restart files
pub fn reconstruct(
    wd: &WorkingDirectory,
    tool_paths: BTreeMap<String, String>,
) -> Result<StateDocument, JobError> {
    let store = wd.state_store();
    if store.exists() {
        return Err(JobError::AlreadyInitialized(store.path().to_path_buf()));
    }

    let step = step::current_step(&wd.path)?;
    info!("Reconstructing state from {}", step.path.display());

    let mut flags = BTreeMap::new();
    for kind in [ArtifactKind::Checkpoint, ArtifactKind::RunInput] {
        let artifact = latest_artifact(&step.path, kind)?;
        let name = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        info!("Using {} {}", kind.extension(), name);
        flags.insert(kind.flag().to_string(), name);
    }

    let mut doc = StateDocument::default();
    doc.here = Some(step.here());
    doc.tool_paths = tool_paths;
    doc.command_history.push(CommandRecord {
        command: SIMULATION_COMMAND.to_string(),
        flags,
    });
    store.save(&doc)?;
    Ok(doc)
}
