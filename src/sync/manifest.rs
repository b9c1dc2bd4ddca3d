use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use walkdir::WalkDir;

use crate::error::JobError;
use crate::script::continuation::{CLUSTER_SCRIPT, RUN_SCRIPT};
use crate::state::document::{StateDocument, CHECKPOINT_FLAG, RUN_INPUT_FLAG, SIMULATION_COMMAND};
use crate::WorkingDirectory;

/// File list handed to `rsync --files-from`, relative to the job root
pub static UPLOAD_LIST: &str = "uploads.txt";

/// Job-root files and directories sent with every upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadManifest {
    /// Must exist
    pub files: Vec<String>,
    /// Sent when present
    pub optional_files: Vec<String>,
    /// Every file below these is sent, except bytecode and `.git` internals
    pub support_dirs: Vec<String>,
}

impl Default for UploadManifest {
    fn default() -> UploadManifest {
        UploadManifest {
            files: vec!["makefile".into(), "config.py".into(), "state.json".into()],
            optional_files: vec!["gromacs_config.py".into()],
            support_dirs: vec!["amx".into(), "runner".into()],
        }
    }
}

impl UploadManifest {
    /// Relative paths of everything an upload needs. Fails listing every missing file.
    pub fn collect(&self, wd: &WorkingDirectory, state: &StateDocument) -> Result<Vec<PathBuf>, JobError> {
        state.step_dir(&wd.path)?;
        let here = PathBuf::from(state.here.as_deref().unwrap_or_default());
        let mdrun = state
            .last_call(SIMULATION_COMMAND)
            .ok_or_else(|| JobError::NoSimulationRecord(SIMULATION_COMMAND.to_string()))?;

        let mut required = Vec::new();
        for flag in [RUN_INPUT_FLAG, CHECKPOINT_FLAG] {
            match mdrun.flags.get(flag) {
                Some(name) => required.push(here.join(name)),
                None => required.push(here.join(format!("<{SIMULATION_COMMAND} {flag}>"))),
            }
        }
        for script in [RUN_SCRIPT, CLUSTER_SCRIPT] {
            let path = here.join(script);
            if wd.join(&path).is_file() {
                required.push(path);
            }
        }
        required.extend(self.files.iter().map(PathBuf::from));

        let missing: Vec<PathBuf> = required
            .iter()
            .filter(|path| !wd.join(path).is_file())
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(JobError::IncompleteArtifactSet { missing });
        }

        let mut files = required;
        for optional in &self.optional_files {
            if wd.join(optional).is_file() {
                files.push(PathBuf::from(optional));
            }
        }
        for dir in &self.support_dirs {
            files.extend(support_files(&wd.path, dir)?);
        }
        debug!("Upload set has {} files", files.len());
        Ok(files)
    }
}

fn support_files(root: &Path, dir: &str) -> Result<Vec<PathBuf>, JobError> {
    let top = root.join(dir);
    if !top.is_dir() {
        debug!("No {} directory to upload", top.display());
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    let walker = WalkDir::new(&top)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git");
    for entry in walker {
        let entry = entry.map_err(|e| JobError::Io {
            path: top.clone(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "pyc") {
            continue;
        }
        if let Ok(relative) = path.strip_prefix(root) {
            files.push(relative.to_path_buf());
        }
    }
    Ok(files)
}

/// `uploads.txt` in the job root, removed again when dropped
#[derive(Debug)]
pub struct UploadList {
    path: PathBuf,
}

impl UploadList {
    pub fn write(wd: &WorkingDirectory, files: &[PathBuf]) -> Result<UploadList, JobError> {
        let path = wd.join(UPLOAD_LIST);
        let mut content = String::new();
        for file in files {
            content.push_str(&file.display().to_string());
            content.push('\n');
        }
        info!("Writing {} paths to {}", files.len(), path.display());
        fs::write(&path, content).map_err(JobError::io(&path))?;
        Ok(UploadList { path })
    }
}

impl Drop for UploadList {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
