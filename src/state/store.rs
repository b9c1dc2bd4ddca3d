use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::JobError;
use crate::state::document::StateDocument;

/// Fixed name of the state document inside the job root
pub static STATE_FILE: &str = "state.json";

/// Reads and replaces `state.json`
///
/// `save` writes a sibling temporary file, syncs it and renames it over the document, so a
/// reader sees either the old or the new document and never a partial one.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    pub fn new(root: &Path) -> StateStore {
        StateStore {
            path: root.join(STATE_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// A missing file is an empty document, not an error
    pub fn load(&self) -> Result<StateDocument, JobError> {
        if !self.exists() {
            debug!("No state document at {}, starting empty", self.path.display());
            return Ok(StateDocument::default());
        }
        let json = fs::read_to_string(&self.path).map_err(JobError::io(&self.path))?;
        serde_json::from_str::<StateDocument>(&json).map_err(|source| JobError::Json {
            path: self.path.clone(),
            source,
        })
    }

    pub fn save(&self, doc: &StateDocument) -> Result<(), JobError> {
        let json = serde_json::to_vec_pretty(doc).map_err(|source| JobError::Json {
            path: self.path.clone(),
            source,
        })?;
        let tmp = self.temp_path();
        write_synced(&tmp, &json).map_err(JobError::io(&tmp))?;
        fs::rename(&tmp, &self.path).map_err(|source| {
            let _ = fs::remove_file(&tmp);
            JobError::Io {
                path: self.path.clone(),
                source,
            }
        })?;
        info!("Saved state to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        self.path
            .with_file_name(format!(".{}.tmp.{}", STATE_FILE, std::process::id()))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::document::{CommandRecord, SyncRecord};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    #[test]
    fn missing_file_loads_empty_document() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        assert!(!store.exists());
        assert_eq!(store.load().unwrap(), StateDocument::default());
    }

    #[test]
    fn save_then_load_returns_same_document() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());

        let mut doc = StateDocument::default();
        doc.here = Some("s03-run/".into());
        doc.ensure_serial();
        doc.tool_paths.insert("mdrun".into(), "gmx mdrun".into());
        doc.command_history.push(CommandRecord {
            command: "mdrun".into(),
            flags: BTreeMap::from([
                ("-s".to_string(), "md.part0003.tpr".to_string()),
                ("-cpo".to_string(), "md.part0003.cpt".to_string()),
            ]),
        });
        doc.record_push(SyncRecord::push("host:/scratch/job7"));
        doc.continuation_script = Some("script-continue.sh".into());
        doc.extra.insert("expt".into(), serde_json::json!({"step": "run"}));

        store.save(&doc).unwrap();
        assert_eq!(store.load().unwrap(), doc);
    }

    #[test]
    fn save_replaces_without_leaving_temp_files() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::new(tmp.path());
        let mut doc = StateDocument::default();
        store.save(&doc).unwrap();
        doc.here = Some("s01-build/".into());
        store.save(&doc).unwrap();

        let names: Vec<_> = fs::read_dir(tmp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![STATE_FILE.to_string()]);
        assert_eq!(store.load().unwrap().here.as_deref(), Some("s01-build/"));
    }

    #[test]
    fn corrupt_document_is_an_error() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join(STATE_FILE), "{\"here\": ").unwrap();
        let err = StateStore::new(tmp.path()).load().unwrap_err();
        assert!(matches!(err, JobError::Json { .. }));
    }
}
