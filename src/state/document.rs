use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::Local;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::JobError;
use crate::step;

/// Engine call whose flags name the restart files
pub static SIMULATION_COMMAND: &str = "mdrun";

/// `mdrun` flag naming the run input (topology) file
pub static RUN_INPUT_FLAG: &str = "-s";

/// `mdrun` flag naming the checkpoint output file
pub static CHECKPOINT_FLAG: &str = "-cpo";

/// Serials are drawn from `0..=SERIAL_MAX`
const SERIAL_MAX: u64 = 1_000_000_000;

/// The single persisted record of a job's progress (`state.json`)
///
/// Keys written by other tools that this crate does not model are kept in `extra` and
/// written back untouched. Documents written by the older command layer (`gmxpaths`,
/// `history_gmx` with `call`, `upload {to, when}`) are read as well and saved in the
/// current key names.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateDocument {
    /// Current step directory relative to the job root, e.g. `s03-run/`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub here: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    serial: Option<u64>,

    #[serde(default, alias = "gmxpaths", skip_serializing_if = "BTreeMap::is_empty")]
    pub tool_paths: BTreeMap<String, String>,

    #[serde(default, alias = "history_gmx", skip_serializing_if = "Vec::is_empty")]
    pub command_history: Vec<CommandRecord>,

    /// Most recent successful push
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload: Option<UploadRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub upload_history: Vec<SyncRecord>,

    /// Generated continuation script, relative to the step directory
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continuation_script: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One simulation-engine invocation as logged by the command layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRecord {
    #[serde(alias = "call")]
    pub command: String,
    #[serde(default)]
    pub flags: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadRecord {
    #[serde(alias = "to")]
    pub destination: String,
    #[serde(alias = "when")]
    pub timestamp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncDirection {
    Push,
    Pull,
}

/// A completed transfer. Never edited once appended to the history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredSyncRecord")]
pub struct SyncRecord {
    pub endpoint: String,
    pub timestamp: String,
    pub direction: SyncDirection,
}

/// History entry shapes found on disk. Older entries carry no direction: a push is
/// `{to, when}` and a pull is `{from, to: "here", when}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredSyncRecord {
    Current {
        endpoint: String,
        timestamp: String,
        direction: SyncDirection,
    },
    Pulled {
        from: String,
        when: String,
    },
    Pushed {
        to: String,
        when: String,
    },
}

impl From<StoredSyncRecord> for SyncRecord {
    fn from(stored: StoredSyncRecord) -> SyncRecord {
        let (endpoint, timestamp, direction) = match stored {
            StoredSyncRecord::Current {
                endpoint,
                timestamp,
                direction,
            } => (endpoint, timestamp, direction),
            StoredSyncRecord::Pulled { from, when } => (from, when, SyncDirection::Pull),
            StoredSyncRecord::Pushed { to, when } => (to, when, SyncDirection::Push),
        };
        SyncRecord {
            endpoint,
            timestamp,
            direction,
        }
    }
}

impl SyncRecord {
    pub fn push(destination: &str) -> SyncRecord {
        SyncRecord {
            endpoint: destination.to_string(),
            timestamp: timestamp_now(),
            direction: SyncDirection::Push,
        }
    }

    pub fn pull(source: &str) -> SyncRecord {
        SyncRecord {
            endpoint: source.to_string(),
            timestamp: timestamp_now(),
            direction: SyncDirection::Pull,
        }
    }

    fn matches(&self, upload: &UploadRecord) -> bool {
        self.direction == SyncDirection::Push
            && self.endpoint == upload.destination
            && self.timestamp == upload.timestamp
    }
}

/// Transfer log timestamp, e.g. `2024.01.01.1200`
pub fn timestamp_now() -> String {
    Local::now().format("%Y.%m.%d.%H%M").to_string()
}

impl StateDocument {
    pub fn serial(&self) -> Option<u64> {
        self.serial
    }

    /// Return the serial, drawing a random one the first time
    pub fn ensure_serial(&mut self) -> u64 {
        *self
            .serial
            .get_or_insert_with(|| rand::thread_rng().gen_range(0..=SERIAL_MAX))
    }

    /// Adopt `serial` if none is set yet. Fails when a different serial is already held.
    pub fn adopt_serial(&mut self, serial: Option<u64>) -> Result<(), JobError> {
        match (self.serial, serial) {
            (Some(mine), Some(theirs)) if mine != theirs => Err(JobError::HistoryMergeConflict(
                format!("serial {theirs} does not match the local serial {mine}"),
            )),
            (None, theirs) => {
                self.serial = theirs;
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Resolve `here` against the job root; it must name an existing step directory
    pub fn step_dir(&self, root: &Path) -> Result<PathBuf, JobError> {
        let here = self
            .here
            .as_deref()
            .ok_or_else(|| JobError::NoStepFound(root.to_path_buf()))?;
        let name = Path::new(here)
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default();
        let dir = root.join(here);
        if step::is_step_name(name) && dir.is_dir() {
            Ok(dir)
        } else {
            Err(JobError::NoStepFound(root.to_path_buf()))
        }
    }

    /// Most recent entry for `command` in the command history
    pub fn last_call(&self, command: &str) -> Option<&CommandRecord> {
        self.command_history
            .iter()
            .rev()
            .find(|record| record.command == command)
    }

    /// Append a successful push and make it the current upload record
    pub fn record_push(&mut self, record: SyncRecord) {
        self.upload = Some(UploadRecord {
            destination: record.endpoint.clone(),
            timestamp: record.timestamp.clone(),
        });
        self.upload_history.push(record);
    }

    pub fn record_pull(&mut self, record: SyncRecord) {
        self.upload_history.push(record);
    }

    /// An upload record must be backed by the latest push in the history
    pub fn upload_consistent(&self) -> bool {
        match &self.upload {
            None => true,
            Some(upload) => self
                .upload_history
                .iter()
                .rev()
                .find(|r| r.direction == SyncDirection::Push)
                .map_or(false, |r| r.matches(upload)),
        }
    }
}
