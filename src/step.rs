//! Step directories are named `s<digits>-<label>`. The current step is the one with the
//! highest sequence number; equal numbers are ordered by modification time, then by name.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::SystemTime;

use log::debug;
use regex_lite::Regex;

use crate::error::JobError;

/// `s<digits>-<label>`
#[allow(clippy::expect_used)]
static STEP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^s(\d+)-(.+)$").expect("constant regex pattern is valid"));

/// A step directory found under the job root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub path: PathBuf,
    pub name: String,
    pub sequence: u64,
    pub modified: SystemTime,
}

impl Step {
    /// `here` form of the step: directory name with a trailing separator
    pub fn here(&self) -> String {
        format!("{}/", self.name)
    }
}

pub fn is_step_name(name: &str) -> bool {
    parse_sequence(name).is_some()
}

fn parse_sequence(name: &str) -> Option<u64> {
    let captures = STEP_PATTERN.captures(name)?;
    captures.get(1)?.as_str().parse().ok()
}

/// All step directories under `root`, oldest first
pub fn list_steps(root: &Path) -> Result<Vec<Step>, JobError> {
    let mut steps = Vec::new();
    for entry in fs::read_dir(root).map_err(JobError::io(root))? {
        let entry = entry.map_err(JobError::io(root))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        let Some(name) = entry.file_name().to_str().map(str::to_string) else {
            continue;
        };
        let Some(sequence) = parse_sequence(&name) else {
            continue;
        };
        let modified = entry
            .metadata()
            .and_then(|m| m.modified())
            .map_err(JobError::io(&path))?;
        steps.push(Step {
            path,
            name,
            sequence,
            modified,
        });
    }
    steps.sort_by(|a, b| {
        a.sequence
            .cmp(&b.sequence)
            .then(a.modified.cmp(&b.modified))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(steps)
}

/// The most recent step directory under `root`
pub fn current_step(root: &Path) -> Result<Step, JobError> {
    let step = list_steps(root)?
        .pop()
        .ok_or_else(|| JobError::NoStepFound(root.to_path_buf()))?;
    debug!("Current step is {}", step.name);
    Ok(step)
}
