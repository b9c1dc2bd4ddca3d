use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::process::Command;

use log::{info, warn};
use regex_lite::Regex;
use serde::Deserialize;
use serde_json::Value;

use crate::error::JobError;
use crate::machine::config::MachineConfiguration;
use crate::machine::schema;

/// All known machines. Keys are machine names or regular expressions matched against
/// the start of a hostname.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MachineCatalog {
    pub machines: BTreeMap<String, MachineConfiguration>,
}

impl MachineCatalog {
    pub fn read(path: &Path) -> Result<MachineCatalog, JobError> {
        info!("Reading machine catalog at {}", path.display());
        let json = fs::read_to_string(path).map_err(JobError::io(path))?;
        MachineCatalog::parse(&json)
    }

    /// Parse, validate against the schema, then deserialise
    pub fn parse(json: &str) -> Result<MachineCatalog, JobError> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| JobError::InvalidMachineConfig(format!("not valid JSON: {e}")))?;
        schema::validate(&value)?;
        serde_json::from_value::<MachineCatalog>(value)
            .map_err(|e| JobError::InvalidMachineConfig(e.to_string()))
    }

    /// Machine for `host`: an exact key first, then the single key pattern matching it
    pub fn select(&self, host: &str) -> Result<(&str, &MachineConfiguration), JobError> {
        if let Some((name, machine)) = self.machines.get_key_value(host) {
            return Ok((name.as_str(), machine));
        }
        let mut matches = Vec::new();
        for (key, machine) in &self.machines {
            match Regex::new(&format!("^(?:{key})")) {
                Ok(pattern) if pattern.is_match(host) => matches.push((key.as_str(), machine)),
                Ok(_) => {}
                Err(_) => warn!("Machine key {key:?} is not a valid pattern, skipping"),
            }
        }
        match matches.len() {
            1 => {
                let (name, machine) = matches[0];
                info!("Using machine {name} for host {host}");
                Ok((name, machine))
            }
            0 => Err(JobError::InvalidMachineConfig(format!(
                "no machine entry matches host {host:?}"
            ))),
            _ => Err(JobError::InvalidMachineConfig(format!(
                "host {host:?} matches several machines: {}",
                matches.iter().map(|(k, _)| *k).collect::<Vec<_>>().join(", ")
            ))),
        }
    }
}

/// `HOSTNAME` from the environment, else the output of `hostname`
pub fn local_hostname() -> Option<String> {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.trim().is_empty() {
            return Some(host.trim().to_string());
        }
    }
    let output = Command::new("hostname").output().ok()?;
    let host = String::from_utf8(output.stdout).ok()?;
    let host = host.trim();
    (!host.is_empty()).then(|| host.to_string())
}
