use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Number;

use crate::error::JobError;
use crate::script::template::{TokenTable, TokenValue};

/// Queue submit program used when the machine names none
pub static DEFAULT_SUBMIT_COMMAND: &str = "qsub";

/// GROMACS tools assumed when neither the state nor the machine names them
pub fn default_tool_paths() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("mdrun".to_string(), "gmx mdrun".to_string()),
        ("tpbconv".to_string(), "gmx convert-tpr".to_string()),
    ])
}

/// One machine entry of the catalog. Read-only to everything in this crate.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct MachineConfiguration {
    /// Queue prologue with uppercase placeholder tokens
    pub cluster_header: Option<String>,
    pub walltime: Option<Walltime>,
    pub nprocs: Option<u32>,
    /// Processes per node
    pub ppn: Option<u32>,
    pub nnodes: Option<u32>,
    pub modules: Option<Modules>,
    /// Replaces the `mdrun` tool path on this machine
    pub mdrun_command: Option<String>,
    pub submit_command: Option<String>,
    pub extend: Option<f64>,
    pub until: Option<f64>,
    #[serde(default)]
    pub tools: BTreeMap<String, String>,
    /// Extra header tokens, e.g. `QUEUE` or `ACCOUNT`
    #[serde(default)]
    pub tokens: BTreeMap<String, Scalar>,
}

/// Hours, a `HH:MM[:SS]` clock, or a symbolic continuation mode
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Walltime {
    Hours(f64),
    Text(String),
}

impl fmt::Display for Walltime {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Walltime::Hours(hours) => write!(f, "{}", TokenValue::Float(*hours)),
            Walltime::Text(text) => write!(f, "{text}"),
        }
    }
}

/// A single module name or an ordered list of them
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Modules {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum Scalar {
    Number(Number),
    Text(String),
}

impl MachineConfiguration {
    /// `nprocs` when given, otherwise `ppn × nnodes`
    pub fn process_count(&self) -> Result<u32, JobError> {
        if let Some(nprocs) = self.nprocs {
            return Ok(nprocs);
        }
        match (self.ppn, self.nnodes) {
            (Some(ppn), Some(nnodes)) => ppn.checked_mul(nnodes).ok_or_else(|| {
                JobError::InvalidMachineConfig(format!("ppn {ppn} × nnodes {nnodes} overflows"))
            }),
            _ => Err(JobError::InvalidMachineConfig(
                "set nprocs, or both ppn and nnodes".to_string(),
            )),
        }
    }

    pub fn modules(&self) -> Vec<String> {
        match &self.modules {
            None => Vec::new(),
            Some(Modules::One(module)) => vec![module.clone()],
            Some(Modules::Many(modules)) => modules.clone(),
        }
    }

    pub fn submit_command(&self) -> &str {
        self.submit_command
            .as_deref()
            .unwrap_or(DEFAULT_SUBMIT_COMMAND)
    }

    /// Tool paths for this machine: `base`, then `tools`, then the `mdrun_command` override
    pub fn tool_paths(&self, base: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut paths = base.clone();
        paths.extend(self.tools.clone());
        if let Some(mdrun) = &self.mdrun_command {
            paths.insert("mdrun".to_string(), mdrun.clone());
        }
        paths
    }

    /// Header tokens taken straight from the machine entry
    pub fn header_tokens(&self) -> TokenTable {
        let mut tokens = TokenTable::new();
        if let Some(walltime) = &self.walltime {
            tokens.insert("walltime", walltime.to_string());
        }
        for (key, value) in [("nprocs", self.nprocs), ("ppn", self.ppn), ("nnodes", self.nnodes)] {
            if let Some(value) = value {
                tokens.insert(key, value);
            }
        }
        for (key, value) in &self.tokens {
            match value {
                Scalar::Number(number) => tokens.insert(key, TokenValue::from(number)),
                Scalar::Text(text) => tokens.insert(key, text.as_str()),
            }
        }
        tokens
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn machine_tools_override_defaults() {
        let m = MachineConfiguration {
            mdrun_command: Some("mpirun -np 4 gmx_mpi mdrun".into()),
            ..Default::default()
        };
        let paths = m.tool_paths(&default_tool_paths());
        assert_eq!(paths["mdrun"], "mpirun -np 4 gmx_mpi mdrun");
        assert_eq!(paths["tpbconv"], "gmx convert-tpr");
    }

    fn machine(value: serde_json::Value) -> MachineConfiguration {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn process_count_from_nodes() {
        let m = machine(json!({"ppn": 16, "nnodes": 4}));
        assert_eq!(m.process_count().unwrap(), 64);
        let direct = machine(json!({"nprocs": 64}));
        assert_eq!(direct.process_count().unwrap(), m.process_count().unwrap());
    }

    #[test]
    fn explicit_nprocs_wins() {
        let m = machine(json!({"nprocs": 12, "ppn": 16, "nnodes": 4}));
        assert_eq!(m.process_count().unwrap(), 12);
    }

    #[test]
    fn process_count_needs_something() {
        let m = machine(json!({"ppn": 16}));
        assert!(matches!(
            m.process_count(),
            Err(JobError::InvalidMachineConfig(_))
        ));
    }

    #[test]
    fn modules_accept_string_or_list() {
        assert_eq!(machine(json!({"modules": "gromacs"})).modules(), vec!["gromacs"]);
        assert_eq!(
            machine(json!({"modules": ["cuda", "gromacs"]})).modules(),
            vec!["cuda", "gromacs"]
        );
        assert!(machine(json!({})).modules().is_empty());
    }

    #[test]
    fn submit_command_defaults_to_qsub() {
        assert_eq!(machine(json!({})).submit_command(), "qsub");
        assert_eq!(machine(json!({"submit_command": "sbatch"})).submit_command(), "sbatch");
    }

    #[test]
    fn mdrun_override_beats_tools() {
        let m = machine(json!({
            "tools": {"mdrun": "gmx mdrun", "tpbconv": "gmx convert-tpr"},
            "mdrun_command": "ibrun gmx_mpi mdrun"
        }));
        let base = BTreeMap::from([
            ("grompp".to_string(), "gmx grompp".to_string()),
            ("tpbconv".to_string(), "tpbconv".to_string()),
        ]);
        let paths = m.tool_paths(&base);
        assert_eq!(paths["mdrun"], "ibrun gmx_mpi mdrun");
        assert_eq!(paths["tpbconv"], "gmx convert-tpr");
        assert_eq!(paths["grompp"], "gmx grompp");
    }

    #[test]
    fn header_tokens_from_machine_fields() {
        let m = machine(json!({
            "walltime": 48, "ppn": 16, "nnodes": 2,
            "tokens": {"QUEUE": "gpu", "memory": 64}
        }));
        let tokens = m.header_tokens();
        assert_eq!(tokens.get("WALLTIME"), Some(&TokenValue::Text("48".into())));
        assert_eq!(tokens.get("PPN"), Some(&TokenValue::Integer(16)));
        assert_eq!(tokens.get("QUEUE"), Some(&TokenValue::Text("gpu".into())));
        assert_eq!(tokens.get("MEMORY"), Some(&TokenValue::Integer(64)));
        assert!(tokens.get("NPROCS").is_none());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let parsed = serde_json::from_value::<MachineConfiguration>(json!({"walltyme": 3}));
        assert!(parsed.is_err());
    }
}
