use jsonschema::{Draft, JSONSchema};
use log::{info, warn};
use serde_json::Value;

use crate::error::JobError;

/// included catalog schema
static SCHEMA: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/schema/machines.json"));

pub fn load_schema() -> Result<JSONSchema, JobError> {
    let schema: Value = serde_json::from_str(SCHEMA)
        .map_err(|e| JobError::InvalidMachineConfig(format!("embedded schema is not JSON: {e}")))?;
    JSONSchema::options()
        .with_draft(Draft::Draft7)
        .compile(&schema)
        .map_err(|e| JobError::InvalidMachineConfig(format!("embedded schema does not compile: {e}")))
}

/// Check an untyped catalog against the schema, reporting every violation
pub fn validate(instance: &Value) -> Result<(), JobError> {
    info!("Validating machine catalog against JSON schema");
    let compiled = load_schema()?;
    let result = compiled.validate(instance);
    if let Err(errors) = result {
        let messages: Vec<String> = errors
            .map(|err| {
                let at = err.instance_path.to_string();
                if at.is_empty() {
                    err.to_string()
                } else {
                    format!("{at}: {err}")
                }
            })
            .collect();
        warn!("Machine catalog fails validation");
        return Err(JobError::InvalidMachineConfig(messages.join("; ")));
    }
    Ok(())
}
