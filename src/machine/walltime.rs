use log::debug;

use crate::error::JobError;
use crate::machine::config::{MachineConfiguration, Walltime};

/// Symbolic continuation modes a machine can ask for instead of a fixed walltime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationMode {
    /// Extend the run by the configured `extend` time
    Extend,
    /// Continue until the configured `until` time
    Until,
}

/// Maps a symbolic continuation mode to the hour budget of one allocation.
///
/// The numeric policy belongs to whoever runs the cluster; the builder only propagates
/// the result.
pub trait WalltimePolicy {
    fn max_hours(&self, mode: ContinuationMode, machine: &MachineConfiguration) -> Result<f64, JobError>;
}

/// Every symbolic mode gets the same fixed allocation length
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FixedAllocation {
    pub hours: f64,
}

impl Default for FixedAllocation {
    fn default() -> FixedAllocation {
        FixedAllocation { hours: 24.0 }
    }
}

impl WalltimePolicy for FixedAllocation {
    fn max_hours(&self, _mode: ContinuationMode, _machine: &MachineConfiguration) -> Result<f64, JobError> {
        Ok(self.hours)
    }
}

/// Mode implied by the machine: an explicit `"extend"`/`"until"` walltime, else the
/// presence of an `until` or `extend` value
pub fn continuation_mode(machine: &MachineConfiguration) -> Option<ContinuationMode> {
    match &machine.walltime {
        Some(Walltime::Text(text)) if text == "extend" => Some(ContinuationMode::Extend),
        Some(Walltime::Text(text)) if text == "until" => Some(ContinuationMode::Until),
        Some(_) => None,
        None if machine.until.is_some() => Some(ContinuationMode::Until),
        None if machine.extend.is_some() => Some(ContinuationMode::Extend),
        None => None,
    }
}

/// Hours from a `HH:MM` or `HH:MM:SS` clock
pub fn parse_clock(text: &str) -> Option<f64> {
    let parts: Vec<&str> = text.split(':').collect();
    if !(2..=3).contains(&parts.len()) {
        return None;
    }
    let mut values = Vec::with_capacity(3);
    for part in parts {
        values.push(part.parse::<u32>().ok()?);
    }
    let seconds = values.get(2).copied().unwrap_or(0);
    Some(f64::from(values[0]) + f64::from(values[1]) / 60.0 + f64::from(seconds) / 3600.0)
}

/// Resolve the hour budget of one allocation
pub fn resolve_max_hours(machine: &MachineConfiguration, policy: &dyn WalltimePolicy) -> Result<f64, JobError> {
    let hours = match (&machine.walltime, continuation_mode(machine)) {
        (_, Some(mode)) => policy.max_hours(mode, machine)?,
        (Some(Walltime::Hours(hours)), None) => *hours,
        (Some(Walltime::Text(text)), None) => parse_clock(text).ok_or_else(|| {
            JobError::InvalidMachineConfig(format!("cannot read walltime {text:?}"))
        })?,
        (None, None) => return Err(JobError::MissingWalltimePolicy),
    };
    if !(hours.is_finite() && hours > 0.0) {
        return Err(JobError::InvalidMachineConfig(format!(
            "walltime must be a positive number of hours, got {hours}"
        )));
    }
    debug!("Allocation budget is {hours} hours");
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn machine(value: serde_json::Value) -> MachineConfiguration {
        serde_json::from_value(value).unwrap()
    }

    struct PerMode;

    impl WalltimePolicy for PerMode {
        fn max_hours(&self, mode: ContinuationMode, _machine: &MachineConfiguration) -> Result<f64, JobError> {
            Ok(match mode {
                ContinuationMode::Extend => 12.0,
                ContinuationMode::Until => 36.5,
            })
        }
    }

    #[test]
    fn direct_hours_pass_through() {
        let hours = resolve_max_hours(&machine(json!({"walltime": 23.5})), &PerMode).unwrap();
        assert_eq!(hours, 23.5);
    }

    #[test]
    fn clock_strings_become_hours() {
        assert_eq!(parse_clock("48:00"), Some(48.0));
        assert_eq!(parse_clock("01:30:00"), Some(1.5));
        assert_eq!(parse_clock("1"), None);
        assert_eq!(parse_clock("a:b"), None);
        let hours = resolve_max_hours(&machine(json!({"walltime": "12:15"})), &PerMode).unwrap();
        assert_eq!(hours, 12.25);
    }

    #[test]
    fn symbolic_modes_go_through_the_policy() {
        let extend = machine(json!({"walltime": "extend", "extend": 50000}));
        assert_eq!(resolve_max_hours(&extend, &PerMode).unwrap(), 12.0);
        let until = machine(json!({"until": 1000000}));
        assert_eq!(resolve_max_hours(&until, &PerMode).unwrap(), 36.5);
        assert_eq!(resolve_max_hours(&until, &FixedAllocation::default()).unwrap(), 24.0);
    }

    #[test]
    fn fixed_walltime_ignores_until_value() {
        let m = machine(json!({"walltime": 6, "until": 1000000}));
        assert_eq!(continuation_mode(&m), None);
        assert_eq!(resolve_max_hours(&m, &PerMode).unwrap(), 6.0);
    }

    #[test]
    fn nothing_to_go_on() {
        assert!(matches!(
            resolve_max_hours(&machine(json!({"nprocs": 4})), &PerMode),
            Err(JobError::MissingWalltimePolicy)
        ));
    }

    #[test]
    fn policy_result_must_be_positive() {
        let m = machine(json!({"walltime": "until"}));
        let zero = FixedAllocation { hours: 0.0 };
        assert!(matches!(
            resolve_max_hours(&m, &zero),
            Err(JobError::InvalidMachineConfig(_))
        ));
    }
}
