use log::info;

use crate::error::JobError;
use crate::machine::config::MachineConfiguration;
use crate::process::{CommandRunner, Invocation};
use crate::script::continuation::CLUSTER_SCRIPT;
use crate::WorkingDirectory;

/// Run the machine's submit command on `cluster-continue.sh` inside the current step
/// directory. Blocks until the submit command exits.
pub fn submit(
    wd: &WorkingDirectory,
    machine: &MachineConfiguration,
    runner: &dyn CommandRunner,
) -> Result<Invocation, JobError> {
    let state = wd.state_store().load()?;
    let step = state.step_dir(&wd.path)?;
    let script = step.join(CLUSTER_SCRIPT);
    if !script.is_file() {
        return Err(JobError::MissingSubmissionScript(script));
    }

    let mut words = machine.submit_command().split_whitespace().map(str::to_string);
    let program = words.next().ok_or_else(|| {
        JobError::InvalidMachineConfig("submit_command is empty".to_string())
    })?;
    let mut args: Vec<String> = words.collect();
    args.push(CLUSTER_SCRIPT.to_string());
    let invocation = Invocation::new(&program, args, &step);

    info!("Submitting {} with `{}`", script.display(), invocation);
    let code = runner.run(&invocation).map_err(|e| JobError::SubmitCommandFailed {
        command: invocation.to_string(),
        status: e.to_string(),
    })?;
    if !code.success() {
        return Err(JobError::SubmitCommandFailed {
            command: invocation.to_string(),
            status: code.to_string(),
        });
    }
    Ok(invocation)
}
