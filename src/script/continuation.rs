use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use crate::error::JobError;
use crate::machine::config::MachineConfiguration;
use crate::machine::walltime::{resolve_max_hours, FixedAllocation, WalltimePolicy};
use crate::script::template::{render, settings_block, splice_at_marker, Quoting, TokenTable};
use crate::script::wrapper;
use crate::state::document::StateDocument;
use crate::WorkingDirectory;

/// Step-local resumable run script
pub static RUN_SCRIPT: &str = "script-continue.sh";

/// Cluster header followed by the run script, ready for the queue
pub static CLUSTER_SCRIPT: &str = "cluster-continue.sh";

/// Rendered cluster header on its own
pub static HEADER_SCRIPT: &str = "cluster-header.sh";

/// Line in the run-script template replaced by the settings block
pub static SETTINGS_MARKER: &str = "#---SETTINGS OVERRIDES HERE";

static DEFAULT_POLICY: FixedAllocation = FixedAllocation { hours: 24.0 };

/// Paths written by a build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedScripts {
    pub run_script: PathBuf,
    pub cluster_script: PathBuf,
    pub header_script: PathBuf,
    pub wrappers: Vec<PathBuf>,
}

impl GeneratedScripts {
    pub fn paths(&self) -> impl Iterator<Item = &PathBuf> {
        [&self.header_script, &self.run_script, &self.cluster_script]
            .into_iter()
            .chain(self.wrappers.iter())
    }
}

/// Writes the continuation scripts for the current step of a job
///
/// Everything that can fail is checked before the first file is written.
pub struct ContinuationBuilder<'a> {
    wd: &'a WorkingDirectory,
    machine: &'a MachineConfiguration,
    policy: &'a dyn WalltimePolicy,
    overwrite: bool,
    explicit_host: bool,
}

impl<'a> ContinuationBuilder<'a> {
    pub fn new(wd: &'a WorkingDirectory, machine: &'a MachineConfiguration) -> ContinuationBuilder<'a> {
        ContinuationBuilder {
            wd,
            machine,
            policy: &DEFAULT_POLICY,
            overwrite: true,
            explicit_host: false,
        }
    }

    /// Hour budget used for `extend`/`until` walltimes
    pub fn policy(mut self, policy: &'a dyn WalltimePolicy) -> ContinuationBuilder<'a> {
        self.policy = policy;
        self
    }

    pub fn overwrite(mut self, overwrite: bool) -> ContinuationBuilder<'a> {
        self.overwrite = overwrite;
        self
    }

    /// The machine was picked by name rather than by the local hostname
    pub fn explicit_host(mut self, explicit_host: bool) -> ContinuationBuilder<'a> {
        self.explicit_host = explicit_host;
        self
    }

    pub fn build(&self) -> Result<GeneratedScripts, JobError> {
        let header_template = self
            .machine
            .cluster_header
            .as_deref()
            .ok_or(JobError::MissingClusterHeader)?;
        let max_hours = resolve_max_hours(self.machine, self.policy)?;
        let nprocs = self.machine.process_count()?;

        let store = self.wd.state_store();
        let mut state = store.load()?;
        let step_dir = state.step_dir(&self.wd.path)?;
        info!("Writing continuation scripts for {}", step_dir.display());

        if self.explicit_host && !self.machine.modules().is_empty() {
            warn!("Building for a named machine: modules it loads may not exist on this host");
        }

        let run_path = step_dir.join(RUN_SCRIPT);
        let cluster_path = step_dir.join(CLUSTER_SCRIPT);
        let header_path = step_dir.join(HEADER_SCRIPT);
        let wrappers = wrapper::plan(self.wd)?;
        if !self.overwrite {
            let targets = [&run_path, &cluster_path, &header_path]
                .into_iter()
                .chain(wrappers.iter().map(|w| &w.path));
            for target in targets {
                if target.exists() {
                    return Err(JobError::RefuseOverwrite(target.clone()));
                }
            }
        }

        let template = self.run_script_template(&state, &step_dir)?;
        let settings = self.settings(&state, nprocs, max_hours);
        let run_script = match splice_at_marker(&template, SETTINGS_MARKER, &settings_block(&settings)) {
            Some(script) => script,
            None => {
                warn!("Run script template has no `{SETTINGS_MARKER}` line; settings not applied");
                template
            }
        };
        let header = self.header(header_template, &settings);

        write_script(&run_path, &run_script)?;
        make_executable(&run_path)?;
        write_script(&header_path, &header)?;
        write_script(&cluster_path, &format!("{header}{}", strip_interpreter(&run_script)))?;
        info!("Submit {} from {} or run `jatkaja submit`", CLUSTER_SCRIPT, step_dir.display());
        let wrappers = wrapper::write(&wrappers, &header)?;

        state.continuation_script = Some(RUN_SCRIPT.to_string());
        store.save(&state)?;

        Ok(GeneratedScripts {
            run_script: run_path,
            cluster_script: cluster_path,
            header_script: header_path,
            wrappers,
        })
    }

    /// A cached template named by the state document, unless overwriting; else the built-in one
    fn run_script_template(&self, state: &StateDocument, step_dir: &Path) -> Result<String, JobError> {
        /// included default run script
        static DEFAULT_RUN_SCRIPT: &str =
            include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/templates/script-continue.sh"));
        if !self.overwrite {
            if let Some(cached) = &state.continuation_script {
                let path = step_dir.join(cached);
                if path.is_file() {
                    info!("Using run script template {}", path.display());
                    return fs::read_to_string(&path).map_err(JobError::io(&path));
                }
            }
        }
        Ok(DEFAULT_RUN_SCRIPT.to_string())
    }

    /// Settings shared by the run script and the header
    fn settings(&self, state: &StateDocument, nprocs: u32, max_hours: f64) -> TokenTable {
        let mut settings = TokenTable::new();
        settings.insert("jobname", self.wd.job_name());
        settings.insert("nprocs", nprocs);
        settings.insert("maxhours", max_hours);
        for (tool, path) in self.machine.tool_paths(&state.tool_paths) {
            settings.insert(&shell_name(&tool), path);
        }
        if let Some(extend) = self.machine.extend {
            settings.insert("extend", extend);
        }
        if let Some(until) = self.machine.until {
            settings.insert("until", until);
            settings.insert("mode", "until");
        }
        settings
    }

    /// Header with module loads appended, then machine and settings tokens substituted
    fn header(&self, template: &str, settings: &TokenTable) -> String {
        let mut header = template.to_string();
        let modules = self.machine.modules();
        if !modules.is_empty() && !header.is_empty() && !header.ends_with('\n') {
            header.push('\n');
        }
        for module in modules {
            header.push_str(&format!("module load {module}\n"));
        }
        let mut tokens = self.machine.header_tokens();
        tokens.merge(settings);
        let mut header = render(&header, &tokens, Quoting::Literal);
        if !header.is_empty() && !header.ends_with('\n') {
            header.push('\n');
        }
        header
    }
}

/// Tool names become shell variable names: `gmx-mpi` → `GMX_MPI`
fn shell_name(tool: &str) -> String {
    tool.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Drop a leading `#!` line
fn strip_interpreter(script: &str) -> &str {
    if script.starts_with("#!") {
        script.split_once('\n').map_or("", |(_, rest)| rest)
    } else {
        script
    }
}

fn write_script(path: &Path, content: &str) -> Result<(), JobError> {
    let verb = if path.exists() { "Overwriting" } else { "Writing" };
    info!("{verb} {}", path.display());
    fs::write(path, content).map_err(JobError::io(path))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), JobError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o744)).map_err(JobError::io(path))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), JobError> {
    Ok(())
}
