use std::path::{Path, PathBuf};
use std::process;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::warn;

use jatkaja::checkpoint;
use jatkaja::machine::catalog::{local_hostname, MachineCatalog};
use jatkaja::machine::config::{default_tool_paths, MachineConfiguration};
use jatkaja::process::{StdinConfirm, SystemRunner};
use jatkaja::script::continuation::ContinuationBuilder;
use jatkaja::submit::submit;
use jatkaja::sync::remote::{RemoteSync, SyncOutcome, UploadRequest, DEFAULT_REMOTE_PATH};
use jatkaja::{JobError, WorkingDirectory};

/// Machine catalog looked up in the job root, then in the user's home
static CATALOG_FILE: &str = "machines.json";
static USER_DIR: &str = ".jatkaja";

#[derive(Parser)]
#[command(name = "jatkaja")]
#[command(about = "Continue, move and submit step-directory simulation jobs", version)]
struct Cli {
    /// Job root directory (holds state.json and the sNN-name step directories)
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    /// Machine catalog (default: ./machines.json, then ~/.jatkaja/machines.json)
    #[arg(long, global = true)]
    machines: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send the files needed to continue this job to a cluster
    Upload {
        /// ssh alias of the cluster
        alias: String,

        /// Parent directory on the cluster
        #[arg(default_value = DEFAULT_REMOTE_PATH)]
        path: String,

        /// Do not ask after the dry run
        #[arg(long)]
        sure: bool,

        /// Send the whole job directory
        #[arg(long)]
        bulk: bool,
    },

    /// Fetch the job back from where it was last uploaded
    Download {
        /// Do not ask after the dry run
        #[arg(long)]
        sure: bool,
    },

    /// Write the continuation and cluster scripts for the current step
    Cluster {
        /// Machine catalog key or host name to build for instead of this host
        #[arg(long)]
        host: Option<String>,

        /// Fail instead of replacing existing scripts
        #[arg(long)]
        no_overwrite: bool,
    },

    /// Submit cluster-continue.sh from the current step
    Submit {
        /// Machine catalog key or host name whose submit command to use
        #[arg(long)]
        host: Option<String>,
    },

    /// Write a fresh state.json from the checkpoint files of the latest step
    Hardstart,
}

fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        match err.downcast_ref::<JobError>() {
            Some(job_error) => eprintln!("[ERROR] {}: {err:#}", job_error.category()),
            None => eprintln!("[ERROR] {err:#}"),
        }
        process::exit(1);
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let wd = WorkingDirectory::new(&cli.root);
    let runner = SystemRunner;
    let confirm = StdinConfirm;

    match cli.command {
        Commands::Upload { alias, path, sure, bulk } => {
            let request = UploadRequest {
                alias,
                remote_path: path,
                confirmed: sure,
                bulk,
            };
            let outcome = RemoteSync::new(&wd, &runner, &confirm).upload(&request)?;
            report(outcome);
        }
        Commands::Download { sure } => {
            let outcome = RemoteSync::new(&wd, &runner, &confirm).download(sure)?;
            report(outcome);
        }
        Commands::Cluster { host, no_overwrite } => {
            let catalog = read_catalog(cli.machines.as_deref(), &wd)?;
            let machine = select_machine(&catalog, host.as_deref())?;
            let generated = ContinuationBuilder::new(&wd, machine)
                .overwrite(!no_overwrite)
                .explicit_host(host.is_some())
                .build()?;
            for path in generated.paths() {
                println!("[STATUS] wrote {}", path.display());
            }
        }
        Commands::Submit { host } => {
            let catalog = read_catalog(cli.machines.as_deref(), &wd)?;
            let machine = select_machine(&catalog, host.as_deref())?;
            let invocation = submit(&wd, machine, &runner)?;
            println!("[STATUS] submitted with `{invocation}`");
        }
        Commands::Hardstart => {
            let tool_paths = match read_catalog(cli.machines.as_deref(), &wd) {
                Ok(catalog) => match select_machine(&catalog, None) {
                    Ok(machine) => machine.tool_paths(&default_tool_paths()),
                    Err(e) => {
                        warn!("Using default tool paths: {e:#}");
                        default_tool_paths()
                    }
                },
                Err(e) => {
                    warn!("Using default tool paths: {e:#}");
                    default_tool_paths()
                }
            };
            let state = checkpoint::reconstruct(&wd, tool_paths)?;
            println!(
                "[STATUS] wrote {} for {}",
                wd.state_store().path().display(),
                state.here.unwrap_or_default()
            );
        }
    }
    Ok(())
}

fn report(outcome: SyncOutcome) {
    match outcome {
        SyncOutcome::Completed(record) => {
            println!("[STATUS] {:?} {} at {}", record.direction, record.endpoint, record.timestamp)
        }
        SyncOutcome::Declined => println!("[STATUS] cancelled"),
    }
}

fn catalog_path(explicit: Option<&Path>, wd: &WorkingDirectory) -> anyhow::Result<PathBuf> {
    if let Some(path) = explicit {
        return Ok(path.to_path_buf());
    }
    let local = wd.join(CATALOG_FILE);
    if local.is_file() {
        return Ok(local);
    }
    let home = dirs::home_dir().ok_or_else(|| anyhow!("cannot find a home directory for {USER_DIR}"))?;
    Ok(home.join(USER_DIR).join(CATALOG_FILE))
}

fn read_catalog(explicit: Option<&Path>, wd: &WorkingDirectory) -> anyhow::Result<MachineCatalog> {
    let path = catalog_path(explicit, wd)?;
    let catalog = MachineCatalog::read(&path)
        .with_context(|| format!("machine catalog {}", path.display()))?;
    Ok(catalog)
}

fn select_machine<'a>(catalog: &'a MachineCatalog, host: Option<&str>) -> anyhow::Result<&'a MachineConfiguration> {
    let host = match host {
        Some(host) => host.to_string(),
        None => local_hostname().ok_or_else(|| anyhow!("cannot determine the local host name"))?,
    };
    let (_, machine) = catalog.select(&host)?;
    Ok(machine)
}
