use log::{info, warn};

use crate::error::JobError;
use crate::process::{CommandRunner, Confirm, Invocation};
use crate::state::document::{StateDocument, SyncRecord};
use crate::sync::manifest::{UploadList, UploadManifest, UPLOAD_LIST};
use crate::WorkingDirectory;

/// Remote location used when none is given
pub static DEFAULT_REMOTE_PATH: &str = "~";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    /// ssh alias of the cluster
    pub alias: String,
    /// Parent directory on the cluster; the job lands in `<path>/<jobname>`
    pub remote_path: String,
    /// Skip the question after the dry run
    pub confirmed: bool,
    /// Send the whole job root instead of the computed file list
    pub bulk: bool,
}

impl UploadRequest {
    pub fn new(alias: &str) -> UploadRequest {
        UploadRequest {
            alias: alias.to_string(),
            remote_path: DEFAULT_REMOTE_PATH.to_string(),
            confirmed: false,
            bulk: false,
        }
    }
}

/// How a transfer ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Completed(SyncRecord),
    /// The user answered no after the dry run; nothing was transferred or recorded
    Declined,
}

pub struct RemoteSync<'a> {
    wd: &'a WorkingDirectory,
    runner: &'a dyn CommandRunner,
    confirm: &'a dyn Confirm,
    manifest: UploadManifest,
}

impl<'a> RemoteSync<'a> {
    pub fn new(wd: &'a WorkingDirectory, runner: &'a dyn CommandRunner, confirm: &'a dyn Confirm) -> RemoteSync<'a> {
        RemoteSync {
            wd,
            runner,
            confirm,
            manifest: UploadManifest::default(),
        }
    }

    pub fn manifest(mut self, manifest: UploadManifest) -> RemoteSync<'a> {
        self.manifest = manifest;
        self
    }

    /// Push the job to `<alias>:<path>/<jobname>`. History is appended only after rsync
    /// reports success.
    pub fn upload(&self, request: &UploadRequest) -> Result<SyncOutcome, JobError> {
        let store = self.wd.state_store();
        let mut state = store.load()?;
        state.step_dir(&self.wd.path)?;
        if state.serial().is_none() {
            let serial = state.ensure_serial();
            info!("Assigned serial {serial} to this job");
            // saved before the transfer so the uploaded state.json carries it
            store.save(&state)?;
        }

        let files = self.manifest.collect(self.wd, &state)?;
        let name = self.wd.job_name();
        let destination = format!("{}:{}/{}", request.alias, request.remote_path, name);
        let (selection, target, _list) = if request.bulk {
            let target = format!("{}:{}/", request.alias, request.remote_path);
            ("--exclude=.git".to_string(), target, None)
        } else {
            let list = UploadList::write(self.wd, &files)?;
            (format!("--files-from={UPLOAD_LIST}"), destination.clone(), Some(list))
        };
        let args = |flags: &str| {
            vec![
                flags.to_string(),
                selection.clone(),
                format!("../{name}"),
                target.clone(),
            ]
        };

        self.transfer("upload dry run", args("-avin"))?;
        if !(request.confirmed || self.confirm.confirm("continue")) {
            info!("Upload declined; nothing was sent");
            return Ok(SyncOutcome::Declined);
        }
        if let Err(e) = self.transfer("upload", args("-avi")) {
            warn!("Upload failed and was not added to the upload history");
            return Err(e);
        }

        let record = SyncRecord::push(&destination);
        state.record_push(record.clone());
        store.save(&state)?;
        info!("Uploaded to {destination}");
        Ok(SyncOutcome::Completed(record))
    }

    /// Pull everything from the recorded upload destination into the job root, then merge
    /// the fetched state with the one held locally.
    pub fn download(&self, confirmed: bool) -> Result<SyncOutcome, JobError> {
        let store = self.wd.state_store();
        let mut held = store.load()?;
        let upload = held.upload.clone().ok_or(JobError::NoPriorUpload)?;
        let assigned = held.serial().is_none();
        let serial = held.ensure_serial();
        if assigned {
            store.save(&held)?;
        }
        println!(
            "[STATUS] the state says that this simulation (#{serial}) is located at {}",
            upload.destination
        );

        self.pull(&held, &upload.destination, confirmed).map_err(|e| {
            warn!("Download of simulation #{serial} from {} failed", upload.destination);
            e.with_hint(recovery_hint(serial, &upload.destination))
        })
    }

    fn pull(&self, held: &StateDocument, destination: &str, confirmed: bool) -> Result<SyncOutcome, JobError> {
        let args = |flags: &str| {
            vec![
                flags.to_string(),
                "--progress".to_string(),
                format!("{destination}/*"),
                "./".to_string(),
            ]
        };
        self.transfer("download dry run", args("-avin"))?;
        if !(confirmed || self.confirm.confirm("continue")) {
            info!("Download declined; nothing was fetched");
            return Ok(SyncOutcome::Declined);
        }
        self.transfer("download", args("-avi"))?;

        let store = self.wd.state_store();
        let mut merged = if store.exists() {
            match store.load().and_then(|fetched| merge_fetched(held, fetched)) {
                Ok(merged) => merged,
                Err(e) => {
                    warn!("Fetched state document cannot be merged; restoring the local one");
                    store.save(held)?;
                    return Err(e);
                }
            }
        } else {
            held.clone()
        };
        let record = SyncRecord::pull(destination);
        merged.record_pull(record.clone());
        store.save(&merged)?;
        info!("Downloaded from {destination}");
        Ok(SyncOutcome::Completed(record))
    }

    fn transfer(&self, operation: &str, args: Vec<String>) -> Result<(), JobError> {
        let invocation = Invocation::new("rsync", args, &self.wd.path);
        println!("[STATUS] running: {invocation}");
        let failed = |status: String| JobError::TransferFailed {
            operation: operation.to_string(),
            status,
        };
        let code = self
            .runner
            .run(&invocation)
            .map_err(|e| failed(e.to_string()))?;
        if code.success() {
            Ok(())
        } else {
            Err(failed(code.to_string()))
        }
    }
}

fn recovery_hint(serial: u64, destination: &str) -> String {
    format!(
        "simulation #{serial} was last uploaded to {destination}; \
         if it moved, find it on the cluster with `grep -l '\"serial\": {serial}' */state.json`"
    )
}

/// Combine a freshly fetched document with the one held before the pull. Fetched fields
/// win, except that the upload history and record are never lost.
fn merge_fetched(held: &StateDocument, mut fetched: StateDocument) -> Result<StateDocument, JobError> {
    fetched.adopt_serial(held.serial())?;
    let history = std::mem::take(&mut fetched.upload_history);
    fetched.upload_history = merge_history(&held.upload_history, history)?;
    if fetched.upload.is_none() || !fetched.upload_consistent() {
        fetched.upload = held.upload.clone();
    }
    Ok(fetched)
}

/// The longer history wins when one extends the other
fn merge_history(held: &[SyncRecord], fetched: Vec<SyncRecord>) -> Result<Vec<SyncRecord>, JobError> {
    if fetched.starts_with(held) {
        Ok(fetched)
    } else if held.starts_with(&fetched) {
        Ok(held.to_vec())
    } else {
        Err(JobError::HistoryMergeConflict(format!(
            "local history ({} entries) and fetched history ({} entries) diverge",
            held.len(),
            fetched.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::mock::{Answer, ScriptedRunner};
    use crate::process::ExitCode;
    use crate::state::document::{CommandRecord, SyncDirection, UploadRecord};
    use std::collections::BTreeMap;
    use std::fs;
    use std::io;
    use tempfile::TempDir;

    fn job(tmp: &TempDir) -> WorkingDirectory {
        let root = tmp.path().join("job7");
        fs::create_dir_all(root.join("s01-run")).unwrap();
        for file in ["s01-run/md.part0001.cpt", "s01-run/md.part0001.tpr", "makefile", "config.py"] {
            fs::write(root.join(file), "").unwrap();
        }
        let wd = WorkingDirectory::new(&root);
        let mut state = StateDocument::default();
        state.here = Some("s01-run/".into());
        state.command_history.push(CommandRecord {
            command: "mdrun".into(),
            flags: BTreeMap::from([
                ("-s".to_string(), "md.part0001.tpr".to_string()),
                ("-cpo".to_string(), "md.part0001.cpt".to_string()),
            ]),
        });
        wd.state_store().save(&state).unwrap();
        wd
    }

    fn uploaded(wd: &WorkingDirectory) -> StateDocument {
        let store = wd.state_store();
        let mut state = store.load().unwrap();
        state.ensure_serial();
        state.upload = Some(UploadRecord {
            destination: "host:/scratch/job7".into(),
            timestamp: "2024.01.01.1200".into(),
        });
        state.upload_history.push(SyncRecord {
            endpoint: "host:/scratch/job7".into(),
            timestamp: "2024.01.01.1200".into(),
            direction: SyncDirection::Push,
        });
        store.save(&state).unwrap();
        state
    }

    /// Replaces state.json during the real (non dry run) transfer
    struct FetchingRunner {
        fetched: StateDocument,
        wd: WorkingDirectory,
    }

    impl CommandRunner for FetchingRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<ExitCode> {
            if invocation.args[0] == "-avi" {
                self.wd.state_store().save(&self.fetched).unwrap();
            }
            Ok(ExitCode(Some(0)))
        }
    }

    #[test]
    fn upload_runs_dry_run_then_transfer_and_records_push() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::succeeding();
        let request = UploadRequest::new("host");

        let outcome = RemoteSync::new(&wd, &runner, &Answer(true)).upload(&request).unwrap();

        let calls = runner.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(
            calls[0].args,
            vec!["-avin", "--files-from=uploads.txt", "../job7", "host:~/job7"]
        );
        assert_eq!(calls[1].args[0], "-avi");
        assert_eq!(calls[0].program, "rsync");
        assert_eq!(calls[0].cwd, wd.path);

        let state = wd.state_store().load().unwrap();
        assert!(state.serial().is_some());
        assert_eq!(state.upload_history.len(), 1);
        assert_eq!(state.upload.as_ref().unwrap().destination, "host:~/job7");
        assert!(state.upload_consistent());
        assert!(matches!(outcome, SyncOutcome::Completed(r) if r.direction == SyncDirection::Push));
        assert!(!wd.join(UPLOAD_LIST).exists());
    }

    #[test]
    fn bulk_upload_sends_the_whole_root() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::succeeding();
        let mut request = UploadRequest::new("host");
        request.remote_path = "/scratch".into();
        request.bulk = true;
        request.confirmed = true;

        RemoteSync::new(&wd, &runner, &Answer(false)).upload(&request).unwrap();

        assert_eq!(
            runner.calls()[1].args,
            vec!["-avi", "--exclude=.git", "../job7", "host:/scratch/"]
        );
        let state = wd.state_store().load().unwrap();
        assert_eq!(state.upload.unwrap().destination, "host:/scratch/job7");
    }

    #[test]
    fn failed_upload_leaves_history_alone() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::with_codes(vec![0, 12]);

        let err = RemoteSync::new(&wd, &runner, &Answer(true))
            .upload(&UploadRequest::new("host"))
            .unwrap_err();

        assert!(matches!(err, JobError::TransferFailed { .. }));
        let state = wd.state_store().load().unwrap();
        assert!(state.upload_history.is_empty());
        assert!(state.upload.is_none());
        assert!(!wd.join(UPLOAD_LIST).exists());
    }

    #[test]
    fn failed_dry_run_stops_before_transfer() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::with_codes(vec![255]);

        let err = RemoteSync::new(&wd, &runner, &Answer(true))
            .upload(&UploadRequest::new("host"))
            .unwrap_err();

        assert_eq!(err.to_string(), "upload dry run failed (exit status 255)");
        assert_eq!(runner.calls().len(), 1);
    }

    #[test]
    fn declined_upload_sends_nothing() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::succeeding();

        let outcome = RemoteSync::new(&wd, &runner, &Answer(false))
            .upload(&UploadRequest::new("host"))
            .unwrap();

        assert_eq!(outcome, SyncOutcome::Declined);
        assert_eq!(runner.calls().len(), 1);
        assert!(wd.state_store().load().unwrap().upload_history.is_empty());
    }

    #[test]
    fn incomplete_upload_set_runs_nothing() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        fs::remove_file(wd.join("s01-run/md.part0001.tpr")).unwrap();
        let runner = ScriptedRunner::succeeding();

        let err = RemoteSync::new(&wd, &runner, &Answer(true))
            .upload(&UploadRequest::new("host"))
            .unwrap_err();

        assert!(matches!(err, JobError::IncompleteArtifactSet { .. }));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn download_appends_exactly_one_pull() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let before = uploaded(&wd);
        let runner = ScriptedRunner::succeeding();

        let outcome = RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap();

        assert_eq!(
            runner.calls()[1].args,
            vec!["-avi", "--progress", "host:/scratch/job7/*", "./"]
        );
        let after = wd.state_store().load().unwrap();
        assert_eq!(after.upload_history.len(), 2);
        assert_eq!(after.upload_history[0], before.upload_history[0]);
        assert_eq!(after.upload_history[1].direction, SyncDirection::Pull);
        assert_eq!(after.upload_history[1].endpoint, "host:/scratch/job7");
        assert_eq!(after.upload, before.upload);
        assert!(after.upload_consistent());
        assert!(matches!(outcome, SyncOutcome::Completed(_)));
    }

    #[test]
    fn download_keeps_local_history_missing_from_fetched_state() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let held = uploaded(&wd);
        let mut fetched = held.clone();
        fetched.upload = None;
        fetched.upload_history.clear();
        fetched.here = Some("s02-run/".into());
        let runner = FetchingRunner {
            fetched,
            wd: wd.clone(),
        };

        RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap();

        let after = wd.state_store().load().unwrap();
        assert_eq!(after.here.as_deref(), Some("s02-run/"));
        assert_eq!(after.upload, held.upload);
        assert_eq!(after.upload_history.len(), 2);
        assert_eq!(after.serial(), held.serial());
    }

    #[test]
    fn diverging_histories_conflict() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let held = uploaded(&wd);
        let mut fetched = held.clone();
        fetched.upload = None;
        fetched.upload_history[0].timestamp = "2023.12.31.0900".into();
        let runner = FetchingRunner {
            fetched,
            wd: wd.clone(),
        };

        let err = RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap_err();
        assert!(matches!(err.cause(), JobError::HistoryMergeConflict(_)));
        assert!(err.hint().unwrap().contains(&held.serial().unwrap().to_string()));

        let on_disk = wd.state_store().load().unwrap();
        assert_eq!(on_disk.upload, held.upload);
        assert_eq!(on_disk.upload_history, held.upload_history);
    }

    /// Leaves an unreadable state.json behind after the real transfer
    struct CorruptingRunner {
        wd: WorkingDirectory,
    }

    impl CommandRunner for CorruptingRunner {
        fn run(&self, invocation: &Invocation) -> io::Result<ExitCode> {
            if invocation.args[0] == "-avi" {
                fs::write(self.wd.state_store().path(), "{\"here\": ").unwrap();
            }
            Ok(ExitCode(Some(0)))
        }
    }

    #[test]
    fn unreadable_fetched_state_keeps_the_local_one() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let held = uploaded(&wd);
        let runner = CorruptingRunner { wd: wd.clone() };

        let err = RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap_err();

        assert!(matches!(err.cause(), JobError::Json { .. }));
        assert_eq!(err.category(), "state");
        let hint = err.hint().unwrap();
        assert!(hint.contains("host:/scratch/job7"));
        assert!(hint.contains(&held.serial().unwrap().to_string()));
        assert_eq!(wd.state_store().load().unwrap(), held);
    }

    #[test]
    fn download_needs_a_prior_upload() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let runner = ScriptedRunner::succeeding();

        let err = RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap_err();
        assert!(matches!(err, JobError::NoPriorUpload));
        assert!(runner.calls().is_empty());
    }

    #[test]
    fn failed_download_points_at_the_serial() {
        let tmp = TempDir::new().unwrap();
        let wd = job(&tmp);
        let held = uploaded(&wd);
        let runner = ScriptedRunner::with_codes(vec![0, 23]);

        let err = RemoteSync::new(&wd, &runner, &Answer(true)).download(true).unwrap_err();

        assert!(matches!(err.cause(), JobError::TransferFailed { .. }));
        assert!(err.hint().unwrap().contains(&held.serial().unwrap().to_string()));
        assert_eq!(wd.state_store().load().unwrap().upload_history.len(), 1);
    }

    #[test]
    fn merge_history_takes_the_longer_prefix() {
        let a = SyncRecord::push("host:/a");
        let b = SyncRecord::pull("host:/a");
        assert_eq!(merge_history(&[a.clone()], vec![a.clone(), b.clone()]).unwrap().len(), 2);
        assert_eq!(merge_history(&[a.clone(), b.clone()], vec![a.clone()]).unwrap().len(), 2);
        assert_eq!(merge_history(&[], vec![b.clone()]).unwrap(), vec![b.clone()]);
        assert!(merge_history(&[a], vec![b]).is_err());
    }
}
