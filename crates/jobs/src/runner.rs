//! Per-job execution.
//!
//! `run` opens the job input, creates the `.out` sibling, then drives
//! the command stream against the operations layer. A malformed command
//! costs one diagnostic and nothing else; the job keeps going.

use crate::job::Job;
use crate::parser::CommandReader;
use shelf_core::{Command, Error, Result};
use shelf_engine::{BackupEngine, Ops};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::sync::Arc;
use tracing::warn;

const USAGE: &str = "Available commands:\n\
    \x20 WRITE [(key,value)(key2,value2),...]\n\
    \x20 READ [key,key2,...]\n\
    \x20 DELETE [key,key2,...]\n\
    \x20 SHOW\n\
    \x20 WAIT <delay_ms>\n\
    \x20 BACKUP\n\
    \x20 HELP\n";

/// Executes jobs against the operations layer and the snapshot engine.
pub struct JobRunner {
    ops: Arc<Ops>,
    backups: Arc<BackupEngine>,
}

impl JobRunner {
    /// Bind a runner to the shared engine pieces.
    pub fn new(ops: Arc<Ops>, backups: Arc<BackupEngine>) -> Self {
        JobRunner { ops, backups }
    }

    /// Run one job to completion.
    pub fn run(&self, job: &mut Job) -> Result<()> {
        let input = File::open(job.input_path())
            .map_err(|e| Error::resource_open(job.input_path(), e))?;
        let out_path = job.output_path();
        let out_file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o644)
            .open(&out_path)
            .map_err(|e| Error::resource_open(&out_path, e))?;
        let mut out = BufWriter::new(out_file);

        let mut reader = CommandReader::new(BufReader::new(input));
        while let Some(item) = reader.next_command() {
            match item {
                Ok(command) => self.dispatch(command, job, &mut out)?,
                Err(err) => {
                    warn!(job = %job.input_path().display(), %err, "skipping command");
                }
            }
        }

        out.flush()?;
        Ok(())
    }

    fn dispatch<W: Write>(&self, command: Command, job: &mut Job, out: &mut W) -> Result<()> {
        match command {
            Command::Write(pairs) => self.ops.write(&pairs, out),
            Command::Read(keys) => self.ops.read(&keys, out),
            Command::Delete(keys) => self.ops.delete(&keys, out),
            Command::Show => self.ops.show(out),
            Command::Wait(delay_ms) => {
                // The banner must reach the file before the sleep starts.
                out.flush()?;
                self.ops.wait(delay_ms, out)
            }
            Command::Backup => {
                // The gate is taken and the fork happens with no store
                // lock held; the parent resumes the job immediately.
                out.flush()?;
                let path = job.next_backup_path();
                if let Err(err) = self.backups.spawn_snapshot(self.ops.store(), &path) {
                    warn!(job = %job.input_path().display(), %err, "backup failed");
                }
                Ok(())
            }
            Command::Help => {
                print!("{}", USAGE);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use shelf_engine::SubscriptionRegistry;
    use shelf_store::Store;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn runner_with(max_backups: usize) -> (JobRunner, Arc<BackupEngine>) {
        let store = Arc::new(Store::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let ops = Arc::new(Ops::new(store, registry));
        let backups = Arc::new(BackupEngine::new(max_backups));
        (JobRunner::new(ops, Arc::clone(&backups)), backups)
    }

    fn run_job_file(contents: &str) -> (TempDir, String) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.job");
        fs::write(&path, contents).unwrap();

        let (runner, _) = runner_with(1);
        let mut job = Job::new(&path);
        runner.run(&mut job).unwrap();

        let out = fs::read_to_string(dir.path().join("test.out")).unwrap();
        (dir, out)
    }

    #[test]
    fn test_show_on_empty_store_produces_empty_output() {
        let (_dir, out) = run_job_file("SHOW\n");
        assert!(out.is_empty());
    }

    #[test]
    fn test_basic_write_read() {
        let (_dir, out) = run_job_file("WRITE [(a,1)(b,2)]\nREAD [a,b]\n");
        assert_eq!(out, "[(a,1)(b,2)]\n");
    }

    #[test]
    fn test_read_missing() {
        let (_dir, out) = run_job_file("READ [z]\n");
        assert_eq!(out, "[(z,KVSERROR)]\n");
    }

    #[test]
    fn test_delete_missing() {
        let (_dir, out) = run_job_file("DELETE [z]\n");
        assert_eq!(out, "[(z,KVSMISSING)]\n");
    }

    #[test]
    fn test_invalid_command_is_skipped() {
        let (_dir, out) = run_job_file("NONSENSE\nWRITE [(a,1)]\nREAD [a]\n");
        assert_eq!(out, "[(a,1)]\n");
    }

    #[test]
    fn test_wait_banner_lands_in_output() {
        let (_dir, out) = run_job_file("WAIT 1\nREAD [x]\n");
        assert_eq!(out, "Waiting...\n[(x,KVSERROR)]\n");
    }

    #[test]
    fn test_output_file_is_truncated_on_rerun() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("again.job");
        fs::write(&path, "READ [q]\n").unwrap();

        let (runner, _) = runner_with(1);
        runner.run(&mut Job::new(&path)).unwrap();
        runner.run(&mut Job::new(&path)).unwrap();

        let out = fs::read_to_string(dir.path().join("again.out")).unwrap();
        assert_eq!(out, "[(q,KVSERROR)]\n");
    }

    #[test]
    fn test_missing_input_reports_open_error() {
        let dir = TempDir::new().unwrap();
        let (runner, _) = runner_with(1);
        let mut job = Job::new(dir.path().join("ghost.job"));
        assert!(matches!(
            runner.run(&mut job),
            Err(Error::ResourceOpen { .. })
        ));
    }

    #[test]
    #[serial(snapshot_children)]
    fn test_backup_writes_numbered_snapshots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.job");
        fs::write(&path, "WRITE [(a,1)]\nBACKUP\nWRITE [(b,2)]\nBACKUP\n").unwrap();

        let (runner, backups) = runner_with(2);
        let mut job = Job::new(&path);
        runner.run(&mut job).unwrap();
        assert_eq!(job.backups_issued(), 2);

        let mut reaped = 0;
        for _ in 0..500 {
            reaped += backups.reap_exited();
            if reaped >= 2 {
                break;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(reaped, 2);

        let first = fs::read_to_string(dir.path().join("snap-1.bck")).unwrap();
        assert_eq!(first, "(a, 1)\n");
        let second = fs::read_to_string(dir.path().join("snap-2.bck")).unwrap();
        assert_eq!(second, "(a, 1)\n(b, 2)\n");
    }
}
