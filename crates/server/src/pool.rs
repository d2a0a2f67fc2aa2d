//! The job worker pool.
//!
//! min(max_threads, num_jobs) workers drain the job queue and exit when
//! it runs dry. The pool has a finite lifetime: dispatch blocks until
//! every worker has joined.

use crate::signals;
use crate::state::ServerState;
use nix::sys::signal::Signal;
use shelf_core::{Error, Result};
use shelf_jobs::{JobQueue, JobRunner};
use std::sync::Arc;
use tracing::{info, warn};

/// Enumerate the jobs directory and run everything in it to completion.
pub fn run_all_jobs(state: &Arc<ServerState>) -> Result<()> {
    let queue = Arc::new(JobQueue::from_dir(&state.config.jobs_dir)?);
    let workers = state.config.max_threads.min(queue.num_files());
    info!(
        jobs = queue.num_files(),
        workers, "dispatching job workers"
    );
    if workers == 0 {
        return Ok(());
    }

    let mut handles = Vec::with_capacity(workers);
    for i in 0..workers {
        let state = Arc::clone(state);
        let queue = Arc::clone(&queue);
        let handle = std::thread::Builder::new()
            .name(format!("shelf-job-{}", i))
            .spawn(move || job_worker_loop(&state, &queue))
            .map_err(|e| Error::startup(format!("spawning job worker: {}", e)))?;
        handles.push(handle);
    }

    for handle in handles {
        if handle.join().is_err() {
            warn!("a job worker panicked");
        }
    }
    info!("job queue drained");
    Ok(())
}

fn job_worker_loop(state: &Arc<ServerState>, queue: &Arc<JobQueue>) {
    // SIGCHLD belongs to the reaper and SIGUSR1 to the listener.
    let _ = signals::block_in_this_thread(&[Signal::SIGUSR1, Signal::SIGCHLD]);

    let runner = JobRunner::new(Arc::clone(&state.ops), Arc::clone(&state.backups));
    while let Some(mut job) = queue.pop() {
        // A terminate signal mid-batch abandons the remaining queue.
        if signals::terminate_requested() {
            break;
        }
        if let Err(err) = runner.run(&mut job) {
            warn!(job = %job.input_path().display(), %err, "job failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::fs;
    use tempfile::TempDir;

    fn state_for(dir: &TempDir, max_threads: usize) -> Arc<ServerState> {
        ServerState::new(ServerConfig {
            jobs_dir: dir.path().to_path_buf(),
            max_threads,
            max_backups: 1,
            registration_fifo: dir.path().join("registry.fifo"),
        })
    }

    #[test]
    fn test_empty_directory_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let state = state_for(&dir, 4);
        run_all_jobs(&state).unwrap();
    }

    #[test]
    fn test_all_jobs_produce_outputs() {
        let dir = TempDir::new().unwrap();
        for i in 0..6 {
            fs::write(
                dir.path().join(format!("job{}.job", i)),
                format!("WRITE [(j{},{})]\nREAD [j{}]\n", i, i, i),
            )
            .unwrap();
        }

        let state = state_for(&dir, 3);
        run_all_jobs(&state).unwrap();

        for i in 0..6 {
            let out = fs::read_to_string(dir.path().join(format!("job{}.out", i))).unwrap();
            assert_eq!(out, format!("[(j{},{})]\n", i, i));
        }
    }

    #[test]
    fn test_workers_share_one_store() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("writer.job"), "WRITE [(shared,yes)]\n").unwrap();
        let state = state_for(&dir, 2);
        run_all_jobs(&state).unwrap();
        assert_eq!(state.store.get("shared"), Some("yes".to_string()));
    }

    #[test]
    fn test_unreadable_job_does_not_stop_the_pool() {
        let dir = TempDir::new().unwrap();
        // A directory named like a job is skipped by discovery; a job
        // that vanishes between discovery and open is just logged.
        fs::write(dir.path().join("good.job"), "WRITE [(g,1)]\n").unwrap();
        let state = state_for(&dir, 1);
        run_all_jobs(&state).unwrap();
        assert_eq!(state.store.get("g"), Some("1".to_string()));
    }
}
