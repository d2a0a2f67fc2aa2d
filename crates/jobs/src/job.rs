//! Job records, directory discovery, and the job queue.

use parking_lot::Mutex;
use shelf_core::{Error, Result};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};

/// One `.job` input file and its per-job snapshot counter.
#[derive(Debug)]
pub struct Job {
    input_path: PathBuf,
    backups_issued: u32,
}

impl Job {
    /// Create a job record for an input path.
    pub fn new(input_path: impl Into<PathBuf>) -> Self {
        Job {
            input_path: input_path.into(),
            backups_issued: 0,
        }
    }

    /// The `.job` file this job reads.
    pub fn input_path(&self) -> &Path {
        &self.input_path
    }

    /// The `.out` sibling this job writes.
    pub fn output_path(&self) -> PathBuf {
        self.input_path.with_extension("out")
    }

    /// Allocate the next backup path: `<stem>-<n>.bck`, n starting at 1,
    /// alongside the job file.
    pub fn next_backup_path(&mut self) -> PathBuf {
        self.backups_issued += 1;
        let stem = self
            .input_path
            .file_stem()
            .unwrap_or_default()
            .to_string_lossy();
        let name = format!("{}-{}.bck", stem, self.backups_issued);
        match self.input_path.parent() {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    /// How many backups this job has issued so far.
    pub fn backups_issued(&self) -> u32 {
        self.backups_issued
    }
}

/// Recursively collect every `.job` regular file under `dir`.
///
/// Subdirectories are descended; results come back in sorted path order
/// so repeated runs enqueue identically.
pub fn discover_jobs(dir: &Path) -> Result<Vec<Job>> {
    let mut paths = Vec::new();
    collect_job_paths(dir, &mut paths)?;
    paths.sort();
    Ok(paths.into_iter().map(Job::new).collect())
}

fn collect_job_paths(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    let entries = std::fs::read_dir(dir).map_err(|e| Error::resource_open(dir, e))?;
    for entry in entries {
        let entry = entry.map_err(Error::Io)?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(Error::Io)?;
        if file_type.is_dir() {
            collect_job_paths(&path, out)?;
        } else if file_type.is_file() && path.extension().is_some_and(|ext| ext == "job") {
            out.push(path);
        }
    }
    Ok(())
}

/// Mutex-guarded FIFO of pending jobs.
///
/// Populated once before worker dispatch, then drained to empty; the
/// file count is fixed at construction.
pub struct JobQueue {
    jobs: Mutex<VecDeque<Job>>,
    num_files: usize,
}

impl JobQueue {
    /// Build a queue over an already-discovered job list.
    pub fn new(jobs: Vec<Job>) -> Self {
        let num_files = jobs.len();
        JobQueue {
            jobs: Mutex::new(jobs.into()),
            num_files,
        }
    }

    /// Walk `dir` and queue everything found.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        Ok(JobQueue::new(discover_jobs(dir)?))
    }

    /// Take the next job, or `None` when the queue is drained.
    pub fn pop(&self) -> Option<Job> {
        self.jobs.lock().pop_front()
    }

    /// Jobs still waiting.
    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Whether the queue is currently empty.
    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Number of job files found at enumeration time.
    pub fn num_files(&self) -> usize {
        self.num_files
    }
}
