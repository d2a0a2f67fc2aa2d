//! Server command line.
//!
//! `shelfd <jobs_dir> <max_threads> <max_backups> <registration_fifo_path>`

use clap::Parser;
use shelf_core::{Error, Result};
use std::path::PathBuf;

/// Command-line configuration for the server.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shelfd",
    about = "Job-driven key-value store with pipe-connected subscriber sessions"
)]
pub struct ServerConfig {
    /// Directory scanned recursively for .job files
    pub jobs_dir: PathBuf,

    /// Maximum number of job worker threads
    pub max_threads: usize,

    /// Maximum number of concurrent snapshot child processes
    pub max_backups: usize,

    /// Path of the registration FIFO clients send CONNECT to
    pub registration_fifo: PathBuf,
}

impl ServerConfig {
    /// Reject configurations the server cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(Error::startup("max_threads must be at least 1"));
        }
        if self.max_backups == 0 {
            return Err(Error::startup("max_backups must be at least 1"));
        }
        if !self.jobs_dir.is_dir() {
            return Err(Error::startup(format!(
                "jobs directory {} does not exist",
                self.jobs_dir.display()
            )));
        }
        Ok(())
    }
}
