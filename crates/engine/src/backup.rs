//! The snapshot engine.
//!
//! A BACKUP forks: the child inherits a copy-on-write image of the
//! table, renders it to the backup file in SHOW format, and exits. The
//! parent continues its job immediately and never waits for the child
//! here; a dedicated reaper collects exited children and returns their
//! concurrency slots.
//!
//! At most `max_backups` children are alive at once, enforced by a
//! counted semaphore: `spawn_snapshot` takes a permit (blocking when
//! none are free) and every reaped child posts one back.
//!
//! The caller must not hold any store lock across the fork. The child
//! cannot observe a lock captured mid-write ever being released, so it
//! reads the table unsynchronized instead of locking.

use crate::ops::push_entry_line;
use crate::semaphore::Semaphore;
use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use shelf_core::{Error, Result};
use shelf_store::Store;
use std::fs::OpenOptions;
use std::io::Write;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use tracing::{debug, warn};

/// Fork-based snapshot engine with bounded concurrency.
pub struct BackupEngine {
    gate: Semaphore,
    max_backups: usize,
}

impl BackupEngine {
    /// Create an engine allowing `max_backups` children in flight.
    pub fn new(max_backups: usize) -> Self {
        BackupEngine {
            gate: Semaphore::new(max_backups),
            max_backups,
        }
    }

    /// Fork a child that dumps the store to `path`.
    ///
    /// Blocks while `max_backups` children are already in flight. On
    /// fork failure the permit is returned and the job sees the error;
    /// a backup is never retried automatically.
    pub fn spawn_snapshot(&self, store: &Store, path: &Path) -> Result<Pid> {
        self.gate.acquire();

        match unsafe { fork() } {
            Err(errno) => {
                self.gate.post();
                Err(Error::SnapshotFork(errno.to_string()))
            }
            Ok(ForkResult::Child) => {
                let code = match write_snapshot(store, path) {
                    Ok(()) => 0,
                    Err(_) => 1,
                };
                // _exit, not exit: the child must not run the parent's
                // atexit handlers or flush its inherited stdio.
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                debug!(pid = child.as_raw(), path = %path.display(), "snapshot child forked");
                Ok(child)
            }
        }
    }

    /// Reap every child that has already exited, without blocking.
    ///
    /// One SIGCHLD may coalesce several deaths, so this loops until no
    /// more children are reapable. Each reaped child posts one permit.
    pub fn reap_exited(&self) -> usize {
        let mut reaped = 0;
        loop {
            match waitpid(None, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::StillAlive) => break,
                Ok(WaitStatus::Exited(pid, code)) => {
                    if code != 0 {
                        warn!(pid = pid.as_raw(), code, "snapshot child failed");
                    }
                    self.gate.post();
                    reaped += 1;
                }
                Ok(WaitStatus::Signaled(pid, signal, _)) => {
                    warn!(pid = pid.as_raw(), ?signal, "snapshot child killed");
                    self.gate.post();
                    reaped += 1;
                }
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
        reaped
    }

    /// Block until every outstanding child has been collected. Used
    /// during shutdown.
    pub fn drain(&self) {
        loop {
            match waitpid(None, None) {
                Ok(WaitStatus::Exited(..)) | Ok(WaitStatus::Signaled(..)) => self.gate.post(),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(_) => break,
            }
        }
    }

    /// Free snapshot slots right now.
    pub fn available_slots(&self) -> usize {
        self.gate.permits()
    }

    /// The configured concurrency bound.
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }
}

/// Render the table to the backup file, SHOW format, mode 0644.
///
/// Runs in the forked child: the calling thread is the only thread in
/// this process, and the table image is frozen by copy-on-write.
fn write_snapshot(store: &Store, path: &Path) -> std::io::Result<()> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)?;

    let mut buffer = String::new();
    unsafe {
        store.for_each_entry_unsynchronized(|key, value| {
            push_entry_line(&mut buffer, key, value);
        });
    }
    file.write_all(buffer.as_bytes())
}
