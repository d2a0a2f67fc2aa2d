//! The typed command model.
//!
//! The job tokenizer turns the textual command language into this enum;
//! the runner dispatches on it. Batch sizes are bounded by the tokenizer
//! ([`MAX_WRITE_SIZE`](crate::limits::MAX_WRITE_SIZE)), so a constructed
//! `Command` is always within limits.

/// One command from a job file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Insert or overwrite each (key, value) pair, in order.
    Write(Vec<(String, String)>),
    /// Read each key, in order.
    Read(Vec<String>),
    /// Delete each key, in order.
    Delete(Vec<String>),
    /// Dump every entry in bucket order.
    Show,
    /// Emit `Waiting...` and sleep for the given number of milliseconds.
    Wait(u64),
    /// Fork a snapshot of the store to a backup file.
    Backup,
    /// Print command usage.
    Help,
}

impl Command {
    /// Short name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Write(_) => "WRITE",
            Command::Read(_) => "READ",
            Command::Delete(_) => "DELETE",
            Command::Show => "SHOW",
            Command::Wait(_) => "WAIT",
            Command::Backup => "BACKUP",
            Command::Help => "HELP",
        }
    }
}
