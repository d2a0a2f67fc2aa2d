//! The registration listener.
//!
//! One thread. Creates the well-known FIFO (mode 0666) if absent, opens
//! it read-only and non-blocking, then loops until shutdown: service a
//! pending reload first, then try to read one CONNECT record and admit
//! the session. Records that are not CONNECT are ignored. On exit the
//! FIFO is closed and unlinked, and subscriptions and sessions are torn
//! down.

use crate::sessions::DuplicateSession;
use crate::signals;
use crate::state::ServerState;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use nix::unistd::mkfifo;
use shelf_core::limits::MAX_STRING_SIZE;
use shelf_core::protocol::{response_frame, status, ConnectRequest, OpCode, ProtocolError};
use shelf_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::AsFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const POLL_INTERVAL_MS: u16 = 100;

/// Body of the listener thread.
pub fn listener_loop(state: Arc<ServerState>) {
    // SIGUSR1 is this thread's signal; SIGCHLD belongs to the reaper.
    let _ = signals::block_in_this_thread(&[Signal::SIGCHLD]);
    let _ = signals::unblock_in_this_thread(&[Signal::SIGUSR1]);

    let path = state.config.registration_fifo.clone();
    let fifo = match open_registration_fifo(&path) {
        Ok(fifo) => fifo,
        Err(err) => {
            error!(%err, "registration listener failed to start");
            return;
        }
    };
    info!(path = %path.display(), "registration listener ready");

    run(&state, fifo);

    // Shutdown: close, unlink, and tear the session layer down.
    if let Err(err) = std::fs::remove_file(&path) {
        warn!(path = %path.display(), %err, "failed to unlink registration FIFO");
    }
    state.subscriptions.clear_all();
    state.sessions.disconnect_all();
    info!("registration listener stopped");
}

fn run(state: &Arc<ServerState>, mut fifo: File) {
    let mut buffer = [0u8; MAX_STRING_SIZE];
    while !signals::terminate_requested() {
        // Reload comes first so a signal sent while the pipe is quiet
        // is honored promptly.
        if signals::take_reload_request() {
            info!("reload: clearing subscriptions, disconnecting sessions");
            state.reload();
        }

        match read_record(&mut fifo, &mut buffer) {
            Ok(0) => continue,
            Ok(n) => handle_record(state, &buffer[..n]),
            Err(err) => {
                warn!(%err, "registration pipe read failed");
                std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
            }
        }
    }
}

/// Poll, then read one record. Returns 0 when there is nothing to
/// parse this round.
fn read_record(fifo: &mut File, buffer: &mut [u8]) -> Result<usize> {
    let mut fds = [PollFd::new(fifo.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
        Ok(0) => return Ok(0),
        Ok(_) => {}
        Err(nix::errno::Errno::EINTR) => return Ok(0),
        Err(errno) => return Err(Error::Io(errno.into())),
    }

    match fifo.read(buffer) {
        Ok(0) => {
            // No writer on the FIFO right now; poll flagged the hangup.
            std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
            Ok(0)
        }
        Ok(n) => Ok(n),
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => Ok(0),
        Err(e) => Err(e.into()),
    }
}

fn handle_record(state: &Arc<ServerState>, raw: &[u8]) {
    let connect = match ConnectRequest::parse(raw) {
        Ok(connect) => connect,
        // Only CONNECT is meaningful on the registration pipe.
        Err(ProtocolError::NotConnect(op)) => {
            debug!(op, "ignoring non-connect record on registration pipe");
            return;
        }
        Err(err) => {
            warn!(%err, "malformed registration record");
            return;
        }
    };

    let resp_path = connect.resp_pipe_path.clone();
    match state.sessions.admit(connect) {
        Ok(_) => debug!(resp = %resp_path, "session queued"),
        Err(DuplicateSession) => {
            warn!(resp = %resp_path, "duplicate session rejected");
            reject_duplicate(Path::new(&resp_path));
        }
    }
}

/// Tell the duplicate client it was refused: `[1, 3]` straight down its
/// response pipe. Best-effort; the client may already be gone. The
/// non-blocking open cannot hang the listener: the path belongs to a
/// live session, so its reader normally exists.
fn reject_duplicate(resp_path: &Path) {
    match OpenOptions::new()
        .write(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(resp_path)
    {
        Ok(mut resp) => {
            let frame = response_frame(OpCode::Connect as u8, status::DUPLICATE);
            if let Err(err) = resp.write_all(&frame) {
                warn!(path = %resp_path.display(), %err, "failed to send duplicate rejection");
            }
        }
        Err(err) => {
            warn!(path = %resp_path.display(), %err, "cannot open duplicate client's response pipe");
        }
    }
}

/// Create (if absent) and open the registration FIFO, read-only and
/// non-blocking.
fn open_registration_fifo(path: &Path) -> Result<File> {
    match mkfifo(path, Mode::from_bits_truncate(0o666)) {
        Ok(()) => {}
        Err(nix::errno::Errno::EEXIST) => {}
        Err(errno) => {
            return Err(Error::resource_open(path, errno.into()));
        }
    }

    OpenOptions::new()
        .read(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| Error::resource_open(path, e))
}
