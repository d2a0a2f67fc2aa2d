//! Session workers.
//!
//! A fixed pool of MAX_SESSION_COUNT threads. Each drains one session
//! at a time: open the three pipes, ack the connect, then service
//! requests until the client disconnects or the session's terminate
//! flag trips. The worker owns its session's descriptors; the
//! subscription registry only ever sees the notification descriptor as
//! a raw back-reference.

use crate::sessions::Session;
use crate::signals;
use crate::state::ServerState;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use nix::sys::signal::Signal;
use shelf_core::limits::{MAX_SESSION_COUNT, MAX_STRING_SIZE};
use shelf_core::protocol::{response_frame, status, OpCode, SessionRequest};
use shelf_core::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::os::fd::{AsFd, AsRawFd};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, warn};

/// How long a worker parks in poll() before rechecking its flags.
const POLL_INTERVAL_MS: u16 = 100;

/// Spawn the fixed pool of session workers.
pub fn spawn_session_workers(state: &Arc<ServerState>) -> Result<Vec<JoinHandle<()>>> {
    let mut handles = Vec::with_capacity(MAX_SESSION_COUNT);
    for i in 0..MAX_SESSION_COUNT {
        let state = Arc::clone(state);
        let handle = std::thread::Builder::new()
            .name(format!("shelf-session-{}", i))
            .spawn(move || worker_loop(&state))
            .map_err(|e| Error::startup(format!("spawning session worker: {}", e)))?;
        handles.push(handle);
    }
    Ok(handles)
}

fn worker_loop(state: &Arc<ServerState>) {
    // Reload and child-exit are other threads' jobs.
    let _ = signals::block_in_this_thread(&[Signal::SIGUSR1, Signal::SIGCHLD]);

    while let Some(session) = state.sessions.next() {
        if let Err(err) = serve_session(state, &session) {
            warn!(resp = %session.resp_path().display(), %err, "session abandoned");
        }
        state.sessions.retire(&session);
    }
}

/// Run one session to completion.
fn serve_session(state: &Arc<ServerState>, session: &Arc<Session>) -> Result<()> {
    let mut req = open_read_nonblocking(session.req_path())?;
    let mut resp = match open_write_interruptible(session.resp_path(), session)? {
        Some(file) => file,
        None => return Ok(()),
    };
    let notif = match open_write_interruptible(session.notif_path(), session)? {
        Some(file) => file,
        None => return Ok(()),
    };
    let notif_fd = notif.as_raw_fd();

    debug!(resp = %session.resp_path().display(), "session adopted");
    write_response(&mut resp, OpCode::Connect as u8, status::OK);

    let mut buffer = [0u8; MAX_STRING_SIZE];
    while !session.should_terminate() && !signals::terminate_requested() {
        if !wait_readable(&req)? {
            continue;
        }

        let read = match req.read(&mut buffer) {
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => continue,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if read == 0 {
            // All writers gone; hold the session open until DISCONNECT
            // or a terminate, without spinning on EOF.
            std::thread::sleep(Duration::from_millis(u64::from(POLL_INTERVAL_MS)));
            continue;
        }

        match SessionRequest::parse(&buffer[..read]) {
            Ok(SessionRequest::Disconnect) => {
                state.subscriptions.remove_client(notif_fd);
                write_response(&mut resp, OpCode::Disconnect as u8, status::OK);
                debug!(resp = %session.resp_path().display(), "session disconnected");
                return Ok(());
            }
            Ok(SessionRequest::Subscribe(key)) => {
                let outcome = state.subscriptions.subscribe(&key, notif_fd, &state.store);
                write_response(&mut resp, OpCode::Subscribe as u8, outcome.code());
            }
            Ok(SessionRequest::Unsubscribe(key)) => {
                let outcome = state.subscriptions.unsubscribe(&key, notif_fd);
                write_response(&mut resp, OpCode::Unsubscribe as u8, outcome.code());
            }
            Err(err) => {
                warn!(%err, "bad session request");
                if let Some(op) = err.response_opcode() {
                    write_response(&mut resp, op, status::ERROR);
                }
            }
        }
    }

    // Terminated from outside (reload or shutdown): drop any registry
    // entries still pointing at our descriptor, then let the pipes
    // close on drop.
    state.subscriptions.remove_client(notif_fd);
    Ok(())
}

/// Park in poll() until the request pipe is readable or the interval
/// lapses. Returns whether a read should be attempted.
fn wait_readable(req: &File) -> Result<bool> {
    let mut fds = [PollFd::new(req.as_fd(), PollFlags::POLLIN)];
    match poll(&mut fds, PollTimeout::from(POLL_INTERVAL_MS)) {
        Ok(0) => Ok(false),
        Ok(_) => {
            let revents = fds[0].revents().unwrap_or(PollFlags::empty());
            Ok(revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP))
        }
        Err(nix::errno::Errno::EINTR) => Ok(false),
        Err(errno) => Err(Error::Io(errno.into())),
    }
}

fn open_read_nonblocking(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .custom_flags(nix::libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| Error::resource_open(path, e))
}

/// Open the write end of a client FIFO without wedging the worker.
///
/// A blocking open would park until the client opens its read end,
/// which an already-dead client never will; ENXIO is retried until the
/// client shows up or the session is told to terminate. The descriptor
/// stays non-blocking: frames are tiny and a full pipe is treated like
/// any other failed client write.
fn open_write_interruptible(path: &Path, session: &Session) -> Result<Option<File>> {
    loop {
        match OpenOptions::new()
            .write(true)
            .custom_flags(nix::libc::O_NONBLOCK)
            .open(path)
        {
            Ok(file) => return Ok(Some(file)),
            Err(e) if e.raw_os_error() == Some(nix::libc::ENXIO) => {
                if session.should_terminate() || signals::terminate_requested() {
                    return Ok(None);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(Error::resource_open(path, e)),
        }
    }
}

/// Response write failures are logged and the session carries on; the
/// client may simply be slow tearing down.
fn write_response(resp: &mut File, op_code: u8, code: u8) {
    if let Err(err) = resp.write_all(&response_frame(op_code, code)) {
        warn!(op_code, %err, "failed to write response frame");
    }
}
