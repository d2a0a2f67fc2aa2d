//! Signal handling.
//!
//! Handlers do exactly one async-signal-safe thing: set an atomic flag.
//! Each flag has a designated servicing thread that polls it at a low
//! cadence, and the corresponding signal is blocked in every other
//! thread:
//!
//! - SIGINT / SIGTERM set the terminate flag the main idle loop (and
//!   every worker loop) observes;
//! - SIGUSR1 sets the reload flag serviced by the registration listener;
//! - SIGCHLD sets the child-exited flag serviced by the reaper.
//!
//! These three statics are the only module-level mutable state in the
//! server; signal handlers cannot reach anything else safely.

use nix::libc::c_int;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use shelf_core::{Error, Result};
use std::sync::atomic::{AtomicBool, Ordering};

static TERMINATE: AtomicBool = AtomicBool::new(false);
static RELOAD_REQUESTED: AtomicBool = AtomicBool::new(false);
static CHILD_EXITED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_terminate(_: c_int) {
    TERMINATE.store(true, Ordering::SeqCst);
}

extern "C" fn on_reload(_: c_int) {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

extern "C" fn on_child(_: c_int) {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}

/// Install the four handlers. Call once, before any thread is spawned.
pub fn install_handlers() -> Result<()> {
    install(Signal::SIGINT, on_terminate)?;
    install(Signal::SIGTERM, on_terminate)?;
    install(Signal::SIGUSR1, on_reload)?;
    install(Signal::SIGCHLD, on_child)?;
    Ok(())
}

fn install(signal: Signal, handler: extern "C" fn(c_int)) -> Result<()> {
    let action = SigAction::new(
        SigHandler::Handler(handler),
        SaFlags::SA_RESTART,
        SigSet::empty(),
    );
    // Replacing a handler process-wide; no handler state to race with.
    unsafe { sigaction(signal, &action) }
        .map_err(|errno| Error::startup(format!("sigaction({:?}): {}", signal, errno)))?;
    Ok(())
}

/// Block the given signals in the calling thread. Spawned threads
/// inherit the caller's mask, so the main thread blocks SIGUSR1 and
/// SIGCHLD before spawning and the designated threads unblock their
/// own signal.
pub fn block_in_this_thread(signals: &[Signal]) -> Result<()> {
    sigset(signals)
        .thread_block()
        .map_err(|errno| Error::startup(format!("blocking signals: {}", errno)))
}

/// Unblock the given signals in the calling thread.
pub fn unblock_in_this_thread(signals: &[Signal]) -> Result<()> {
    sigset(signals)
        .thread_unblock()
        .map_err(|errno| Error::startup(format!("unblocking signals: {}", errno)))
}

fn sigset(signals: &[Signal]) -> SigSet {
    let mut set = SigSet::empty();
    for signal in signals {
        set.add(*signal);
    }
    set
}

/// Whether orderly shutdown has been requested.
pub fn terminate_requested() -> bool {
    TERMINATE.load(Ordering::SeqCst)
}

/// Request orderly shutdown from inside the process.
pub fn request_terminate() {
    TERMINATE.store(true, Ordering::SeqCst);
}

/// Clear the terminate flag; the server entry point resets state so a
/// host process can run it again.
pub fn clear_terminate() {
    TERMINATE.store(false, Ordering::SeqCst);
}

/// Consume a pending reload request, if any.
pub fn take_reload_request() -> bool {
    RELOAD_REQUESTED.swap(false, Ordering::SeqCst)
}

/// Request a reload from inside the process (same effect as SIGUSR1).
pub fn request_reload() {
    RELOAD_REQUESTED.store(true, Ordering::SeqCst);
}

/// Consume a pending child-exited notification, if any.
pub fn take_child_exited() -> bool {
    CHILD_EXITED.swap(false, Ordering::SeqCst)
}

/// Note a child exit from inside the process (same effect as SIGCHLD).
pub fn note_child_exited() {
    CHILD_EXITED.store(true, Ordering::SeqCst);
}
