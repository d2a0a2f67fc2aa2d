//! The child reaper.
//!
//! One thread, the only one with SIGCHLD unblocked. The handler sets a
//! flag; this loop consumes it and reaps every exited snapshot child
//! non-blockingly, which returns their semaphore slots. One signal may
//! stand for several deaths, so each pass drains until no child is
//! reapable.

use crate::signals;
use crate::state::ServerState;
use nix::sys::signal::Signal;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const POLL_INTERVAL_MS: u64 = 50;

/// Body of the reaper thread.
pub fn reaper_loop(state: Arc<ServerState>) {
    let _ = signals::block_in_this_thread(&[Signal::SIGUSR1]);
    let _ = signals::unblock_in_this_thread(&[Signal::SIGCHLD]);

    while !signals::terminate_requested() {
        if signals::take_child_exited() {
            let reaped = state.backups.reap_exited();
            if reaped > 0 {
                debug!(reaped, "snapshot children collected");
            }
        }
        std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
    }

    // One last non-blocking sweep; lifecycle drains the stragglers.
    state.backups.reap_exited();
}
