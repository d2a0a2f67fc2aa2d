//! Startup wiring and orderly shutdown.
//!
//! Order matters on the way down: the listener goes first (it tears
//! down sessions and unlinks the FIFO), then the session workers drain
//! out of a closed queue, then the reaper stops and the last snapshot
//! children are collected, and finally the store drops with the state.

use crate::config::ServerConfig;
use crate::listener::listener_loop;
use crate::pool::run_all_jobs;
use crate::reaper::reaper_loop;
use crate::signals;
use crate::state::ServerState;
use crate::worker::spawn_session_workers;
use nix::sys::signal::Signal;
use shelf_core::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

const IDLE_POLL_MS: u64 = 100;

/// Run the server to completion: jobs, sessions, shutdown.
pub fn run(config: ServerConfig) -> Result<()> {
    config.validate()?;
    let state = ServerState::new(config);

    signals::clear_terminate();
    signals::install_handlers()?;
    // Spawned threads inherit this mask; the listener and the reaper
    // each unblock their own signal.
    signals::block_in_this_thread(&[Signal::SIGUSR1, Signal::SIGCHLD])?;

    let listener = {
        let state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("shelf-listener".to_string())
            .spawn(move || listener_loop(state))
            .map_err(|e| Error::startup(format!("spawning listener: {}", e)))?
    };

    let session_workers = spawn_session_workers(&state)?;

    let reaper = {
        let state = Arc::clone(&state);
        std::thread::Builder::new()
            .name("shelf-reaper".to_string())
            .spawn(move || reaper_loop(state))
            .map_err(|e| Error::startup(format!("spawning reaper: {}", e)))?
    };

    // The batch phase: drain every .job file, then keep serving
    // sessions until a terminate signal arrives.
    run_all_jobs(&state)?;
    info!("batch phase complete; serving sessions");

    while !signals::terminate_requested() {
        std::thread::sleep(Duration::from_millis(IDLE_POLL_MS));
    }
    info!("terminate requested; shutting down");

    // Unstick the listener first: if it is parked on a full ring, the
    // workers can only drain it once every live session is told to end.
    state.sessions.disconnect_all();
    let _ = listener.join();
    state.sessions.close();
    for worker in session_workers {
        let _ = worker.join();
    }
    let _ = reaper.join();

    // Collect any snapshot children still running.
    state.backups.drain();
    info!("shutdown complete");
    Ok(())
}
