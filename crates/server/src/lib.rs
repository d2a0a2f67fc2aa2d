//! The server: registration listener, session workers, job pool,
//! signal-driven lifecycle.
//!
//! Thread layout at steady state: N job workers with a finite lifetime,
//! eight session workers, one registration listener, and one child
//! reaper. SIGUSR1 is serviced only by the listener (reload), SIGCHLD
//! only by the reaper, and SIGINT/SIGTERM set the process-wide
//! terminate flag that every loop polls at its blocking boundaries.

pub mod config;
pub mod lifecycle;
pub mod listener;
pub mod pool;
pub mod reaper;
pub mod sessions;
pub mod signals;
pub mod state;
pub mod worker;

pub use config::ServerConfig;
pub use state::ServerState;
