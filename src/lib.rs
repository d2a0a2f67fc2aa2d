//! # Shelf
//!
//! A job-driven key-value store with pipe-connected subscriber sessions.
//!
//! Shelf executes batch `.job` files against a 26-bucket concurrent
//! table, serves live clients over named pipes, pushes per-key change
//! notifications to subscribers, and snapshots the table to disk from
//! forked child processes.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use shelfdb::{Ops, Store, SubscriptionRegistry};
//!
//! let store = Arc::new(Store::new());
//! let registry = Arc::new(SubscriptionRegistry::new());
//! let ops = Ops::new(Arc::clone(&store), Arc::clone(&registry));
//!
//! let mut out = Vec::new();
//! ops.write(&[("user".into(), "alice".into())], &mut out).unwrap();
//! ops.read(&["user".into()], &mut out).unwrap();
//! assert_eq!(out, b"[(user,alice)]\n");
//! ```
//!
//! # Pieces
//!
//! | Crate | Responsibility |
//! |-------|----------------|
//! | `shelf-core` | limits, errors, key rules, commands, wire protocol |
//! | `shelf-store` | the bucketed table and its batch locking |
//! | `shelf-engine` | operations, subscriptions, fork-based snapshots |
//! | `shelf-jobs` | `.job` tokenizer, discovery, queue, runner |
//! | `shelf-server` | `shelfd`: listener, session workers, lifecycle |
//!
//! The server binary is `shelfd <jobs_dir> <max_threads> <max_backups>
//! <registration_fifo_path>`.

pub use shelf_core::{bucket_index, command::Command, protocol, Error, KeyError, Result};
pub use shelf_engine::{BackupEngine, Ops, Semaphore, SubscriptionRegistry};
pub use shelf_jobs::{discover_jobs, CommandReader, Job, JobQueue, JobRunner};
pub use shelf_server::{ServerConfig, ServerState};
pub use shelf_store::Store;
