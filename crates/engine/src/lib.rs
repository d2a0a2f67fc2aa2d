//! The operations layer over the store.
//!
//! Everything a job or session can do to the table funnels through this
//! crate: the batch WRITE/READ/DELETE/SHOW/WAIT operations with their
//! formatted output, the subscription registry with its notification
//! fan-out, and the fork-based snapshot engine with its concurrency
//! gate.

mod backup;
mod ops;
mod semaphore;
mod subscriptions;

pub use backup::BackupEngine;
pub use ops::Ops;
pub use semaphore::Semaphore;
pub use subscriptions::{SubscribeStatus, SubscriptionRegistry, UnsubscribeStatus};
