//! The bucketed key-value table.
//!
//! A fixed array of 26 buckets, each owning a singly linked chain of
//! entries behind its own reader/writer lock. Single-key operations lock
//! one bucket; batch operations lock every distinct bucket they touch in
//! ascending index order, which is what makes overlapping batches
//! deadlock-free.
//!
//! # Locking rules
//!
//! - lookups, insertions, removals, and iteration hold the owning
//!   bucket's lock in the correct mode for their whole duration;
//! - a batch acquires its bucket set ascending and releases after the
//!   batch's table work is done;
//! - a full dump takes all 26 read locks, so it is consistent with
//!   respect to writers but blocks them while it runs.

mod batch;
mod bucket;
mod table;

pub use batch::{bucket_set, ReadBatch, WriteBatch};
pub use bucket::{Chain, ChainIter};
pub use table::Store;
