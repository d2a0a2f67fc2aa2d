//! Core types shared by every Shelf crate.
//!
//! This crate is dependency-light on purpose: it defines the limits that
//! bound every string and queue in the system, the unified error type,
//! key validation and the bucket hash, the typed command model produced
//! by the job tokenizer, and the byte-level pipe protocol spoken between
//! the server and its clients.

pub mod command;
pub mod error;
pub mod key;
pub mod limits;
pub mod protocol;

pub use command::Command;
pub use error::{Error, Result};
pub use key::{bucket_index, validate_key, validate_value, KeyError};
