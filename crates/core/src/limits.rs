//! System-wide limits.
//!
//! These bounds are part of the observable contract: they size the bucket
//! array, cap every key/value/pipe-path string, and bound the session and
//! subscription machinery. Changing any of them changes wire-visible
//! behavior, so they live here rather than in the crates that use them.

/// Number of buckets in the store. Keys hash on their first byte, folding
/// letters and digits into this one array, so `a...` and `0...` share
/// bucket 0.
pub const BUCKET_COUNT: usize = 26;

/// Maximum byte length of a key or value.
pub const MAX_STRING_SIZE: usize = 40;

/// Maximum byte length of a client pipe path in a CONNECT record.
pub const MAX_PIPE_PATH_LENGTH: usize = 40;

/// Maximum number of key/value pairs (or keys) in a single batch command.
pub const MAX_WRITE_SIZE: usize = 40;

/// Capacity of the pending-session ring and size of the session worker pool.
pub const MAX_SESSION_COUNT: usize = 8;

/// Per-client cap on simultaneous subscriptions, enforced by the server.
pub const MAX_NUMBER_SUB: usize = 10;

/// Size in bytes of every response frame written to a client.
pub const SERVER_RESPONSE_SIZE: usize = 2;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_count_covers_digit_range() {
        // Digits map into indices 0..=9, which must fit inside the array.
        assert!(BUCKET_COUNT > 9);
    }

    #[test]
    fn test_pipe_path_fits_connect_record() {
        // A CONNECT record carries three paths plus the opcode and three
        // separators; each path is individually bounded.
        assert_eq!(MAX_PIPE_PATH_LENGTH, MAX_STRING_SIZE);
    }
}
