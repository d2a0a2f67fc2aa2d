//! Batch operations and their formatted output.
//!
//! Output bytes are part of the contract and are matched by the test
//! suite, so formatting lives next to the operations that produce it:
//!
//! - READ:   `[` then `(key,value)` or `(key,KVSERROR)` per key, `]\n`
//! - DELETE: `[` then `(key,KVSMISSING)` per missing key, `]\n`, and
//!           nothing at all when every key was present
//! - SHOW:   one `(key, value)\n` line per entry in bucket order
//! - WRITE:  `Failed to write keypair (k,v)\n` per rejected pair
//! - WAIT:   `Waiting...\n` then the sleep
//!
//! A write batch acquires its buckets ascending, applies every pair, and
//! releases before any notification goes out, so the fan-out can never
//! invert lock order with a subscriber that is also a writer.

use crate::subscriptions::SubscriptionRegistry;
use shelf_core::Result;
use shelf_store::Store;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

/// The marker printed for a read of a missing key.
const READ_MISSING: &str = "KVSERROR";
/// The marker printed for a delete of a missing key.
const DELETE_MISSING: &str = "KVSMISSING";

/// The operations layer: every command a job executes against the store
/// goes through here.
pub struct Ops {
    store: Arc<Store>,
    subscriptions: Arc<SubscriptionRegistry>,
}

impl Ops {
    /// Bind the operations layer to its store and registry.
    pub fn new(store: Arc<Store>, subscriptions: Arc<SubscriptionRegistry>) -> Self {
        Ops {
            store,
            subscriptions,
        }
    }

    /// The store this layer operates on.
    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// The registry notified on successful writes.
    pub fn subscriptions(&self) -> &Arc<SubscriptionRegistry> {
        &self.subscriptions
    }

    /// Insert or overwrite each pair. The batch itself always succeeds;
    /// pairs that fail validation produce one failure line each, and
    /// every applied pair is fanned out to its subscribers.
    pub fn write<W: Write>(&self, pairs: &[(String, String)], out: &mut W) -> Result<()> {
        let mut buffer = String::new();
        let mut applied: Vec<&(String, String)> = Vec::with_capacity(pairs.len());

        {
            let mut batch = self.store.lock_for_write(pairs.iter().map(|(k, _)| k));
            for pair in pairs {
                match batch.set(&pair.0, &pair.1) {
                    Ok(_) => applied.push(pair),
                    Err(_) => {
                        buffer.push_str(&format!(
                            "Failed to write keypair ({},{})\n",
                            pair.0, pair.1
                        ));
                    }
                }
            }
        }
        // Bucket locks are released; now the fan-out.
        for (key, value) in applied {
            self.subscriptions.notify(key, value);
        }

        out.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// Read each key in the given order.
    pub fn read<W: Write>(&self, keys: &[String], out: &mut W) -> Result<()> {
        let mut buffer = String::from("[");
        {
            let batch = self.store.lock_for_read(keys);
            for key in keys {
                match batch.get(key) {
                    Some(value) => buffer.push_str(&format!("({},{})", key, value)),
                    None => buffer.push_str(&format!("({},{})", key, READ_MISSING)),
                }
            }
        }
        buffer.push_str("]\n");
        out.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// Delete each key. Only missing keys produce output; deletions are
    /// not notified.
    pub fn delete<W: Write>(&self, keys: &[String], out: &mut W) -> Result<()> {
        let mut buffer = String::new();
        let mut any_missing = false;
        {
            let mut batch = self.store.lock_for_write(keys);
            for key in keys {
                if !batch.remove(key) {
                    if !any_missing {
                        buffer.push('[');
                        any_missing = true;
                    }
                    buffer.push_str(&format!("({},{})", key, DELETE_MISSING));
                }
            }
        }
        if any_missing {
            buffer.push_str("]\n");
        }
        out.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// Dump every entry in bucket order under all 26 read locks.
    pub fn show<W: Write>(&self, out: &mut W) -> Result<()> {
        let mut buffer = String::new();
        self.store.for_each_entry(|key, value| {
            push_entry_line(&mut buffer, key, value);
        });
        out.write_all(buffer.as_bytes())?;
        Ok(())
    }

    /// Emit `Waiting...\n` and sleep. A zero delay does neither.
    pub fn wait<W: Write>(&self, delay_ms: u64, out: &mut W) -> Result<()> {
        if delay_ms == 0 {
            return Ok(());
        }
        out.write_all(b"Waiting...\n")?;
        out.flush()?;
        std::thread::sleep(Duration::from_millis(delay_ms));
        Ok(())
    }
}

/// Append one `(key, value)\n` dump line. Shared with the snapshot
/// child, which renders the same format without locks.
pub(crate) fn push_entry_line(buffer: &mut String, key: &str, value: &str) {
    buffer.push('(');
    buffer.push_str(key);
    buffer.push_str(", ");
    buffer.push_str(value);
    buffer.push_str(")\n");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ops() -> Ops {
        Ops::new(
            Arc::new(Store::new()),
            Arc::new(SubscriptionRegistry::new()),
        )
    }

    fn as_text(bytes: &[u8]) -> &str {
        std::str::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_write_then_read_back_in_given_order() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(
            &[("a".into(), "1".into()), ("b".into(), "2".into())],
            &mut out,
        )
        .unwrap();
        assert!(out.is_empty());

        ops.read(&["a".into(), "b".into()], &mut out).unwrap();
        assert_eq!(as_text(&out), "[(a,1)(b,2)]\n");
    }

    #[test]
    fn test_read_missing_key() {
        let ops = ops();
        let mut out = Vec::new();
        ops.read(&["z".into()], &mut out).unwrap();
        assert_eq!(as_text(&out), "[(z,KVSERROR)]\n");
    }

    #[test]
    fn test_read_mixed_present_and_missing() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(&[("a".into(), "1".into())], &mut out).unwrap();
        ops.read(&["a".into(), "z".into()], &mut out).unwrap();
        assert_eq!(as_text(&out), "[(a,1)(z,KVSERROR)]\n");
    }

    #[test]
    fn test_delete_missing_key() {
        let ops = ops();
        let mut out = Vec::new();
        ops.delete(&["z".into()], &mut out).unwrap();
        assert_eq!(as_text(&out), "[(z,KVSMISSING)]\n");
    }

    #[test]
    fn test_delete_present_key_is_silent() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(&[("a".into(), "1".into())], &mut out).unwrap();
        ops.delete(&["a".into()], &mut out).unwrap();
        assert!(out.is_empty(), "present deletes emit nothing");
    }

    #[test]
    fn test_delete_twice_reports_missing_second_time() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(&[("a".into(), "1".into())], &mut out).unwrap();
        ops.delete(&["a".into()], &mut out).unwrap();
        ops.delete(&["a".into()], &mut out).unwrap();
        assert_eq!(as_text(&out), "[(a,KVSMISSING)]\n");
    }

    #[test]
    fn test_show_empty_store_emits_nothing() {
        let ops = ops();
        let mut out = Vec::new();
        ops.show(&mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_show_lists_entries_in_bucket_order() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(
            &[("cat".into(), "3".into()), ("ant".into(), "1".into())],
            &mut out,
        )
        .unwrap();
        ops.show(&mut out).unwrap();
        assert_eq!(as_text(&out), "(ant, 1)\n(cat, 3)\n");
    }

    #[test]
    fn test_write_failure_line_for_unbucketable_key() {
        let ops = ops();
        let mut out = Vec::new();
        ops.write(
            &[("-bad".into(), "v".into()), ("a".into(), "1".into())],
            &mut out,
        )
        .unwrap();
        assert_eq!(as_text(&out), "Failed to write keypair (-bad,v)\n");
        // The valid pair still landed.
        let mut read_out = Vec::new();
        ops.read(&["a".into()], &mut read_out).unwrap();
        assert_eq!(as_text(&read_out), "[(a,1)]\n");
    }

    #[test]
    fn test_wait_zero_is_silent() {
        let ops = ops();
        let mut out = Vec::new();
        ops.wait(0, &mut out).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn test_wait_emits_banner() {
        let ops = ops();
        let mut out = Vec::new();
        ops.wait(1, &mut out).unwrap();
        assert_eq!(as_text(&out), "Waiting...\n");
    }

    #[test]
    fn test_write_notifies_subscribers_after_releasing_locks() {
        use nix::unistd::pipe;
        use std::os::fd::AsRawFd;

        let store = Arc::new(Store::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let ops = Ops::new(Arc::clone(&store), Arc::clone(&registry));

        let mut out = Vec::new();
        ops.write(&[("apple".into(), "0".into())], &mut out).unwrap();

        let (rx, tx) = pipe().unwrap();
        registry.subscribe("apple", tx.as_raw_fd(), &store);

        ops.write(&[("apple".into(), "red".into())], &mut out)
            .unwrap();

        use std::io::Read;
        let mut reader = std::fs::File::from(rx);
        let mut buf = [0u8; 64];
        let n = reader.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"(apple,red)\0");
    }

    #[test]
    fn test_delete_does_not_notify() {
        use nix::unistd::pipe;
        use std::os::fd::AsRawFd;

        let store = Arc::new(Store::new());
        let registry = Arc::new(SubscriptionRegistry::new());
        let ops = Ops::new(Arc::clone(&store), Arc::clone(&registry));

        let mut out = Vec::new();
        ops.write(&[("apple".into(), "red".into())], &mut out)
            .unwrap();

        let (rx, tx) = pipe().unwrap();
        registry.subscribe("apple", tx.as_raw_fd(), &store);
        ops.delete(&["apple".into()], &mut out).unwrap();

        use std::io::Read;
        let mut reader = std::fs::File::from(rx);
        nix::fcntl::fcntl(
            reader.as_raw_fd(),
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .unwrap();
        let mut buf = [0u8; 64];
        assert!(
            reader.read(&mut buf).is_err(),
            "delete must not emit a notification"
        );
    }
}
