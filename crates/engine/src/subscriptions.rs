//! The subscription registry.
//!
//! A mutex-guarded list of (key, endpoint) pairs, where an endpoint is
//! the raw file descriptor of a session's notification pipe. The
//! registry holds the descriptor as a back-reference only: the owning
//! session worker opens and closes it, and a fan-out write to a dead
//! descriptor is dropped silently until `remove_client` takes the entry
//! out.
//!
//! All operations hold the registry mutex for their duration. `notify`
//! must never be called with a store lock held; the operations layer
//! releases its bucket guards first.

use parking_lot::Mutex;
use shelf_core::limits::MAX_NUMBER_SUB;
use shelf_core::protocol::{notification_frame, status};
use shelf_store::Store;
use std::os::fd::{BorrowedFd, RawFd};
use tracing::debug;

struct Subscription {
    key: String,
    endpoint: RawFd,
}

/// Outcome of a subscribe call, in wire status terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeStatus {
    /// Subscription recorded.
    Subscribed,
    /// The key does not exist in the store right now.
    NoSuchKey,
    /// The client is already at its subscription cap.
    CapReached,
    /// This (key, endpoint) pair is already registered.
    AlreadySubscribed,
}

impl SubscribeStatus {
    /// The status byte sent back on the response pipe.
    pub fn code(&self) -> u8 {
        match self {
            SubscribeStatus::Subscribed => status::OK,
            SubscribeStatus::NoSuchKey | SubscribeStatus::CapReached => status::ERROR,
            SubscribeStatus::AlreadySubscribed => status::DUPLICATE,
        }
    }
}

/// Outcome of an unsubscribe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsubscribeStatus {
    /// The pair was found and removed.
    Removed,
    /// No such (key, endpoint) pair.
    NotFound,
}

impl UnsubscribeStatus {
    /// The status byte sent back on the response pipe.
    pub fn code(&self) -> u8 {
        match self {
            UnsubscribeStatus::Removed => status::OK,
            UnsubscribeStatus::NotFound => status::ERROR,
        }
    }
}

/// Key to notification-endpoint registry, shared by every session worker
/// and the operations layer.
pub struct SubscriptionRegistry {
    entries: Mutex<Vec<Subscription>>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        SubscriptionRegistry {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Register `endpoint` for change notifications on `key`.
    ///
    /// The existence check is advisory: the key may vanish between the
    /// check and the insert, and the subscriber still receives
    /// notifications for future writes.
    pub fn subscribe(&self, key: &str, endpoint: RawFd, store: &Store) -> SubscribeStatus {
        if !store.contains_key(key) {
            return SubscribeStatus::NoSuchKey;
        }

        let mut entries = self.entries.lock();
        if entries
            .iter()
            .any(|s| s.endpoint == endpoint && s.key == key)
        {
            return SubscribeStatus::AlreadySubscribed;
        }
        if entries.iter().filter(|s| s.endpoint == endpoint).count() >= MAX_NUMBER_SUB {
            return SubscribeStatus::CapReached;
        }

        entries.push(Subscription {
            key: key.to_string(),
            endpoint,
        });
        SubscribeStatus::Subscribed
    }

    /// Remove the (key, endpoint) pair.
    pub fn unsubscribe(&self, key: &str, endpoint: RawFd) -> UnsubscribeStatus {
        let mut entries = self.entries.lock();
        match entries
            .iter()
            .position(|s| s.endpoint == endpoint && s.key == key)
        {
            Some(slot) => {
                entries.remove(slot);
                UnsubscribeStatus::Removed
            }
            None => UnsubscribeStatus::NotFound,
        }
    }

    /// Remove every entry held by `endpoint`. Called on disconnect,
    /// reload, and shutdown.
    pub fn remove_client(&self, endpoint: RawFd) {
        self.entries.lock().retain(|s| s.endpoint != endpoint);
    }

    /// Push `"(key,value)"` + NUL to every endpoint subscribed to `key`.
    ///
    /// Best-effort broadcast: a failed write (closed or full pipe) is
    /// dropped and the entry stays until `remove_client` runs.
    pub fn notify(&self, key: &str, value: &str) {
        let entries = self.entries.lock();
        let mut frame = None;
        for sub in entries.iter().filter(|s| s.key == key) {
            let frame = frame.get_or_insert_with(|| notification_frame(key, value));
            // The registry never owns the descriptor; the session worker
            // does, and removes these entries before closing it on the
            // orderly paths.
            let fd = unsafe { BorrowedFd::borrow_raw(sub.endpoint) };
            if let Err(err) = nix::unistd::write(fd, frame.as_slice()) {
                debug!(endpoint = sub.endpoint, %err, "dropping notification");
            }
        }
    }

    /// Drop every subscription.
    pub fn clear_all(&self) {
        self.entries.lock().clear();
    }

    /// Total number of registered (key, endpoint) pairs.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Number of subscriptions held by one endpoint.
    pub fn count_for(&self, endpoint: RawFd) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|s| s.endpoint == endpoint)
            .count()
    }
}

impl Default for SubscriptionRegistry {
    fn default() -> Self {
        SubscriptionRegistry::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;
    use std::fs::File;
    use std::io::Read;
    use std::os::fd::{AsRawFd, OwnedFd};

    fn store_with(keys: &[&str]) -> Store {
        let store = Store::new();
        for key in keys {
            store.set(key, "v").unwrap();
        }
        store
    }

    /// An anonymous pipe stands in for a session's notification FIFO.
    fn endpoint_pair() -> (OwnedFd, OwnedFd) {
        pipe().unwrap()
    }

    fn read_frame(fd: &OwnedFd) -> Vec<u8> {
        let mut file = File::from(fd.try_clone().unwrap());
        let mut buf = [0u8; 128];
        let n = file.read(&mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn test_subscribe_to_existing_key() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();
        assert_eq!(
            registry.subscribe("apple", tx.as_raw_fd(), &store),
            SubscribeStatus::Subscribed
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscribe_missing_key() {
        let store = Store::new();
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();
        let status = registry.subscribe("ghost", tx.as_raw_fd(), &store);
        assert_eq!(status, SubscribeStatus::NoSuchKey);
        assert_eq!(status.code(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_duplicate_subscribe() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();
        registry.subscribe("apple", tx.as_raw_fd(), &store);
        let status = registry.subscribe("apple", tx.as_raw_fd(), &store);
        assert_eq!(status, SubscribeStatus::AlreadySubscribed);
        assert_eq!(status.code(), 3);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_subscription_cap_is_enforced() {
        let keys: Vec<String> = (0..MAX_NUMBER_SUB + 1).map(|i| format!("k{}", i)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&key_refs);
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();

        for key in keys.iter().take(MAX_NUMBER_SUB) {
            assert_eq!(
                registry.subscribe(key, tx.as_raw_fd(), &store),
                SubscribeStatus::Subscribed
            );
        }
        let status = registry.subscribe(&keys[MAX_NUMBER_SUB], tx.as_raw_fd(), &store);
        assert_eq!(status, SubscribeStatus::CapReached);
        assert_eq!(status.code(), 1);
        assert_eq!(registry.count_for(tx.as_raw_fd()), MAX_NUMBER_SUB);
    }

    #[test]
    fn test_cap_is_per_endpoint() {
        let keys: Vec<String> = (0..MAX_NUMBER_SUB).map(|i| format!("k{}", i)).collect();
        let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        let store = store_with(&key_refs);
        let registry = SubscriptionRegistry::new();
        let (_rx1, tx1) = endpoint_pair();
        let (_rx2, tx2) = endpoint_pair();

        for key in &keys {
            registry.subscribe(key, tx1.as_raw_fd(), &store);
        }
        // A different client still has room.
        assert_eq!(
            registry.subscribe(&keys[0], tx2.as_raw_fd(), &store),
            SubscribeStatus::Subscribed
        );
    }

    #[test]
    fn test_unsubscribe_matches_the_pair() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (_rx1, tx1) = endpoint_pair();
        let (_rx2, tx2) = endpoint_pair();
        registry.subscribe("apple", tx1.as_raw_fd(), &store);
        registry.subscribe("apple", tx2.as_raw_fd(), &store);

        // Unsubscribing client 2 must not touch client 1's entry.
        assert_eq!(
            registry.unsubscribe("apple", tx2.as_raw_fd()),
            UnsubscribeStatus::Removed
        );
        assert_eq!(registry.count_for(tx1.as_raw_fd()), 1);
        assert_eq!(registry.count_for(tx2.as_raw_fd()), 0);
    }

    #[test]
    fn test_unsubscribe_missing_pair() {
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();
        let status = registry.unsubscribe("apple", tx.as_raw_fd());
        assert_eq!(status, UnsubscribeStatus::NotFound);
        assert_eq!(status.code(), 1);
    }

    #[test]
    fn test_notify_fans_out_to_each_subscriber_once() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (rx1, tx1) = endpoint_pair();
        let (rx2, tx2) = endpoint_pair();
        registry.subscribe("apple", tx1.as_raw_fd(), &store);
        registry.subscribe("apple", tx2.as_raw_fd(), &store);

        registry.notify("apple", "red");

        assert_eq!(read_frame(&rx1), b"(apple,red)\0".to_vec());
        assert_eq!(read_frame(&rx2), b"(apple,red)\0".to_vec());
    }

    #[test]
    fn test_notify_skips_other_keys() {
        let store = store_with(&["apple", "beet"]);
        let registry = SubscriptionRegistry::new();
        let (rx, tx) = endpoint_pair();
        registry.subscribe("beet", tx.as_raw_fd(), &store);

        registry.notify("apple", "red");
        registry.notify("beet", "purple");

        // Only the beet frame arrives.
        assert_eq!(read_frame(&rx), b"(beet,purple)\0".to_vec());
    }

    #[test]
    fn test_notify_to_closed_endpoint_is_dropped() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (rx, tx) = endpoint_pair();
        let fd = tx.as_raw_fd();
        registry.subscribe("apple", fd, &store);
        drop(tx);
        drop(rx);

        // Must not panic or error out; the entry stays until removal.
        registry.notify("apple", "red");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_client_clears_all_its_entries() {
        let store = store_with(&["apple", "beet"]);
        let registry = SubscriptionRegistry::new();
        let (rx1, tx1) = endpoint_pair();
        let (_rx2, tx2) = endpoint_pair();
        registry.subscribe("apple", tx1.as_raw_fd(), &store);
        registry.subscribe("beet", tx1.as_raw_fd(), &store);
        registry.subscribe("apple", tx2.as_raw_fd(), &store);

        registry.remove_client(tx1.as_raw_fd());

        assert_eq!(registry.count_for(tx1.as_raw_fd()), 0);
        assert_eq!(registry.count_for(tx2.as_raw_fd()), 1);

        // No further notifications for the removed client.
        registry.notify("apple", "red");
        let mut reader = File::from(rx1);
        let mut buf = [0u8; 16];
        nix::fcntl::fcntl(
            reader.as_raw_fd(),
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .unwrap();
        assert!(reader.read(&mut buf).is_err());
    }

    #[test]
    fn test_clear_all() {
        let store = store_with(&["apple"]);
        let registry = SubscriptionRegistry::new();
        let (_rx, tx) = endpoint_pair();
        registry.subscribe("apple", tx.as_raw_fd(), &store);
        registry.clear_all();
        assert!(registry.is_empty());
    }
}
