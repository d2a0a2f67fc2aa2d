//! Sessions: the bounded pending ring and the live-session registry.
//!
//! The registration listener produces sessions, the fixed worker pool
//! consumes them. The ring holds at most MAX_SESSION_COUNT entries and
//! is guarded by a mutex plus two counted semaphores: `full` counts
//! queued sessions, `empty` counts free slots, and outside a critical
//! section the two always sum to the capacity. A full ring blocks the
//! producer rather than rejecting the client.
//!
//! The live registry tracks every session from admission until its
//! worker retires it. It is what duplicate detection scans and what a
//! reload walks to set every terminate flag.

use parking_lot::Mutex;
use shelf_core::limits::MAX_SESSION_COUNT;
use shelf_core::protocol::ConnectRequest;
use shelf_engine::Semaphore;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A connected client's record: its three pipe paths and the flag its
/// worker polls to cut the session loose.
#[derive(Debug)]
pub struct Session {
    connect: ConnectRequest,
    terminate: AtomicBool,
}

impl Session {
    /// Wrap a CONNECT record in a live session.
    pub fn new(connect: ConnectRequest) -> Arc<Session> {
        Arc::new(Session {
            connect,
            terminate: AtomicBool::new(false),
        })
    }

    /// Path of the client's request pipe.
    pub fn req_path(&self) -> &Path {
        Path::new(&self.connect.req_pipe_path)
    }

    /// Path of the client's response pipe.
    pub fn resp_path(&self) -> &Path {
        Path::new(&self.connect.resp_pipe_path)
    }

    /// Path of the client's notification pipe.
    pub fn notif_path(&self) -> &Path {
        Path::new(&self.connect.notif_pipe_path)
    }

    /// Response path as recorded on the wire, used for duplicate checks.
    pub fn resp_path_str(&self) -> &str {
        &self.connect.resp_pipe_path
    }

    /// Tell the owning worker to end this session.
    pub fn request_terminate(&self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    /// Polled by the session worker at every blocking boundary.
    pub fn should_terminate(&self) -> bool {
        self.terminate.load(Ordering::SeqCst)
    }
}

/// The bounded producer/consumer ring.
struct SessionQueue {
    ring: Mutex<VecDeque<Arc<Session>>>,
    full: Semaphore,
    empty: Semaphore,
    closed: AtomicBool,
}

impl SessionQueue {
    fn new() -> Self {
        SessionQueue {
            ring: Mutex::new(VecDeque::with_capacity(MAX_SESSION_COUNT)),
            full: Semaphore::new(0),
            empty: Semaphore::new(MAX_SESSION_COUNT),
            closed: AtomicBool::new(false),
        }
    }

    /// Blocks while the ring is at capacity.
    fn push(&self, session: Arc<Session>) {
        self.empty.acquire();
        self.ring.lock().push_back(session);
        self.full.post();
    }

    /// Blocks until a session is available; `None` once closed and
    /// drained.
    fn pop(&self) -> Option<Arc<Session>> {
        loop {
            self.full.acquire();
            if let Some(session) = self.ring.lock().pop_front() {
                self.empty.post();
                return Some(session);
            }
            // Woken without work: either a close() wakeup or a reload
            // flushed the ring between our wakeup and the lock.
            if self.closed.load(Ordering::SeqCst) {
                return None;
            }
            // A flush removed the entry this permit was posted for but
            // could not reclaim the permit we already hold; the slot is
            // ours to hand back before parking again.
            self.empty.post();
        }
    }

    /// Remove and return everything queued, fixing up the semaphores so
    /// capacity accounting stays intact.
    fn flush(&self) -> Vec<Arc<Session>> {
        let mut ring = self.ring.lock();
        let drained: Vec<_> = ring.drain(..).collect();
        for _ in &drained {
            // Each drained entry bypassed a pop: consume its `full`
            // permit and hand the slot back to producers.
            if self.full.try_acquire() {
                self.empty.post();
            }
        }
        drained
    }

    /// Wake every blocked consumer so the worker pool can exit.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        for _ in 0..MAX_SESSION_COUNT {
            self.full.post();
        }
    }

    fn len(&self) -> usize {
        self.ring.lock().len()
    }
}

/// Admission error: another live session already uses this response
/// pipe path.
#[derive(Debug, PartialEq, Eq)]
pub struct DuplicateSession;

/// The session subsystem handle shared by listener and workers.
pub struct Sessions {
    queue: SessionQueue,
    live: Mutex<Vec<Arc<Session>>>,
}

impl Sessions {
    /// Create an empty subsystem.
    pub fn new() -> Self {
        Sessions {
            queue: SessionQueue::new(),
            live: Mutex::new(Vec::new()),
        }
    }

    /// Admit a new CONNECT: reject duplicates, otherwise register the
    /// session as live and queue it (blocking while the ring is full).
    pub fn admit(&self, connect: ConnectRequest) -> Result<Arc<Session>, DuplicateSession> {
        let session = Session::new(connect);
        {
            let mut live = self.live.lock();
            if live
                .iter()
                .any(|s| s.resp_path_str() == session.resp_path_str())
            {
                return Err(DuplicateSession);
            }
            live.push(Arc::clone(&session));
        }
        self.queue.push(Arc::clone(&session));
        Ok(session)
    }

    /// Next session for a worker; `None` once the subsystem is closed.
    pub fn next(&self) -> Option<Arc<Session>> {
        self.queue.pop()
    }

    /// Drop a session from the live set once its worker is done with it.
    pub fn retire(&self, session: &Arc<Session>) {
        self.live.lock().retain(|s| !Arc::ptr_eq(s, session));
    }

    /// Reload semantics: set every live session's terminate flag and
    /// flush whatever is still queued (flushed sessions never reach a
    /// worker, so they retire here).
    pub fn disconnect_all(&self) {
        for session in self.live.lock().iter() {
            session.request_terminate();
        }
        for session in self.queue.flush() {
            self.retire(&session);
        }
    }

    /// Shutdown: disconnect everything and wake the worker pool so it
    /// can drain out.
    pub fn close(&self) {
        self.disconnect_all();
        self.queue.close();
    }

    /// Sessions waiting in the ring.
    pub fn pending_count(&self) -> usize {
        self.queue.len()
    }

    /// Sessions admitted and not yet retired (queued or in service).
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }
}

impl Default for Sessions {
    fn default() -> Self {
        Sessions::new()
    }
}
