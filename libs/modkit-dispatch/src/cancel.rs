//! Cancellation of in-flight transport attempts.
//!
//! Every attempt gets its own [`CancellationToken`], registered for as long as
//! the attempt is outstanding. The registry is what a session-expiry cascade
//! walks to abort everything else that is still on the wire.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio_util::sync::CancellationToken;

/// Caller-facing handle that cancels one transport attempt.
///
/// Handed to [`RequestDescriptor::request_controller`](crate::RequestDescriptor::request_controller)
/// once per attempt. Cancelling an attempt that already settled is a no-op.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    token: CancellationToken,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken) -> Self {
        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Token of an attempt currently present in the registry.
#[derive(Debug)]
pub struct RegisteredAttempt {
    pub(crate) id: u64,
    pub(crate) token: CancellationToken,
}

/// Registry of outstanding attempt tokens.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    next_id: AtomicU64,
    handles: Mutex<HashMap<u64, CancellationToken>>,
}

impl CancellationRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register(&self) -> RegisteredAttempt {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        self.handles.lock().insert(id, token.clone());
        RegisteredAttempt { id, token }
    }

    /// Remove a settled attempt. Returns `false` if it was already gone.
    pub(crate) fn remove(&self, id: u64) -> bool {
        self.handles.lock().remove(&id).is_some()
    }

    /// Cancel every registered attempt, returning how many were cancelled.
    ///
    /// Works on a snapshot: cancelled attempts deregister themselves while
    /// this runs, and tokens already cancelled are skipped.
    pub(crate) fn cancel_all(&self) -> usize {
        let snapshot: Vec<CancellationToken> = self
            .handles
            .lock()
            .values()
            .filter(|token| !token.is_cancelled())
            .cloned()
            .collect();

        for token in &snapshot {
            token.cancel();
        }
        snapshot.len()
    }

    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }
}
