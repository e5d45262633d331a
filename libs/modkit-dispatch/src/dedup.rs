//! Collapsing of concurrent identical requests.
//!
//! The queue maps a [`RequestFingerprint`] to the callers waiting on it. The
//! first caller for a fingerprint becomes the group's leader and is the only
//! one that starts a network call; later callers join as followers until the
//! group is settled. Settlement removes the group, so a later identical call
//! starts a new group and a new network call.

use crate::error::DispatchError;
use crate::fingerprint::RequestFingerprint;
use crate::response::ApiResponse;
use parking_lot::Mutex;
use std::collections::HashMap;
use tokio::sync::oneshot;

/// Outcome delivered to every waiter of a group.
pub type Settlement = Result<ApiResponse, DispatchError>;

type Waiter = oneshot::Sender<Settlement>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Created the group; must run the request and settle it
    Leader,
    /// Joined an existing group; only waits
    Follower,
}

#[derive(Debug)]
pub struct Enqueued {
    pub(crate) role: Role,
    pub(crate) receiver: oneshot::Receiver<Settlement>,
}

#[derive(Debug, Default)]
pub struct DedupQueue {
    groups: Mutex<HashMap<RequestFingerprint, Vec<Waiter>>>,
}

impl DedupQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Join the group for `fingerprint`, creating it if absent.
    ///
    /// Lookup and insert happen under one lock hold, so exactly one caller
    /// per group is ever told it is the leader.
    pub(crate) fn enqueue(&self, fingerprint: &RequestFingerprint) -> Enqueued {
        let (tx, rx) = oneshot::channel();
        let mut groups = self.groups.lock();
        let role = if let Some(waiters) = groups.get_mut(fingerprint) {
            waiters.push(tx);
            Role::Follower
        } else {
            groups.insert(fingerprint.clone(), vec![tx]);
            Role::Leader
        };
        Enqueued { role, receiver: rx }
    }

    /// Resolve every waiter of the group with `payload`. Returns the number of
    /// waiters settled; 0 if the group was already settled.
    pub(crate) fn resolve_group(&self, fingerprint: &RequestFingerprint, payload: &ApiResponse) -> usize {
        self.settle(fingerprint, &Ok(payload.clone()))
    }

    /// Reject every waiter of the group with `error`. Same contract as
    /// [`resolve_group`](Self::resolve_group).
    pub(crate) fn reject_group(&self, fingerprint: &RequestFingerprint, error: &DispatchError) -> usize {
        self.settle(fingerprint, &Err(error.clone()))
    }

    fn settle(&self, fingerprint: &RequestFingerprint, outcome: &Settlement) -> usize {
        let removed = self.groups.lock().remove(fingerprint);
        let Some(waiters) = removed else {
            tracing::debug!(fingerprint = %fingerprint, "group already settled; ignoring");
            return 0;
        };

        let count = waiters.len();
        for waiter in waiters {
            if waiter.send(outcome.clone()).is_err() {
                tracing::trace!(fingerprint = %fingerprint, "waiter dropped before settlement");
            }
        }
        count
    }

    pub(crate) fn pending_groups(&self) -> usize {
        self.groups.lock().len()
    }
}
