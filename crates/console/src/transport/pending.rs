// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pending-request map: the only state shared between the reader task
//! and request callers (spec.md §9 "Mutable state across tasks").

use std::collections::HashMap;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::TransportError;

type Slot = oneshot::Sender<Result<Bytes, TransportError>>;

/// Guards its own critical section; insert → either "response delivered"
/// or "removed on caller exit", never both (spec.md §9).
#[derive(Default)]
pub struct PendingMap {
    inner: Mutex<HashMap<u32, Slot>>,
}

impl PendingMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-shot response slot for `id`, returning the
    /// receiving half.
    pub fn insert(&self, id: u32) -> oneshot::Receiver<Result<Bytes, TransportError>> {
        let (tx, rx) = oneshot::channel();
        self.inner.lock().insert(id, tx);
        rx
    }

    /// Deliver a result to the waiter for `id`, if still present. Returns
    /// `false` if no waiter was registered (the caller already gave up).
    pub fn deliver(&self, id: u32, result: Result<Bytes, TransportError>) -> bool {
        match self.inner.lock().remove(&id) {
            Some(tx) => tx.send(result).is_ok(),
            None => false,
        }
    }

    /// Remove the slot for `id` without delivering — used when the caller
    /// exits first (deadline, cancellation).
    pub fn remove(&self, id: u32) {
        self.inner.lock().remove(&id);
    }

    /// Wake every waiter with [`TransportError::ConnectionClosed`] and clear
    /// the map. Called once the reader task has determined the connection
    /// is gone.
    pub fn drain_closed(&self) {
        let slots: Vec<Slot> = self.inner.lock().drain().map(|(_, tx)| tx).collect();
        for tx in slots {
            let _ = tx.send(Err(TransportError::ConnectionClosed));
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }
}

#[cfg(test)]
#[path = "pending_tests.rs"]
mod tests;
