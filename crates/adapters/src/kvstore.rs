// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory key/value (modex) store.
//!
//! Each process owns one store. The head seeds it from daemon reports;
//! daemons serve direct-modex requests out of it. A request for a proc
//! whose data has not arrived yet is not an error: it parks in a
//! pending slot and is answered when the data lands.

use dvm_core::event::{Event, NotifyCode};
use dvm_core::id::{Nspace, ProcName};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// A parked direct-modex request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingModex {
    pub requestor: ProcName,
    pub room: i32,
}

/// Outcome of a modex lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModexDisposition {
    /// Data was available.
    Ready(Vec<u8>),
    /// Not ready; the request was parked and will be drained by the
    /// `store` that delivers the data.
    Parked,
}

#[derive(Default)]
struct Inner {
    modex: HashMap<ProcName, Vec<u8>>,
    pending: HashMap<ProcName, Vec<PendingModex>>,
    inventory: Vec<(ProcName, Vec<u8>)>,
    clients: Vec<ProcName>,
    handlers: Vec<(NotifyCode, mpsc::UnboundedSender<Event>)>,
}

/// Process-local key/value store with event notification.
#[derive(Clone, Default)]
pub struct MemKvStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a proc's modex blob; returns any parked requests that can
    /// now be answered with it.
    pub fn store_modex(&self, proc: ProcName, blob: Vec<u8>) -> Vec<PendingModex> {
        let mut inner = self.inner.lock();
        let drained = inner.pending.remove(&proc).unwrap_or_default();
        inner.modex.insert(proc, blob);
        drained
    }

    pub fn lookup_modex(&self, proc: &ProcName) -> Option<Vec<u8>> {
        self.inner.lock().modex.get(proc).cloned()
    }

    /// Resolve a direct-modex request, parking it when not ready.
    pub fn request_modex(
        &self,
        target: &ProcName,
        requestor: ProcName,
        room: i32,
    ) -> ModexDisposition {
        let mut inner = self.inner.lock();
        if let Some(blob) = inner.modex.get(target) {
            return ModexDisposition::Ready(blob.clone());
        }
        inner
            .pending
            .entry(target.clone())
            .or_default()
            .push(PendingModex { requestor, room });
        ModexDisposition::Parked
    }

    pub fn register_client(&self, proc: ProcName) {
        let mut inner = self.inner.lock();
        if !inner.clients.contains(&proc) {
            inner.clients.push(proc);
        }
    }

    /// Idempotent: deregistering an unknown client is a no-op.
    pub fn deregister_client(&self, proc: &ProcName) {
        self.inner.lock().clients.retain(|c| c != proc);
    }

    /// Drop every record belonging to a namespace.
    pub fn deregister_nspace(&self, nspace: &Nspace) {
        let mut inner = self.inner.lock();
        inner.modex.retain(|p, _| p.nspace != *nspace);
        inner.pending.retain(|p, _| p.nspace != *nspace);
        inner.clients.retain(|c| c.nspace != *nspace);
    }

    pub fn client_count(&self) -> usize {
        self.inner.lock().clients.len()
    }

    pub fn deliver_inventory(&self, source: ProcName, blob: Vec<u8>) {
        self.inner.lock().inventory.push((source, blob));
    }

    pub fn inventory_count(&self) -> usize {
        self.inner.lock().inventory.len()
    }

    /// Register an event handler: notifications with `code` are sent to
    /// `tx` as [`Event::KvNotify`].
    pub fn register_event_handler(&self, code: NotifyCode, tx: mpsc::UnboundedSender<Event>) {
        self.inner.lock().handlers.push((code, tx));
    }

    /// Deliver an event to every handler registered for its code.
    pub fn notify_event(&self, code: NotifyCode, affected: ProcName) {
        let handlers: Vec<_> = {
            let inner = self.inner.lock();
            inner
                .handlers
                .iter()
                .filter(|(c, _)| *c == code)
                .map(|(_, tx)| tx.clone())
                .collect()
        };
        for tx in handlers {
            let _ = tx.send(Event::KvNotify { code, affected: affected.clone() });
        }
    }
}

#[cfg(test)]
#[path = "kvstore_tests.rs"]
mod tests;
