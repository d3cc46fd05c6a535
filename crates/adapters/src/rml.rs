// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reliable-messaging transport seam.
//!
//! A transport delivers tagged buffers between named endpoints, FIFO
//! per (source, destination, tag). Inbound messages surface as
//! [`Event::RmlMessage`] on the endpoint's event queue; sends never
//! block the caller.

use dvm_core::event::Event;
use dvm_core::id::{ProcName, Rank};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Transport failures surfaced to senders.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown peer: {0}")]
    UnknownPeer(ProcName),

    #[error("peer {0} is gone")]
    PeerClosed(ProcName),

    #[error("operation not supported on this endpoint")]
    Unsupported,

    #[error("wire error: {0}")]
    Wire(#[from] dvm_wire::WireError),
}

/// Named-endpoint, tagged, non-blocking message transport.
pub trait RmlTransport: Send + Sync {
    /// Non-blocking send to one peer. An immediate error means the
    /// peer is unknown or gone; delivery failures after acceptance are
    /// logged by the transport.
    fn send_nb(&self, dst: &ProcName, tag: u16, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Broadcast to every daemon endpoint (including the sender's own
    /// process when it hosts a daemon).
    fn xcast(&self, tag: u16, payload: Vec<u8>) -> Result<(), TransportError>;
}

type PeerMap = Arc<Mutex<HashMap<ProcName, mpsc::UnboundedSender<Event>>>>;

/// In-process message fabric: every endpoint lives in the same process
/// and delivery is an unbounded channel send. Used by the single-host
/// fabric and by the scenario tests.
#[derive(Clone, Default)]
pub struct LocalRouter {
    peers: PeerMap,
}

impl LocalRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint; returns its transport handle and the
    /// event stream it receives messages on.
    pub fn endpoint(&self, me: ProcName) -> (LocalEndpoint, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(me, tx), rx)
    }

    /// Register an endpoint delivering into an existing event queue
    /// (processes that merge transport input with their own feedback).
    pub fn register(
        &self,
        me: ProcName,
        tx: mpsc::UnboundedSender<Event>,
    ) -> LocalEndpoint {
        self.peers.lock().insert(me.clone(), tx);
        LocalEndpoint { me, peers: Arc::clone(&self.peers) }
    }

    /// Drop an endpoint, closing its event stream.
    pub fn remove(&self, who: &ProcName) {
        self.peers.lock().remove(who);
    }

    /// Ranks currently registered, ascending.
    pub fn ranks(&self) -> Vec<Rank> {
        let mut ranks: Vec<Rank> = self.peers.lock().keys().map(|p| p.rank).collect();
        ranks.sort_unstable();
        ranks
    }
}

/// One endpoint of a [`LocalRouter`].
#[derive(Clone)]
pub struct LocalEndpoint {
    me: ProcName,
    peers: PeerMap,
}

impl LocalEndpoint {
    pub fn name(&self) -> &ProcName {
        &self.me
    }
}

impl RmlTransport for LocalEndpoint {
    fn send_nb(&self, dst: &ProcName, tag: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        let tx = {
            let peers = self.peers.lock();
            peers.get(dst).cloned().ok_or_else(|| TransportError::UnknownPeer(dst.clone()))?
        };
        tx.send(Event::RmlMessage { sender: self.me.clone(), tag, payload })
            .map_err(|_| TransportError::PeerClosed(dst.clone()))
    }

    fn xcast(&self, tag: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        // Deterministic order keeps the tests reproducible; delivery
        // order across daemons is unspecified by contract anyway.
        let mut targets: Vec<(ProcName, mpsc::UnboundedSender<Event>)> = {
            let peers = self.peers.lock();
            peers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        targets.sort_by_key(|(p, _)| p.rank);
        for (peer, tx) in targets {
            if tx
                .send(Event::RmlMessage {
                    sender: self.me.clone(),
                    tag,
                    payload: payload.clone(),
                })
                .is_err()
            {
                tracing::warn!(%peer, tag, "xcast target gone");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "rml_tests.rs"]
mod tests;
