// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! TCP transport: a star centered on the head node.
//!
//! Every daemon holds one connection to the head; the head forwards
//! frames addressed to other ranks. FIFO per link comes from TCP, and
//! relayed daemon↔daemon traffic stays FIFO because it shares the two
//! TCP legs involved.

use crate::rml::{RmlTransport, TransportError};
use dvm_core::event::Event;
use dvm_core::id::ProcName;
use dvm_wire::{read_frame, write_frame, Frame};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

/// Registration frames carry this tag; it is never delivered upward.
const HELLO_TAG: u16 = 0;

type PeerWriters = Arc<Mutex<HashMap<ProcName, mpsc::UnboundedSender<Frame>>>>;

fn spawn_writer(mut half: tokio::net::tcp::OwnedWriteHalf, mut rx: mpsc::UnboundedReceiver<Frame>) {
    tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if let Err(e) = write_frame(&mut half, &frame).await {
                tracing::warn!(error = %e, "frame write failed, dropping link");
                break;
            }
        }
    });
}

/// Head-node side of the star.
#[derive(Clone)]
pub struct TcpHub {
    me: ProcName,
    event_tx: mpsc::UnboundedSender<Event>,
    peers: PeerWriters,
}

impl TcpHub {
    /// Bind and start accepting daemon connections.
    pub async fn bind(
        me: ProcName,
        addr: SocketAddr,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> std::io::Result<(Self, SocketAddr)> {
        let listener = TcpListener::bind(addr).await?;
        let local = listener.local_addr()?;
        let hub = Self { me, event_tx, peers: Arc::new(Mutex::new(HashMap::new())) };
        let accept_hub = hub.clone();
        tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => accept_hub.admit(stream, peer_addr),
                    Err(e) => {
                        tracing::warn!(error = %e, "accept failed");
                        break;
                    }
                }
            }
        });
        Ok((hub, local))
    }

    fn admit(&self, stream: TcpStream, peer_addr: SocketAddr) {
        let hub = self.clone();
        tokio::spawn(async move {
            let (mut read_half, write_half) = stream.into_split();
            // First frame must be the peer's registration.
            let hello = match read_frame(&mut read_half).await {
                Ok(f) if f.tag == HELLO_TAG => f,
                Ok(f) => {
                    tracing::warn!(%peer_addr, tag = f.tag, "peer spoke before registering");
                    return;
                }
                Err(e) => {
                    tracing::warn!(%peer_addr, error = %e, "registration read failed");
                    return;
                }
            };
            let peer = hello.src;
            tracing::debug!(%peer, %peer_addr, "daemon link up");
            let (tx, rx) = mpsc::unbounded_channel();
            spawn_writer(write_half, rx);
            hub.peers.lock().insert(peer.clone(), tx);

            loop {
                match read_frame(&mut read_half).await {
                    Ok(frame) => hub.route(frame),
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "daemon link down");
                        hub.peers.lock().remove(&peer);
                        return;
                    }
                }
            }
        });
    }

    /// Deliver locally or forward to the destination's link.
    fn route(&self, frame: Frame) {
        if frame.dst == self.me {
            let ev = Event::RmlMessage {
                sender: frame.src,
                tag: frame.tag,
                payload: frame.payload,
            };
            if self.event_tx.send(ev).is_err() {
                tracing::warn!("head event loop gone, dropping frame");
            }
            return;
        }
        let tx = self.peers.lock().get(&frame.dst).cloned();
        match tx {
            Some(tx) => {
                let dst = frame.dst.clone();
                if tx.send(frame).is_err() {
                    tracing::warn!(%dst, "relay target gone");
                }
            }
            None => tracing::warn!(dst = %frame.dst, "no route for relayed frame"),
        }
    }
}

impl RmlTransport for TcpHub {
    fn send_nb(&self, dst: &ProcName, tag: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        if *dst == self.me {
            return self
                .event_tx
                .send(Event::RmlMessage { sender: self.me.clone(), tag, payload })
                .map_err(|_| TransportError::PeerClosed(dst.clone()));
        }
        let tx = self
            .peers
            .lock()
            .get(dst)
            .cloned()
            .ok_or_else(|| TransportError::UnknownPeer(dst.clone()))?;
        tx.send(Frame { src: self.me.clone(), dst: dst.clone(), tag, payload })
            .map_err(|_| TransportError::PeerClosed(dst.clone()))
    }

    fn xcast(&self, tag: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        // The head hosts a daemon itself.
        let _ = self.event_tx.send(Event::RmlMessage {
            sender: self.me.clone(),
            tag,
            payload: payload.clone(),
        });
        let mut targets: Vec<(ProcName, mpsc::UnboundedSender<Frame>)> = {
            let peers = self.peers.lock();
            peers.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        targets.sort_by_key(|(p, _)| p.rank);
        for (peer, tx) in targets {
            let frame = Frame {
                src: self.me.clone(),
                dst: peer.clone(),
                tag,
                payload: payload.clone(),
            };
            if tx.send(frame).is_err() {
                tracing::warn!(%peer, "xcast target gone");
            }
        }
        Ok(())
    }
}

/// Daemon side of the star: one link to the head.
#[derive(Clone)]
pub struct TcpLink {
    me: ProcName,
    writer_tx: mpsc::UnboundedSender<Frame>,
}

impl TcpLink {
    /// Connect to the head, register, and start delivering inbound
    /// frames to `event_tx`.
    pub async fn connect(
        addr: SocketAddr,
        me: ProcName,
        head: ProcName,
        event_tx: mpsc::UnboundedSender<Event>,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, mut write_half) = stream.into_split();

        let hello = Frame { src: me.clone(), dst: head, tag: HELLO_TAG, payload: vec![] };
        if let Err(e) = write_frame(&mut write_half, &hello).await {
            return Err(std::io::Error::other(e.to_string()));
        }

        let (writer_tx, writer_rx) = mpsc::unbounded_channel();
        spawn_writer(write_half, writer_rx);

        tokio::spawn(async move {
            loop {
                match read_frame(&mut read_half).await {
                    Ok(frame) => {
                        let ev = Event::RmlMessage {
                            sender: frame.src,
                            tag: frame.tag,
                            payload: frame.payload,
                        };
                        if event_tx.send(ev).is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "head link down");
                        return;
                    }
                }
            }
        });

        Ok(Self { me, writer_tx })
    }
}

impl RmlTransport for TcpLink {
    fn send_nb(&self, dst: &ProcName, tag: u16, payload: Vec<u8>) -> Result<(), TransportError> {
        self.writer_tx
            .send(Frame { src: self.me.clone(), dst: dst.clone(), tag, payload })
            .map_err(|_| TransportError::PeerClosed(dst.clone()))
    }

    fn xcast(&self, _tag: u16, _payload: Vec<u8>) -> Result<(), TransportError> {
        // Broadcast fan-out belongs to the head node.
        Err(TransportError::Unsupported)
    }
}

#[cfg(test)]
#[path = "tcp_tests.rs"]
mod tests;
