// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::rml::RmlTransport;
use dvm_core::id::Nspace;

fn name(rank: u32) -> ProcName {
    ProcName::new(Nspace::from_string("dvm-tcp"), rank)
}

async fn expect_msg(rx: &mut mpsc::UnboundedReceiver<Event>) -> (ProcName, u16, Vec<u8>) {
    loop {
        match rx.recv().await {
            Some(Event::RmlMessage { sender, tag, payload }) => return (sender, tag, payload),
            Some(_) => continue,
            None => panic!("event stream closed"),
        }
    }
}

async fn fabric() -> (TcpHub, mpsc::UnboundedReceiver<Event>, Vec<(TcpLink, mpsc::UnboundedReceiver<Event>)>) {
    let (head_tx, head_rx) = mpsc::unbounded_channel();
    let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
    let (hub, addr) = TcpHub::bind(name(0), bind, head_tx).await.unwrap();

    let mut links = Vec::new();
    for rank in 1..=2 {
        let (tx, rx) = mpsc::unbounded_channel();
        let link = TcpLink::connect(addr, name(rank), name(0), tx).await.unwrap();
        links.push((link, rx));
    }
    // Registration frames race the first send; give the hub a beat.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    (hub, head_rx, links)
}

#[tokio::test]
async fn daemon_to_head_send() {
    let (_hub, mut head_rx, links) = fabric().await;
    links[0].0.send_nb(&name(0), 10, vec![7]).unwrap();
    let (sender, tag, payload) = expect_msg(&mut head_rx).await;
    assert_eq!(sender, name(1));
    assert_eq!(tag, 10);
    assert_eq!(payload, vec![7]);
}

#[tokio::test]
async fn head_to_daemon_send() {
    let (hub, _head_rx, mut links) = fabric().await;
    hub.send_nb(&name(2), 1, vec![3]).unwrap();
    let (sender, tag, payload) = expect_msg(&mut links[1].1).await;
    assert_eq!(sender, name(0));
    assert_eq!(tag, 1);
    assert_eq!(payload, vec![3]);
}

#[tokio::test]
async fn daemon_to_daemon_relays_through_the_hub() {
    let (_hub, _head_rx, mut links) = fabric().await;
    links[0].0.send_nb(&name(2), 41, vec![1]).unwrap();
    let (sender, tag, _) = expect_msg(&mut links[1].1).await;
    assert_eq!(sender, name(1));
    assert_eq!(tag, 41);
}

#[tokio::test]
async fn xcast_reaches_head_and_every_daemon() {
    let (hub, mut head_rx, mut links) = fabric().await;
    hub.xcast(1, vec![5]).unwrap();
    let (_, tag, payload) = expect_msg(&mut head_rx).await;
    assert_eq!((tag, payload), (1, vec![5]));
    for (_, rx) in links.iter_mut() {
        let (_, tag, payload) = expect_msg(rx).await;
        assert_eq!((tag, payload), (1, vec![5]));
    }
}

#[tokio::test]
async fn daemons_cannot_xcast() {
    let (_hub, _head_rx, links) = fabric().await;
    assert!(matches!(links[0].0.xcast(1, vec![]), Err(TransportError::Unsupported)));
}
