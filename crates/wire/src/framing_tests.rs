// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use dvm_core::id::Nspace;

fn frame() -> Frame {
    Frame {
        src: ProcName::new(Nspace::from_string("dvm-head"), 0),
        dst: ProcName::new(Nspace::from_string("dvm-head"), 2),
        tag: 41,
        payload: vec![1, 2, 3, 4],
    }
}

#[test]
fn frames_round_trip_through_bytes() {
    let f = frame();
    let bytes = f.encode().unwrap();
    assert_eq!(Frame::decode(bytes).unwrap(), f);
}

#[tokio::test]
async fn frames_round_trip_through_a_duplex_stream() {
    let (mut a, mut b) = tokio::io::duplex(1024);
    let f = frame();
    write_frame(&mut a, &f).await.unwrap();
    let read = read_frame(&mut b).await.unwrap();
    assert_eq!(read, f);
}

#[tokio::test]
async fn closed_stream_reports_connection_closed() {
    let (a, mut b) = tokio::io::duplex(1024);
    drop(a);
    match read_frame(&mut b).await {
        Err(WireError::ConnectionClosed) => {}
        other => panic!("expected ConnectionClosed, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn back_to_back_frames_preserve_order() {
    let (mut a, mut b) = tokio::io::duplex(64 * 1024);
    for i in 0..5u8 {
        let mut f = frame();
        f.payload = vec![i];
        write_frame(&mut a, &f).await.unwrap();
    }
    for i in 0..5u8 {
        let f = read_frame(&mut b).await.unwrap();
        assert_eq!(f.payload, vec![i]);
    }
}

#[tokio::test]
async fn oversized_length_prefix_is_rejected() {
    // A frame claiming to be larger than the cap must error without
    // allocating.
    let (mut a, mut b) = tokio::io::duplex(64);
    let len = (MAX_FRAME_SIZE as u32) + 1;
    tokio::io::AsyncWriteExt::write_all(&mut a, &len.to_be_bytes()).await.unwrap();
    match read_frame(&mut b).await {
        Err(WireError::TooLarge { .. }) => {}
        other => panic!("expected TooLarge, got {:?}", other.map(|_| ())),
    }
}
