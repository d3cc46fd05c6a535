// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests for the wire codec.

use crate::buffer::DataBuffer;
use crate::compress::{decompress, maybe_compress};
use crate::messages::{proc_state_from_wire, Heartbeat, ProcUpdate, UpdateProcState};
use dvm_core::id::{Nspace, ProcName, INVALID_RANK};
use proptest::prelude::*;

proptest! {
    #[test]
    fn u64_round_trips(v in any::<u64>()) {
        let mut buf = DataBuffer::new();
        buf.pack_u64(v);
        prop_assert_eq!(buf.unpack_u64().unwrap(), v);
    }

    #[test]
    fn strings_round_trip(s in ".{0,256}") {
        let mut buf = DataBuffer::new();
        buf.pack_string(&s);
        prop_assert_eq!(buf.unpack_string().unwrap(), s);
    }

    #[test]
    fn byte_objects_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..2048)) {
        let mut buf = DataBuffer::new();
        buf.pack_bytes(&bytes);
        prop_assert_eq!(buf.unpack_bytes().unwrap(), bytes);
    }

    #[test]
    fn compression_is_transparent(bytes in proptest::collection::vec(any::<u8>(), 0..8192)) {
        let (compressed, out) = maybe_compress(&bytes);
        let restored = if compressed { decompress(&out).unwrap() } else { out };
        prop_assert_eq!(restored, bytes);
    }

    #[test]
    fn heartbeats_round_trip(rank in 0u32..10_000) {
        let hb = Heartbeat { from: ProcName::new(Nspace::from_string("dvm-x"), rank) };
        let mut buf = DataBuffer::new();
        hb.pack(&mut buf);
        prop_assert_eq!(Heartbeat::unpack(&mut buf).unwrap(), hb);
    }

    #[test]
    fn proc_updates_round_trip(
        ranks in proptest::collection::vec(0u32..INVALID_RANK, 0..32),
        pid in any::<u32>(),
        state_code in 0u32..6,
        exit in any::<i32>(),
    ) {
        let state = proc_state_from_wire(state_code).unwrap();
        let msg = UpdateProcState {
            nspace: Nspace::from_string("dvm-p"),
            updates: ranks
                .iter()
                .map(|&rank| ProcUpdate { rank, pid, state, exit_code: exit })
                .collect(),
        };
        let mut buf = DataBuffer::new();
        msg.pack(&mut buf);
        let all = UpdateProcState::unpack_all(&mut buf).unwrap();
        prop_assert_eq!(all.len(), 1);
        prop_assert_eq!(&all[0].updates, &msg.updates);
    }
}
