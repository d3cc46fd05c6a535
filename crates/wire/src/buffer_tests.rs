// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn scalars_round_trip() {
    let mut buf = DataBuffer::new();
    buf.pack_bool(true);
    buf.pack_u8(7);
    buf.pack_u16(1000);
    buf.pack_u32(70_000);
    buf.pack_u64(u64::MAX);
    buf.pack_i32(-42);
    buf.pack_i64(i64::MIN);
    buf.pack_f64(2.5);

    assert!(buf.unpack_bool().unwrap());
    assert_eq!(buf.unpack_u8().unwrap(), 7);
    assert_eq!(buf.unpack_u16().unwrap(), 1000);
    assert_eq!(buf.unpack_u32().unwrap(), 70_000);
    assert_eq!(buf.unpack_u64().unwrap(), u64::MAX);
    assert_eq!(buf.unpack_i32().unwrap(), -42);
    assert_eq!(buf.unpack_i64().unwrap(), i64::MIN);
    assert_eq!(buf.unpack_f64().unwrap(), 2.5);
    assert!(buf.is_exhausted());
}

#[test]
fn strings_and_bytes_round_trip() {
    let mut buf = DataBuffer::new();
    buf.pack_string("héllo");
    buf.pack_bytes(&[0, 1, 2, 255]);
    assert_eq!(buf.unpack_string().unwrap(), "héllo");
    assert_eq!(buf.unpack_bytes().unwrap(), vec![0, 1, 2, 255]);
}

#[test]
fn identities_round_trip() {
    let mut buf = DataBuffer::new();
    let proc = ProcName::new(Nspace::from_string("dvm-abc"), 9);
    buf.pack_proc(&proc);
    buf.pack_nspace(&proc.nspace);
    buf.pack_rank(3);
    assert_eq!(buf.unpack_proc().unwrap(), proc);
    assert_eq!(buf.unpack_nspace().unwrap(), proc.nspace);
    assert_eq!(buf.unpack_rank().unwrap(), 3);
}

#[test]
fn empty_buffer_unpacks_to_end_of_buffer() {
    let mut buf = DataBuffer::new();
    assert!(matches!(buf.unpack_u32(), Err(WireError::EndOfBuffer)));
}

#[test]
fn exhaustion_after_last_record_is_clean() {
    let mut buf = DataBuffer::new();
    buf.pack_u32(1);
    buf.unpack_u32().unwrap();
    assert!(matches!(buf.unpack_u32(), Err(WireError::EndOfBuffer)));
}

#[test]
fn type_mismatch_is_not_end_of_buffer() {
    let mut buf = DataBuffer::new();
    buf.pack_string("x");
    let err = buf.unpack_u32().unwrap_err();
    assert!(matches!(err, WireError::TypeMismatch { .. }));
}

#[test]
fn truncated_payload_errors() {
    let mut buf = DataBuffer::new();
    buf.pack_u64(1);
    let mut bytes = buf.into_vec();
    bytes.truncate(4);
    let mut short = DataBuffer::from_vec(bytes);
    assert!(matches!(short.unpack_u64(), Err(WireError::EndOfBuffer)));
}

#[test]
fn values_round_trip_by_discriminator() {
    use dvm_core::attr::{Envar, Value};
    let values = vec![
        Value::Bool(false),
        Value::Byte(9),
        Value::String("abc".into()),
        Value::I8(-1),
        Value::I16(-300),
        Value::I32(123),
        Value::I64(-5_000_000_000),
        Value::U8(200),
        Value::U16(60_000),
        Value::U32(4_000_000_000),
        Value::U64(10),
        Value::F64(-0.25),
        Value::Size(4096),
        Value::Pid(321),
        Value::Timeval { sec: 10, usec: 500 },
        Value::Bytes(vec![1, 2, 3]),
        Value::Envar(Envar { name: "PATH".into(), value: "/bin".into(), separator: ':' }),
        Value::Proc(ProcName::new(Nspace::from_string("dvm-x"), 4)),
        Value::Rank(17),
    ];
    let mut buf = DataBuffer::new();
    for v in &values {
        buf.pack_value(v);
    }
    for v in &values {
        assert_eq!(&buf.unpack_value().unwrap(), v);
    }
    assert!(buf.is_exhausted());
}

#[test]
fn peek_tag_does_not_consume() {
    let mut buf = DataBuffer::new();
    buf.pack_u8(1);
    let before = buf.peek_tag();
    assert_eq!(before, buf.peek_tag());
    assert_eq!(buf.unpack_u8().unwrap(), 1);
}
