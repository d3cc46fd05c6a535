// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed pack/unpack buffer.
//!
//! Wire layout: every value is `[type byte][payload]`. Integers are
//! big-endian; strings and byte objects carry a u32 length. Unpacking
//! verifies the type byte, and reading at the end of the buffer yields
//! [`WireError::EndOfBuffer`] — callers that iterate records treat that
//! as clean end-of-input, any other error as corruption.

use dvm_core::attr::{Envar, Value};
use dvm_core::id::{Nspace, ProcName, Rank};
use thiserror::Error;

/// Errors from the wire codec.
#[derive(Debug, Error)]
pub enum WireError {
    /// Clean exhaustion: no further value in the buffer.
    #[error("read past end of buffer")]
    EndOfBuffer,

    #[error("type mismatch: expected tag {expected}, found {found}")]
    TypeMismatch { expected: u8, found: u8 },

    #[error("invalid UTF-8 in packed string")]
    BadUtf8,

    #[error("invalid {what} discriminant: {value}")]
    BadEnum { what: &'static str, value: u32 },

    #[error("message too large: {size} bytes (max {max})")]
    TooLarge { size: usize, max: usize },

    #[error("decompression failed")]
    Decompress,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed")]
    ConnectionClosed,
}

// Type bytes. Part of the wire format; never renumbered.
const T_BOOL: u8 = 1;
const T_U8: u8 = 2;
const T_U16: u8 = 3;
const T_U32: u8 = 4;
const T_U64: u8 = 5;
const T_I8: u8 = 6;
const T_I16: u8 = 7;
const T_I32: u8 = 8;
const T_I64: u8 = 9;
const T_F64: u8 = 10;
const T_STRING: u8 = 11;
const T_BYTES: u8 = 12;
const T_PROC: u8 = 13;
const T_NSPACE: u8 = 14;
const T_RANK: u8 = 15;
const T_VALUE: u8 = 16;

/// Growable pack buffer with a read cursor.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataBuffer {
    data: Vec<u8>,
    cursor: usize,
}

impl DataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_vec(data: Vec<u8>) -> Self {
        Self { data, cursor: 0 }
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.cursor)
    }

    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    // --- raw helpers ---

    fn put(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    fn take(&mut self, n: usize) -> Result<&[u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::EndOfBuffer);
        }
        let slice = &self.data[self.cursor..self.cursor + n];
        self.cursor += n;
        Ok(slice)
    }

    fn put_tag(&mut self, tag: u8) {
        self.data.push(tag);
    }

    fn take_tag(&mut self, expected: u8) -> Result<(), WireError> {
        let found = *self.take(1)?.first().ok_or(WireError::EndOfBuffer)?;
        if found != expected {
            return Err(WireError::TypeMismatch { expected, found });
        }
        Ok(())
    }

    /// Peek the next type byte without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.get(self.cursor).copied()
    }

    // --- scalars ---

    pub fn pack_bool(&mut self, v: bool) {
        self.put_tag(T_BOOL);
        self.put(&[v as u8]);
    }

    pub fn unpack_bool(&mut self) -> Result<bool, WireError> {
        self.take_tag(T_BOOL)?;
        Ok(self.take(1)?[0] != 0)
    }

    pub fn pack_u8(&mut self, v: u8) {
        self.put_tag(T_U8);
        self.put(&[v]);
    }

    pub fn unpack_u8(&mut self) -> Result<u8, WireError> {
        self.take_tag(T_U8)?;
        Ok(self.take(1)?[0])
    }

    pub fn pack_u16(&mut self, v: u16) {
        self.put_tag(T_U16);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_u16(&mut self) -> Result<u16, WireError> {
        self.take_tag(T_U16)?;
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    pub fn pack_u32(&mut self, v: u32) {
        self.put_tag(T_U32);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_u32(&mut self) -> Result<u32, WireError> {
        self.take_tag(T_U32)?;
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn pack_u64(&mut self, v: u64) {
        self.put_tag(T_U64);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_u64(&mut self) -> Result<u64, WireError> {
        self.take_tag(T_U64)?;
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    pub fn pack_i8(&mut self, v: i8) {
        self.put_tag(T_I8);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_i8(&mut self) -> Result<i8, WireError> {
        self.take_tag(T_I8)?;
        Ok(self.take(1)?[0] as i8)
    }

    pub fn pack_i16(&mut self, v: i16) {
        self.put_tag(T_I16);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_i16(&mut self) -> Result<i16, WireError> {
        self.take_tag(T_I16)?;
        let b = self.take(2)?;
        Ok(i16::from_be_bytes([b[0], b[1]]))
    }

    pub fn pack_i32(&mut self, v: i32) {
        self.put_tag(T_I32);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_i32(&mut self) -> Result<i32, WireError> {
        self.take_tag(T_I32)?;
        let b = self.take(4)?;
        Ok(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn pack_i64(&mut self, v: i64) {
        self.put_tag(T_I64);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_i64(&mut self) -> Result<i64, WireError> {
        self.take_tag(T_I64)?;
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_be_bytes(arr))
    }

    pub fn pack_f64(&mut self, v: f64) {
        self.put_tag(T_F64);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_f64(&mut self) -> Result<f64, WireError> {
        self.take_tag(T_F64)?;
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_be_bytes(arr))
    }

    // --- strings / bytes ---

    fn put_len_bytes(&mut self, bytes: &[u8]) {
        self.put(&(bytes.len() as u32).to_be_bytes());
        self.put(bytes);
    }

    fn take_len_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        let b = self.take(4)?;
        let len = u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as usize;
        Ok(self.take(len)?.to_vec())
    }

    pub fn pack_string(&mut self, v: &str) {
        self.put_tag(T_STRING);
        self.put_len_bytes(v.as_bytes());
    }

    pub fn unpack_string(&mut self) -> Result<String, WireError> {
        self.take_tag(T_STRING)?;
        let bytes = self.take_len_bytes()?;
        String::from_utf8(bytes).map_err(|_| WireError::BadUtf8)
    }

    pub fn pack_bytes(&mut self, v: &[u8]) {
        self.put_tag(T_BYTES);
        self.put_len_bytes(v);
    }

    pub fn unpack_bytes(&mut self) -> Result<Vec<u8>, WireError> {
        self.take_tag(T_BYTES)?;
        self.take_len_bytes()
    }

    // --- identities ---

    pub fn pack_nspace(&mut self, v: &Nspace) {
        self.put_tag(T_NSPACE);
        self.put_len_bytes(v.as_str().as_bytes());
    }

    pub fn unpack_nspace(&mut self) -> Result<Nspace, WireError> {
        self.take_tag(T_NSPACE)?;
        let bytes = self.take_len_bytes()?;
        let s = String::from_utf8(bytes).map_err(|_| WireError::BadUtf8)?;
        Ok(Nspace::from_string(s))
    }

    pub fn pack_rank(&mut self, v: Rank) {
        self.put_tag(T_RANK);
        self.put(&v.to_be_bytes());
    }

    pub fn unpack_rank(&mut self) -> Result<Rank, WireError> {
        self.take_tag(T_RANK)?;
        let b = self.take(4)?;
        Ok(Rank::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn pack_proc(&mut self, v: &ProcName) {
        self.put_tag(T_PROC);
        self.put_len_bytes(v.nspace.as_str().as_bytes());
        self.put(&v.rank.to_be_bytes());
    }

    pub fn unpack_proc(&mut self) -> Result<ProcName, WireError> {
        self.take_tag(T_PROC)?;
        let bytes = self.take_len_bytes()?;
        let ns = String::from_utf8(bytes).map_err(|_| WireError::BadUtf8)?;
        let b = self.take(4)?;
        let rank = Rank::from_be_bytes([b[0], b[1], b[2], b[3]]);
        Ok(ProcName::new(Nspace::from_string(ns), rank))
    }

    // --- tagged attribute values ---

    /// Pack a tagged [`Value`] by discriminator.
    pub fn pack_value(&mut self, v: &Value) {
        self.put_tag(T_VALUE);
        self.data.push(v.type_byte());
        match v {
            Value::Bool(b) => self.put(&[*b as u8]),
            Value::Byte(b) | Value::U8(b) => self.put(&[*b]),
            Value::String(s) => self.put_len_bytes(s.as_bytes()),
            Value::I8(x) => self.put(&x.to_be_bytes()),
            Value::I16(x) => self.put(&x.to_be_bytes()),
            Value::I32(x) => self.put(&x.to_be_bytes()),
            Value::I64(x) => self.put(&x.to_be_bytes()),
            Value::U16(x) => self.put(&x.to_be_bytes()),
            Value::U32(x) | Value::Pid(x) | Value::Rank(x) => self.put(&x.to_be_bytes()),
            Value::U64(x) | Value::Size(x) => self.put(&x.to_be_bytes()),
            Value::F64(x) => self.put(&x.to_be_bytes()),
            Value::Timeval { sec, usec } => {
                self.put(&sec.to_be_bytes());
                self.put(&usec.to_be_bytes());
            }
            Value::Bytes(b) => self.put_len_bytes(b),
            Value::Envar(e) => {
                self.put_len_bytes(e.name.as_bytes());
                self.put_len_bytes(e.value.as_bytes());
                let mut sep = [0u8; 4];
                let s = e.separator.encode_utf8(&mut sep);
                self.put_len_bytes(s.as_bytes());
            }
            Value::Proc(p) => {
                self.put_len_bytes(p.nspace.as_str().as_bytes());
                self.put(&p.rank.to_be_bytes());
            }
            // Timers are LOCAL-only; packing the id string keeps the
            // contract total, the receiver just never sees one.
            Value::Timer(t) => self.put_len_bytes(t.as_str().as_bytes()),
        }
    }

    /// Unpack a tagged [`Value`].
    pub fn unpack_value(&mut self) -> Result<Value, WireError> {
        self.take_tag(T_VALUE)?;
        let kind = self.take(1)?[0];
        let take_string = |buf: &mut Self| -> Result<String, WireError> {
            let bytes = buf.take_len_bytes()?;
            String::from_utf8(bytes).map_err(|_| WireError::BadUtf8)
        };
        let v = match kind {
            1 => Value::Bool(self.take(1)?[0] != 0),
            2 => Value::Byte(self.take(1)?[0]),
            3 => Value::String(take_string(self)?),
            4 => Value::I8(self.take(1)?[0] as i8),
            5 => {
                let b = self.take(2)?;
                Value::I16(i16::from_be_bytes([b[0], b[1]]))
            }
            6 => {
                let b = self.take(4)?;
                Value::I32(i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            7 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Value::I64(i64::from_be_bytes(arr))
            }
            8 => Value::U8(self.take(1)?[0]),
            9 => {
                let b = self.take(2)?;
                Value::U16(u16::from_be_bytes([b[0], b[1]]))
            }
            10 => {
                let b = self.take(4)?;
                Value::U32(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            11 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Value::U64(u64::from_be_bytes(arr))
            }
            12 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Value::F64(f64::from_be_bytes(arr))
            }
            13 => {
                let b = self.take(8)?;
                let mut arr = [0u8; 8];
                arr.copy_from_slice(b);
                Value::Size(u64::from_be_bytes(arr))
            }
            14 => {
                let b = self.take(4)?;
                Value::Pid(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            15 => {
                let b = self.take(8)?;
                let mut sec = [0u8; 8];
                sec.copy_from_slice(b);
                let b = self.take(8)?;
                let mut usec = [0u8; 8];
                usec.copy_from_slice(b);
                Value::Timeval {
                    sec: i64::from_be_bytes(sec),
                    usec: i64::from_be_bytes(usec),
                }
            }
            16 => Value::Bytes(self.take_len_bytes()?),
            17 => {
                let name = take_string(self)?;
                let value = take_string(self)?;
                let sep = take_string(self)?;
                Value::Envar(Envar {
                    name,
                    value,
                    separator: sep.chars().next().unwrap_or(':'),
                })
            }
            18 => {
                let ns = take_string(self)?;
                let b = self.take(4)?;
                let rank = Rank::from_be_bytes([b[0], b[1], b[2], b[3]]);
                Value::Proc(ProcName::new(Nspace::from_string(ns), rank))
            }
            19 => {
                let b = self.take(4)?;
                Value::Rank(Rank::from_be_bytes([b[0], b[1], b[2], b[3]]))
            }
            20 => {
                let s = take_string(self)?;
                match dvm_core::timer::TimerKind::parse(&s) {
                    Some(kind) => Value::Timer(kind.to_timer_id()),
                    None => return Err(WireError::BadEnum { what: "timer", value: 20 }),
                }
            }
            other => {
                return Err(WireError::BadEnum { what: "value", value: other as u32 })
            }
        };
        Ok(v)
    }
}

#[cfg(test)]
#[path = "buffer_tests.rs"]
mod tests;
