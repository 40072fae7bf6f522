//! Positional wire codec for message bodies.
//!
//! All payloads use little-endian, tightly packed encoding with no padding.
//! Strings carry an `i32` length prefix and no terminator; string lists a
//! `u64` count prefix; parameter lists are terminated by an entry whose name
//! is empty. Raw blobs are appended positionally and sized by accompanying
//! metadata, so [`Reader::read_rest`] hands back whatever the body has left.
//!
//! Reading past the end of a body is a protocol error and surfaces as
//! [`WireError::UnexpectedEnd`]; the session treats it as fatal.

use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

use crate::protocol::ParameterSpec;

/// Errors raised while decoding a message body.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// A read requested more bytes than the body has left.
    #[error("truncated message body: wanted {wanted} bytes, {remaining} remaining")]
    UnexpectedEnd { wanted: usize, remaining: usize },

    /// A string length prefix was negative.
    #[error("negative string length: {0}")]
    NegativeLength(i32),

    /// String bytes were not valid UTF-8.
    #[error("string is not valid UTF-8")]
    InvalidString,
}

/// Cursor over a borrowed message body.
#[derive(Debug)]
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    #[must_use]
    pub fn new(buf: &'a [u8]) -> Self { Self { buf, pos: 0 } }

    /// Bytes not yet consumed.
    #[must_use]
    pub fn remaining(&self) -> usize { self.buf.len() - self.pos }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.remaining() == 0 }

    fn take(&mut self, wanted: usize) -> Result<&'a [u8], WireError> {
        let remaining = self.remaining();
        if wanted > remaining {
            return Err(WireError::UnexpectedEnd { wanted, remaining });
        }
        let slice = &self.buf[self.pos..self.pos + wanted];
        self.pos += wanted;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        let b = self.take(1)?;
        Ok(b[0])
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_i32(&mut self) -> Result<i32, WireError> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn read_u64(&mut self) -> Result<u64, WireError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    /// Read an `i32`-length-prefixed string.
    pub fn read_string(&mut self) -> Result<String, WireError> {
        let len = self.read_i32()?;
        if len < 0 {
            return Err(WireError::NegativeLength(len));
        }
        let bytes = self.take(len as usize)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| WireError::InvalidString)
    }

    /// Read a `u64`-count-prefixed list of strings.
    pub fn read_string_list(&mut self) -> Result<Vec<String>, WireError> {
        let count = self.read_u64()?;
        let mut list = Vec::new();
        for _ in 0..count {
            list.push(self.read_string()?);
        }
        Ok(list)
    }

    /// Read `wanted` raw bytes.
    pub fn read_bytes(&mut self, wanted: usize) -> Result<&'a [u8], WireError> { self.take(wanted) }

    /// Consume and return everything left in the body.
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

/// Growable body builder for outbound messages.
#[derive(Debug, Default)]
pub struct Writer {
    buf: BytesMut,
}

impl Writer {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn len(&self) -> usize { self.buf.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.buf.is_empty() }

    pub fn write_u8(&mut self, value: u8) { self.buf.put_u8(value); }

    pub fn write_u32(&mut self, value: u32) { self.buf.put_u32_le(value); }

    pub fn write_i32(&mut self, value: i32) { self.buf.put_i32_le(value); }

    pub fn write_u64(&mut self, value: u64) { self.buf.put_u64_le(value); }

    /// Write an `i32`-length-prefixed string.
    ///
    /// Names on this protocol are short; the `i32` bound is never a concern
    /// in practice.
    pub fn write_string(&mut self, value: &str) {
        self.buf.put_i32_le(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    /// Write a `u64`-count-prefixed list of strings.
    pub fn write_string_list(&mut self, list: &[String]) {
        self.buf.put_u64_le(list.len() as u64);
        for entry in list {
            self.write_string(entry);
        }
    }

    /// Write a parameter list terminated by an empty-name sentinel.
    pub fn write_parameter_list(&mut self, list: &[ParameterSpec]) {
        for entry in list {
            self.write_string(&entry.name);
            self.write_u32(entry.kind as u32);
            self.write_string(&entry.description);
        }
        self.write_string("");
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) { self.buf.put_slice(bytes); }

    /// Finish the body and hand it off for posting.
    #[must_use]
    pub fn freeze(self) -> Bytes { self.buf.freeze() }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use rstest::rstest;

    use super::*;
    use crate::protocol::DataType;

    #[rstest]
    fn primitives_round_trip() {
        let mut w = Writer::new();
        w.write_u8(0xab);
        w.write_u32(0xdead_beef);
        w.write_i32(-7);
        w.write_u64(u64::MAX - 1);
        let body = w.freeze();

        let mut r = Reader::new(&body);
        assert_eq!(r.read_u8().unwrap(), 0xab);
        assert_eq!(r.read_u32().unwrap(), 0xdead_beef);
        assert_eq!(r.read_i32().unwrap(), -7);
        assert_eq!(r.read_u64().unwrap(), u64::MAX - 1);
        assert!(r.is_empty());
    }

    #[rstest]
    fn strings_are_length_prefixed_without_terminator() {
        let mut w = Writer::new();
        w.write_string("aspect");
        let body = w.freeze();

        assert_eq!(&body[..4], &6i32.to_le_bytes());
        assert_eq!(&body[4..], b"aspect");
    }

    #[rstest]
    fn empty_string_list_round_trips() {
        let mut w = Writer::new();
        w.write_string_list(&[]);
        let body = w.freeze();

        let mut r = Reader::new(&body);
        assert_eq!(r.read_string_list().unwrap(), Vec::<String>::new());
    }

    #[rstest]
    fn parameter_list_terminates_on_empty_name() {
        let specs = vec![
            ParameterSpec {
                name: "aspect".into(),
                kind: DataType::Float32,
                description: "width over height".into(),
            },
            ParameterSpec {
                name: "position".into(),
                kind: DataType::Float32Vec3,
                description: String::new(),
            },
        ];
        let mut w = Writer::new();
        w.write_parameter_list(&specs);
        let body = w.freeze();

        let mut r = Reader::new(&body);
        let mut decoded = Vec::new();
        loop {
            let name = r.read_string().unwrap();
            if name.is_empty() {
                break;
            }
            let kind = DataType::from_u32(r.read_u32().unwrap());
            let description = r.read_string().unwrap();
            decoded.push((name, kind, description));
        }
        assert!(r.is_empty());
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded[0].0, "aspect");
        assert_eq!(decoded[0].1, DataType::Float32);
        assert_eq!(decoded[1].1, DataType::Float32Vec3);
    }

    #[rstest]
    fn read_past_end_reports_wanted_and_remaining() {
        let mut r = Reader::new(&[1, 2, 3]);
        let err = r.read_u32().unwrap_err();
        assert_eq!(
            err,
            WireError::UnexpectedEnd {
                wanted: 4,
                remaining: 3
            }
        );
    }

    #[rstest]
    fn negative_string_length_is_rejected() {
        let mut w = Writer::new();
        w.write_i32(-1);
        let body = w.freeze();
        let mut r = Reader::new(&body);
        assert_eq!(r.read_string().unwrap_err(), WireError::NegativeLength(-1));
    }

    proptest! {
        #[test]
        fn scalar_and_string_round_trip(a: u8, b: u32, c: u64, s in ".{0,64}") {
            let mut w = Writer::new();
            w.write_u8(a);
            w.write_string(&s);
            w.write_u32(b);
            w.write_u64(c);
            let body = w.freeze();

            let mut r = Reader::new(&body);
            prop_assert_eq!(r.read_u8().unwrap(), a);
            prop_assert_eq!(r.read_string().unwrap(), s);
            prop_assert_eq!(r.read_u32().unwrap(), b);
            prop_assert_eq!(r.read_u64().unwrap(), c);
            prop_assert!(r.is_empty());
        }

        #[test]
        fn string_list_round_trip(list in proptest::collection::vec(".{0,16}", 0..8)) {
            let mut w = Writer::new();
            w.write_string_list(&list);
            let body = w.freeze();

            let mut r = Reader::new(&body);
            prop_assert_eq!(r.read_string_list().unwrap(), list);
        }
    }
}
