//! PostgreSQL wire protocol encoding and decoding primitives.
//!
//! PostgreSQL uses big-endian (network byte order) for all integers.

use crate::error::{Error, Result};
use zerocopy::FromBytes;

use super::types::{I16BE, I32BE, U16BE, U32BE};

/// Sequential reader over the body of one backend message.
///
/// Every read is bounds-checked and a body must be consumed exactly:
/// [`finish`](Self::finish) rejects trailing bytes.
#[derive(Debug, Clone)]
pub struct ResponseBody<'a> {
    message: &'static str,
    data: &'a [u8],
}

impl<'a> ResponseBody<'a> {
    /// Start reading the body of the named message.
    pub fn new(message: &'static str, data: &'a [u8]) -> Self {
        Self { message, data }
    }

    /// Number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }

    /// Returns true if every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Look at the next byte without consuming it.
    pub fn peek_u8(&self) -> Option<u8> {
        self.data.first().copied()
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        match self.data.split_at_checked(len) {
            Some((head, rest)) => {
                self.data = rest;
                Ok(head)
            }
            None => Err(Error::Protocol(format!(
                "{}: truncated, wanted {} bytes but {} left",
                self.message,
                len,
                self.data.len()
            ))),
        }
    }

    /// Read 1-byte unsigned integer.
    pub fn read_u8(&mut self) -> Result<u8> {
        let bytes = self.take(1)?;
        Ok(bytes[0])
    }

    /// Read one byte that must be an ASCII character.
    pub fn read_ascii(&mut self) -> Result<u8> {
        let byte = self.read_u8()?;
        if !byte.is_ascii() {
            return Err(Error::Protocol(format!(
                "{}: expected ASCII, got 0x{:02x}",
                self.message, byte
            )));
        }
        Ok(byte)
    }

    /// Read 2-byte big-endian signed integer.
    pub fn read_i16(&mut self) -> Result<i16> {
        let message = self.message;
        let bytes = self.take(2)?;
        let value = I16BE::ref_from_bytes(bytes)
            .map_err(|e| Error::Protocol(format!("{message}: read_i16: {e:?}")))?;
        Ok(value.get())
    }

    /// Read 2-byte big-endian unsigned integer.
    pub fn read_u16(&mut self) -> Result<u16> {
        let message = self.message;
        let bytes = self.take(2)?;
        let value = U16BE::ref_from_bytes(bytes)
            .map_err(|e| Error::Protocol(format!("{message}: read_u16: {e:?}")))?;
        Ok(value.get())
    }

    /// Read 4-byte big-endian signed integer.
    pub fn read_i32(&mut self) -> Result<i32> {
        let message = self.message;
        let bytes = self.take(4)?;
        let value = I32BE::ref_from_bytes(bytes)
            .map_err(|e| Error::Protocol(format!("{message}: read_i32: {e:?}")))?;
        Ok(value.get())
    }

    /// Read 4-byte big-endian unsigned integer.
    pub fn read_u32(&mut self) -> Result<u32> {
        let message = self.message;
        let bytes = self.take(4)?;
        let value = U32BE::ref_from_bytes(bytes)
            .map_err(|e| Error::Protocol(format!("{message}: read_u32: {e:?}")))?;
        Ok(value.get())
    }

    /// Read fixed-length bytes.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        self.take(len)
    }

    /// Read null-terminated UTF-8 string (PostgreSQL String type).
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let Some(pos) = memchr::memchr(0, self.data) else {
            return Err(Error::Protocol(format!(
                "{}: no null terminator found",
                self.message
            )));
        };
        let bytes = self.take(pos + 1)?;
        simdutf8::compat::from_utf8(&bytes[..pos])
            .map_err(|e| Error::Protocol(format!("{}: invalid UTF-8: {e}", self.message)))
    }

    /// Read every remaining byte.
    pub fn read_remaining(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.data)
    }

    /// Finish reading; any unconsumed byte is a protocol error.
    pub fn finish(self) -> Result<()> {
        if self.data.is_empty() {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "{}: {} unconsumed trailing bytes",
                self.message,
                self.data.len()
            )))
        }
    }
}

/// Write 1-byte unsigned integer.
#[inline]
pub fn write_u8(out: &mut Vec<u8>, value: u8) {
    out.push(value);
}

/// Write 2-byte big-endian signed integer.
#[inline]
pub fn write_i16(out: &mut Vec<u8>, value: i16) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write 4-byte big-endian signed integer.
#[inline]
pub fn write_i32(out: &mut Vec<u8>, value: i32) {
    out.extend_from_slice(&value.to_be_bytes());
}

/// Write raw bytes.
#[inline]
pub fn write_bytes(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(data);
}

/// Write null-terminated string from &str.
#[inline]
pub fn write_cstr(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}

/// Message builder helper that handles the length field.
///
/// PostgreSQL message format:
/// - Type byte (1 byte) - NOT included in length
/// - Length (4 bytes) - includes itself
/// - Payload (Length - 4 bytes)
pub struct MessageBuilder<'a> {
    buf: &'a mut Vec<u8>,
    start: usize,
}

impl<'a> MessageBuilder<'a> {
    /// Start building a message with a type byte.
    pub fn new(buf: &'a mut Vec<u8>, type_byte: u8) -> Self {
        buf.push(type_byte);
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Start building a startup message (no type byte).
    pub fn new_startup(buf: &'a mut Vec<u8>) -> Self {
        let start = buf.len();
        buf.extend_from_slice(&[0, 0, 0, 0]);
        Self { buf, start }
    }

    /// Write a u8.
    pub fn write_u8(&mut self, value: u8) {
        write_u8(self.buf, value);
    }

    /// Write an i16.
    pub fn write_i16(&mut self, value: i16) {
        write_i16(self.buf, value);
    }

    /// Write an i32.
    pub fn write_i32(&mut self, value: i32) {
        write_i32(self.buf, value);
    }

    /// Write raw bytes.
    pub fn write_bytes(&mut self, data: &[u8]) {
        write_bytes(self.buf, data);
    }

    /// Write null-terminated string.
    pub fn write_cstr(&mut self, s: &str) {
        write_cstr(self.buf, s);
    }

    /// Finish building the message and fill in the length field.
    pub fn finish(self) {
        let len = (self.buf.len() - self.start) as i32;
        self.buf[self.start..self.start + 4].copy_from_slice(&len.to_be_bytes());
    }
}
