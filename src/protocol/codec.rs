//! Protocol codec
//!
//! Encoding and decoding functions for the memcached binary wire format.
//!
//! ## Frame Format
//! ```text
//! ┌──────────────┬──────────┬──────────┬─────────────────────┐
//! │ Header (24)  │  Extras  │   Key    │        Value        │
//! └──────────────┴──────────┴──────────┴─────────────────────┘
//!                 \_________ total body length _____________/
//! ```
//!
//! ### Extras by Command
//! - GET / DELETE: none
//! - SET:          flags (4) + expiry (4)
//! - INCR / DECR:  delta (8) + initial (8) + expiry (4)
//!
//! ### Incremental Decoding
//! Decoders take the connection's inbound `BytesMut`. A partial frame leaves
//! the buffer untouched and yields `Ok(None)`; the next read appends to it and
//! decoding resumes. A complete frame is split off the front of the buffer.
//! Header sanity (magic, lengths, ceiling) is checked as soon as the 24 header
//! bytes are present, before waiting for the body.

use bytes::{BufMut, Bytes, BytesMut};

use super::command::{Command, Counter, RequestFrame, COUNTER_NO_CREATE};
use super::header::{Header, Opcode, Status, HEADER_SIZE, REQUEST_MAGIC, RESPONSE_MAGIC};
use super::response::ResponseFrame;
use crate::error::{McError, Result};

/// Default ceiling on a declared body length (64 MiB)
pub const MAX_BODY_SIZE: usize = 64 * 1024 * 1024;

// =============================================================================
// Command Encoding
// =============================================================================

/// Number of bytes `encode_command` will append
pub fn encoded_len(command: &Command) -> usize {
    let (extras, value) = match command {
        Command::Get { .. } | Command::Delete { .. } => (0, 0),
        Command::Set { value, .. } => (8, value.len()),
        Command::Increment(_) | Command::Decrement(_) => (20, 0),
    };
    HEADER_SIZE + extras + command.key().len() + value
}

/// Append the wire form of `command`, tagged with `opaque`, to `buf`
///
/// The command must pass `Command::check_frame_limits`, otherwise the length
/// fields are truncated. `ConnectionHandle::dispatch` checks this.
pub fn encode_command(command: &Command, opaque: u32, buf: &mut BytesMut) {
    let key = command.key();
    buf.reserve(encoded_len(command));

    let mut header = Header::request(command.opcode(), opaque);
    header.key_length = key.len() as u16;

    match command {
        Command::Get { .. } | Command::Delete { .. } => {
            header.total_body_length = key.len() as u32;
            header.write_to(buf);
        }
        Command::Set {
            value,
            flags,
            expiry,
            ..
        } => {
            header.extras_length = 8;
            header.total_body_length = (8 + key.len() + value.len()) as u32;
            header.write_to(buf);
            buf.put_u32(*flags);
            buf.put_u32(expiry.to_wire());
        }
        Command::Increment(counter) | Command::Decrement(counter) => {
            header.extras_length = 20;
            header.total_body_length = (20 + key.len()) as u32;
            header.write_to(buf);
            put_counter_extras(counter, buf);
        }
    }

    buf.put_slice(key);
    if let Command::Set { value, .. } = command {
        buf.put_slice(value);
    }
}

fn put_counter_extras(counter: &Counter, buf: &mut BytesMut) {
    let (initial, expiry) = match counter.initial {
        Some((initial, expiry)) => (initial, expiry.to_wire()),
        None => (0, COUNTER_NO_CREATE),
    };
    buf.put_u64(counter.delta);
    buf.put_u64(initial);
    buf.put_u32(expiry);
}

// =============================================================================
// Response Encoding
// =============================================================================

/// Append the wire form of a response frame to `buf`
pub fn encode_response(frame: &ResponseFrame, buf: &mut BytesMut) {
    let body = frame.extras.len() + frame.key.len() + frame.value.len();
    buf.reserve(HEADER_SIZE + body);

    let mut header = Header::response(frame.opcode, frame.status, frame.opaque);
    header.key_length = frame.key.len() as u16;
    header.extras_length = frame.extras.len() as u8;
    header.total_body_length = body as u32;
    header.cas = frame.cas;
    header.write_to(buf);

    buf.put_slice(&frame.extras);
    buf.put_slice(&frame.key);
    buf.put_slice(&frame.value);
}

// =============================================================================
// Decoding
// =============================================================================

/// Decode one response frame from the front of `buf`
///
/// Returns `Ok(None)` until a complete frame is buffered. Any `Err` means the
/// stream can no longer be trusted and the connection must be closed.
pub fn decode_response(buf: &mut BytesMut, max_body: usize) -> Result<Option<ResponseFrame>> {
    let Some((header, opcode, extras, key, value)) = split_frame(buf, RESPONSE_MAGIC, max_body)?
    else {
        return Ok(None);
    };

    Ok(Some(ResponseFrame {
        opcode,
        status: Status::from_u16(header.vbucket_or_status),
        opaque: header.opaque,
        cas: header.cas,
        extras,
        key,
        value,
    }))
}

/// Decode one request frame from the front of `buf` (server side)
pub fn decode_request(buf: &mut BytesMut, max_body: usize) -> Result<Option<RequestFrame>> {
    let Some((header, opcode, extras, key, value)) = split_frame(buf, REQUEST_MAGIC, max_body)?
    else {
        return Ok(None);
    };

    Ok(Some(RequestFrame {
        opcode,
        vbucket: header.vbucket_or_status,
        opaque: header.opaque,
        cas: header.cas,
        extras,
        key,
        value,
    }))
}

type Split = (Header, Opcode, Bytes, Bytes, Bytes);

fn split_frame(buf: &mut BytesMut, magic: u8, max_body: usize) -> Result<Option<Split>> {
    let Some(header) = Header::peek(buf) else {
        return Ok(None);
    };

    if header.magic != magic {
        return Err(McError::Protocol(format!(
            "invalid magic byte: 0x{:02x} (expected 0x{:02x})",
            header.magic, magic
        )));
    }

    let opcode = Opcode::from_u8(header.opcode).ok_or_else(|| {
        McError::Protocol(format!("unknown opcode: 0x{:02x}", header.opcode))
    })?;

    let body_len = header.total_body_length as usize;
    if body_len > max_body {
        return Err(McError::Protocol(format!(
            "body too large: {} bytes (max {})",
            body_len, max_body
        )));
    }

    let extras_len = header.extras_length as usize;
    let key_len = header.key_length as usize;
    if extras_len + key_len > body_len {
        return Err(McError::Protocol(format!(
            "inconsistent lengths: extras {} + key {} exceed body {}",
            extras_len, key_len, body_len
        )));
    }

    let frame_len = header.frame_length();
    if buf.len() < frame_len {
        buf.reserve(frame_len - buf.len());
        return Ok(None);
    }

    let mut body = buf.split_to(frame_len).freeze().split_off(HEADER_SIZE);
    let extras = body.split_to(extras_len);
    let key = body.split_to(key_len);

    Ok(Some((header, opcode, extras, key, body)))
}
