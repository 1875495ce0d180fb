//! Response definitions
//!
//! Represents a decoded response frame. Payload segments are `Bytes` slices
//! of the connection's inbound buffer, so decoding never copies a value.

use bytes::Bytes;

use super::header::{Opcode, Status};
use crate::error::{McError, Result};

/// A response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    /// Opcode echoed from the request
    pub opcode: Opcode,

    /// Outcome reported by the server
    pub status: Status,

    /// Correlation id echoed from the request
    pub opaque: u32,

    /// Version stamp (0 when the server sends none)
    pub cas: u64,

    /// Opcode-specific extras (flags on a GET hit)
    pub extras: Bytes,

    /// Key, when the server echoes it (empty otherwise)
    pub key: Bytes,

    /// Value for GET, counter for INCR/DECR, error text on failure
    pub value: Bytes,
}

impl ResponseFrame {
    /// An empty response with the given status
    pub fn new(opcode: Opcode, status: Status, opaque: u32) -> Self {
        Self {
            opcode,
            status,
            opaque,
            cas: 0,
            extras: Bytes::new(),
            key: Bytes::new(),
            value: Bytes::new(),
        }
    }

    /// A successful GET response carrying flags and a value
    pub fn value(opaque: u32, flags: u32, value: Bytes, cas: u64) -> Self {
        Self {
            cas,
            extras: Bytes::copy_from_slice(&flags.to_be_bytes()),
            value,
            ..Self::new(Opcode::Get, Status::NoError, opaque)
        }
    }

    /// A successful INCR/DECR response carrying the new counter value
    pub fn counter(opcode: Opcode, opaque: u32, counter: u64, cas: u64) -> Self {
        Self {
            cas,
            value: Bytes::copy_from_slice(&counter.to_be_bytes()),
            ..Self::new(opcode, Status::NoError, opaque)
        }
    }

    /// An error response; the body carries the status text like memcached does
    pub fn error(opcode: Opcode, status: Status, opaque: u32) -> Self {
        Self {
            value: Bytes::from_static(status.as_str().as_bytes()),
            ..Self::new(opcode, status, opaque)
        }
    }

    /// Flags word from a GET response's extras
    pub fn flags(&self) -> Option<u32> {
        let extras: [u8; 4] = self.extras.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(extras))
    }

    /// CAS, if the server supplied one
    pub fn cas(&self) -> Option<u64> {
        (self.cas != 0).then_some(self.cas)
    }

    /// New counter value from an INCR/DECR response
    pub fn counter_value(&self) -> Result<u64> {
        let body: [u8; 8] = self.value[..].try_into().map_err(|_| {
            McError::Protocol(format!(
                "counter response body must be 8 bytes, got {}",
                self.value.len()
            ))
        })?;
        Ok(u64::from_be_bytes(body))
    }
}
