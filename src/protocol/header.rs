//! Binary protocol header
//!
//! Every frame, in both directions, starts with the same 24-byte header.
//!
//! ```text
//! Byte/     0       |       1       |       2       |       3       |
//!   |0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|0 1 2 3 4 5 6 7|
//!   +---------------+---------------+---------------+---------------+
//!  0| Magic         | Opcode        | Key length                    |
//!   +---------------+---------------+---------------+---------------+
//!  4| Extras length | Data type     | vbucket id / status           |
//!   +---------------+---------------+---------------+---------------+
//!  8| Total body length                                             |
//!   +---------------+---------------+---------------+---------------+
//! 12| Opaque                                                        |
//!   +---------------+---------------+---------------+---------------+
//! 16| CAS                                                           |
//!   |                                                               |
//!   +---------------+---------------+---------------+---------------+
//! ```
//!
//! All multi-byte fields are big-endian.

use bytes::{Buf, BufMut};

/// Magic byte for request packets
pub const REQUEST_MAGIC: u8 = 0x80;

/// Magic byte for response packets
pub const RESPONSE_MAGIC: u8 = 0x81;

/// Fixed header size
pub const HEADER_SIZE: usize = 24;

/// Opcodes this client speaks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
}

impl Opcode {
    /// Map a wire byte to an opcode
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Opcode::Get),
            0x01 => Some(Opcode::Set),
            0x04 => Some(Opcode::Delete),
            0x05 => Some(Opcode::Increment),
            0x06 => Some(Opcode::Decrement),
            _ => None,
        }
    }
}

/// Response status codes
///
/// Codes the client does not know are preserved in `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Status {
    NoError,
    KeyNotFound,
    KeyExists,
    ValueTooLarge,
    InvalidArguments,
    ItemNotStored,
    NonNumericValue,
    UnknownCommand,
    OutOfMemory,
    NotSupported,
    InternalError,
    Busy,
    TempFailure,
    Other(u16),
}

impl Status {
    /// Map a wire status to a `Status`
    pub fn from_u16(value: u16) -> Self {
        match value {
            0x0000 => Status::NoError,
            0x0001 => Status::KeyNotFound,
            0x0002 => Status::KeyExists,
            0x0003 => Status::ValueTooLarge,
            0x0004 => Status::InvalidArguments,
            0x0005 => Status::ItemNotStored,
            0x0006 => Status::NonNumericValue,
            0x0081 => Status::UnknownCommand,
            0x0082 => Status::OutOfMemory,
            0x0083 => Status::NotSupported,
            0x0084 => Status::InternalError,
            0x0085 => Status::Busy,
            0x0086 => Status::TempFailure,
            other => Status::Other(other),
        }
    }

    /// Wire value
    pub fn code(&self) -> u16 {
        match self {
            Status::NoError => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::KeyExists => 0x0002,
            Status::ValueTooLarge => 0x0003,
            Status::InvalidArguments => 0x0004,
            Status::ItemNotStored => 0x0005,
            Status::NonNumericValue => 0x0006,
            Status::UnknownCommand => 0x0081,
            Status::OutOfMemory => 0x0082,
            Status::NotSupported => 0x0083,
            Status::InternalError => 0x0084,
            Status::Busy => 0x0085,
            Status::TempFailure => 0x0086,
            Status::Other(code) => *code,
        }
    }

    pub fn is_success(&self) -> bool {
        *self == Status::NoError
    }

    /// Short description, matching memcached's own wording
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::NoError => "No error",
            Status::KeyNotFound => "Not found",
            Status::KeyExists => "Key exists",
            Status::ValueTooLarge => "Value too large",
            Status::InvalidArguments => "Invalid arguments",
            Status::ItemNotStored => "Item not stored",
            Status::NonNumericValue => "Incr/Decr on non-numeric value",
            Status::UnknownCommand => "Unknown command",
            Status::OutOfMemory => "Out of memory",
            Status::NotSupported => "Not supported",
            Status::InternalError => "Internal error",
            Status::Busy => "Busy",
            Status::TempFailure => "Temporary failure",
            Status::Other(_) => "Unknown status",
        }
    }
}

/// A decoded or to-be-encoded frame header
///
/// `opcode` is kept as the raw byte so that decoding can report unknown
/// opcodes with their value; `vbucket_or_status` is the vbucket id on
/// requests and the status code on responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: u8,
    pub opcode: u8,
    pub key_length: u16,
    pub extras_length: u8,
    pub data_type: u8,
    pub vbucket_or_status: u16,
    pub total_body_length: u32,
    pub opaque: u32,
    pub cas: u64,
}

impl Header {
    /// A request header with every length field zeroed
    pub fn request(opcode: Opcode, opaque: u32) -> Self {
        Self {
            magic: REQUEST_MAGIC,
            opcode: opcode as u8,
            key_length: 0,
            extras_length: 0,
            data_type: 0,
            vbucket_or_status: 0,
            total_body_length: 0,
            opaque,
            cas: 0,
        }
    }

    /// A response header with every length field zeroed
    pub fn response(opcode: Opcode, status: Status, opaque: u32) -> Self {
        Self {
            magic: RESPONSE_MAGIC,
            opcode: opcode as u8,
            key_length: 0,
            extras_length: 0,
            data_type: 0,
            vbucket_or_status: status.code(),
            total_body_length: 0,
            opaque,
            cas: 0,
        }
    }

    /// Read a header from the first `HEADER_SIZE` bytes of `data`.
    ///
    /// Returns `None` if fewer bytes are available. No field is validated.
    pub fn peek(data: &[u8]) -> Option<Self> {
        if data.len() < HEADER_SIZE {
            return None;
        }
        let mut buf = &data[..HEADER_SIZE];
        Some(Self {
            magic: buf.get_u8(),
            opcode: buf.get_u8(),
            key_length: buf.get_u16(),
            extras_length: buf.get_u8(),
            data_type: buf.get_u8(),
            vbucket_or_status: buf.get_u16(),
            total_body_length: buf.get_u32(),
            opaque: buf.get_u32(),
            cas: buf.get_u64(),
        })
    }

    /// Append the 24 header bytes to `buf`
    pub fn write_to<B: BufMut>(&self, buf: &mut B) {
        buf.put_u8(self.magic);
        buf.put_u8(self.opcode);
        buf.put_u16(self.key_length);
        buf.put_u8(self.extras_length);
        buf.put_u8(self.data_type);
        buf.put_u16(self.vbucket_or_status);
        buf.put_u32(self.total_body_length);
        buf.put_u32(self.opaque);
        buf.put_u64(self.cas);
    }

    /// Frame length including the header
    pub fn frame_length(&self) -> usize {
        HEADER_SIZE + self.total_body_length as usize
    }
}
