//! Protocol Module
//!
//! The memcached binary protocol: a fixed 24-byte header followed by
//! extras, key and value segments.
//!
//! ### Opcodes
//! - 0x00: GET
//! - 0x01: SET
//! - 0x04: DELETE
//! - 0x05: INCREMENT
//! - 0x06: DECREMENT
//!
//! ### Magic
//! - 0x80: request
//! - 0x81: response
//!
//! ### Status Codes (subset)
//! - 0x0000: No error
//! - 0x0001: Key not found
//! - 0x0002: Key exists
//! - 0x0003: Value too large
//! - 0x0004: Invalid arguments
//! - 0x0005: Item not stored
//! - 0x0006: Non-numeric value
//! - 0x0082: Out of memory

mod codec;
mod command;
mod header;
mod response;

pub use codec::{
    decode_request, decode_response, encode_command, encode_response, encoded_len, MAX_BODY_SIZE,
};
pub use command::{
    Command, Counter, Expiry, RequestFrame, COUNTER_NO_CREATE, RELATIVE_EXPIRY_LIMIT,
};
pub use header::{Header, Opcode, Status, HEADER_SIZE, REQUEST_MAGIC, RESPONSE_MAGIC};
pub use response::ResponseFrame;
