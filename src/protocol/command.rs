//! Command definitions
//!
//! Represents requests sent to a memcached server. Keys and values are opaque
//! byte sequences; the client never interprets them.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;

use super::header::Opcode;
use crate::error::{McError, Result};

/// Expiry values above this many seconds are absolute Unix times on the wire
pub const RELATIVE_EXPIRY_LIMIT: u32 = 60 * 60 * 24 * 30;

/// Counter expiry sentinel: fail with "not found" instead of creating the key
pub const COUNTER_NO_CREATE: u32 = 0xFFFF_FFFF;

/// Item lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Never expires (wire value 0)
    #[default]
    Never,

    /// Raw protocol value: up to 30 days it is relative, above that it is
    /// an absolute Unix timestamp
    Seconds(u32),

    /// Relative lifetime, rounded up to whole seconds (at least one, since 0
    /// would mean "never"). Lifetimes beyond 30 days are converted to an
    /// absolute timestamp when encoded.
    After(Duration),

    /// Absolute point in time
    At(SystemTime),
}

impl Expiry {
    /// Wire value, computed against `now`
    pub fn to_wire_at(&self, now: SystemTime) -> u32 {
        match *self {
            Expiry::Never => 0,
            Expiry::Seconds(secs) => secs,
            Expiry::After(lifetime) => {
                let mut secs = lifetime.as_secs();
                if lifetime.subsec_nanos() > 0 || secs == 0 {
                    secs = secs.saturating_add(1);
                }
                if secs <= RELATIVE_EXPIRY_LIMIT as u64 {
                    secs as u32
                } else {
                    clamp_unix(unix_secs(now).saturating_add(secs))
                }
            }
            Expiry::At(when) => clamp_unix(unix_secs(when)).max(RELATIVE_EXPIRY_LIMIT + 1),
        }
    }

    /// Wire value, computed against the current clock
    pub fn to_wire(&self) -> u32 {
        self.to_wire_at(SystemTime::now())
    }
}

impl From<u32> for Expiry {
    fn from(secs: u32) -> Self {
        if secs == 0 {
            Expiry::Never
        } else {
            Expiry::Seconds(secs)
        }
    }
}

impl From<Duration> for Expiry {
    fn from(lifetime: Duration) -> Self {
        Expiry::After(lifetime)
    }
}

fn unix_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn clamp_unix(secs: u64) -> u32 {
    secs.min(u32::MAX as u64 - 1) as u32
}

/// Arguments of an increment or decrement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counter {
    pub key: Bytes,
    pub delta: u64,
    /// Value (and lifetime) to create the key with when it is missing.
    /// `None` makes a missing key a miss.
    pub initial: Option<(u64, Expiry)>,
}

/// A command, immutable once built
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Fetch a value
    Get { key: Bytes },

    /// Store a value unconditionally
    Set {
        key: Bytes,
        value: Bytes,
        flags: u32,
        expiry: Expiry,
    },

    /// Remove a key
    Delete { key: Bytes },

    /// Add to a numeric value (wraps at 2^64)
    Increment(Counter),

    /// Subtract from a numeric value (saturates at 0)
    Decrement(Counter),
}

impl Command {
    /// Wire opcode
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Get { .. } => Opcode::Get,
            Command::Set { .. } => Opcode::Set,
            Command::Delete { .. } => Opcode::Delete,
            Command::Increment(_) => Opcode::Increment,
            Command::Decrement(_) => Opcode::Decrement,
        }
    }

    /// The key this command addresses
    pub fn key(&self) -> &[u8] {
        match self {
            Command::Get { key } | Command::Set { key, .. } | Command::Delete { key } => key,
            Command::Increment(c) | Command::Decrement(c) => &c.key,
        }
    }

    /// Check that the key and body fit the header's length fields
    pub fn check_frame_limits(&self) -> Result<()> {
        let key = self.key().len();
        if key == 0 || key > u16::MAX as usize {
            return Err(McError::InvalidArgument(format!(
                "key length {} does not fit a frame (1..={})",
                key,
                u16::MAX
            )));
        }
        let body = match self {
            Command::Set { value, .. } => 8 + key + value.len(),
            Command::Increment(_) | Command::Decrement(_) => 20 + key,
            Command::Get { .. } | Command::Delete { .. } => key,
        };
        if body > u32::MAX as usize {
            return Err(McError::InvalidArgument(format!(
                "body of {} bytes does not fit a frame",
                body
            )));
        }
        Ok(())
    }
}

/// A request frame as decoded on the server side of the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFrame {
    pub opcode: Opcode,
    pub vbucket: u16,
    pub opaque: u32,
    pub cas: u64,
    pub extras: Bytes,
    pub key: Bytes,
    pub value: Bytes,
}

impl RequestFrame {
    /// Interpret the frame as a `Command`, checking each opcode's extras layout
    pub fn to_command(&self) -> Result<Command> {
        let extras = &self.extras[..];
        match self.opcode {
            Opcode::Get => {
                self.expect_layout(0)?;
                Ok(Command::Get {
                    key: self.key.clone(),
                })
            }
            Opcode::Delete => {
                self.expect_layout(0)?;
                Ok(Command::Delete {
                    key: self.key.clone(),
                })
            }
            Opcode::Set => {
                self.expect_extras(8)?;
                let flags = u32::from_be_bytes([extras[0], extras[1], extras[2], extras[3]]);
                let expiry = u32::from_be_bytes([extras[4], extras[5], extras[6], extras[7]]);
                Ok(Command::Set {
                    key: self.key.clone(),
                    value: self.value.clone(),
                    flags,
                    expiry: Expiry::from(expiry),
                })
            }
            Opcode::Increment | Opcode::Decrement => {
                self.expect_layout(20)?;
                let mut delta = [0u8; 8];
                delta.copy_from_slice(&extras[0..8]);
                let mut initial = [0u8; 8];
                initial.copy_from_slice(&extras[8..16]);
                let expiry = u32::from_be_bytes([extras[16], extras[17], extras[18], extras[19]]);

                let counter = Counter {
                    key: self.key.clone(),
                    delta: u64::from_be_bytes(delta),
                    initial: if expiry == COUNTER_NO_CREATE {
                        None
                    } else {
                        Some((u64::from_be_bytes(initial), Expiry::from(expiry)))
                    },
                };
                Ok(match self.opcode {
                    Opcode::Increment => Command::Increment(counter),
                    _ => Command::Decrement(counter),
                })
            }
        }
    }

    fn expect_extras(&self, len: usize) -> Result<()> {
        if self.extras.len() != len {
            return Err(McError::Protocol(format!(
                "{:?}: expected {} bytes of extras, got {}",
                self.opcode,
                len,
                self.extras.len()
            )));
        }
        Ok(())
    }

    fn expect_layout(&self, extras: usize) -> Result<()> {
        self.expect_extras(extras)?;
        if !self.value.is_empty() {
            return Err(McError::Protocol(format!(
                "{:?}: unexpected value of {} bytes",
                self.opcode,
                self.value.len()
            )));
        }
        Ok(())
    }
}
