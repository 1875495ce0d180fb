//! Command Tests
//!
//! Tests for expiry conversion, command metadata, status mapping and
//! request frame validation.

use std::time::{Duration, UNIX_EPOCH};

use bytes::Bytes;
use atlasmc::McError;
use atlasmc::protocol::{
    Command, Counter, Expiry, Opcode, RequestFrame, ResponseFrame, Status,
    RELATIVE_EXPIRY_LIMIT,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn request(opcode: Opcode, extras: &[u8], value: &[u8]) -> RequestFrame {
    RequestFrame {
        opcode,
        vbucket: 0,
        opaque: 0,
        cas: 0,
        extras: Bytes::copy_from_slice(extras),
        key: Bytes::from_static(b"k"),
        value: Bytes::copy_from_slice(value),
    }
}

// =============================================================================
// Expiry Tests
// =============================================================================

#[test]
fn test_expiry_never_is_zero() {
    assert_eq!(Expiry::Never.to_wire(), 0);
    assert_eq!(Expiry::default(), Expiry::Never);
}

#[test]
fn test_expiry_from_seconds() {
    assert_eq!(Expiry::from(0), Expiry::Never);
    assert_eq!(Expiry::from(60), Expiry::Seconds(60));
    assert_eq!(Expiry::Seconds(60).to_wire(), 60);
}

#[test]
fn test_expiry_after_rounds_up() {
    let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    assert_eq!(Expiry::After(Duration::from_millis(1500)).to_wire_at(now), 2);
    assert_eq!(Expiry::After(Duration::from_secs(10)).to_wire_at(now), 10);
    // Zero would mean "never"
    assert_eq!(Expiry::After(Duration::ZERO).to_wire_at(now), 1);
}

#[test]
fn test_expiry_after_long_lifetime_becomes_absolute() {
    let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    let lifetime = Duration::from_secs(RELATIVE_EXPIRY_LIMIT as u64 + 10);

    let wire = Expiry::After(lifetime).to_wire_at(now);

    assert_eq!(wire as u64, 1_700_000_000 + RELATIVE_EXPIRY_LIMIT as u64 + 10);
}

#[test]
fn test_expiry_after_huge_lifetime_saturates() {
    let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);

    let wire = Expiry::After(Duration::MAX).to_wire_at(now);

    // Far future, never 0 ("no expiry")
    assert_eq!(wire, u32::MAX - 1);
}

#[test]
fn test_expiry_at_uses_unix_time() {
    let at = UNIX_EPOCH + Duration::from_secs(1_800_000_000);

    assert_eq!(Expiry::At(at).to_wire(), 1_800_000_000);
}

#[test]
fn test_expiry_at_in_distant_past_stays_absolute() {
    // A tiny timestamp would otherwise be read as a relative lifetime
    let at = UNIX_EPOCH + Duration::from_secs(5);

    assert_eq!(Expiry::At(at).to_wire(), RELATIVE_EXPIRY_LIMIT + 1);
}

// =============================================================================
// Command Metadata Tests
// =============================================================================

#[test]
fn test_command_opcode_and_key() {
    let counter = Counter {
        key: Bytes::from_static(b"n"),
        delta: 1,
        initial: None,
    };

    let get = Command::Get { key: Bytes::from_static(b"g") };
    assert_eq!(get.opcode(), Opcode::Get);
    assert_eq!(get.key(), b"g");

    let incr = Command::Increment(counter.clone());
    assert_eq!(incr.opcode(), Opcode::Increment);
    assert_eq!(incr.key(), b"n");

    assert_eq!(Command::Decrement(counter).opcode(), Opcode::Decrement);
}

#[test]
fn test_opcode_from_u8() {
    assert_eq!(Opcode::from_u8(0x00), Some(Opcode::Get));
    assert_eq!(Opcode::from_u8(0x04), Some(Opcode::Delete));
    assert_eq!(Opcode::from_u8(0x06), Some(Opcode::Decrement));
    assert_eq!(Opcode::from_u8(0x02), None);
}

// =============================================================================
// Status Tests
// =============================================================================

#[test]
fn test_status_codes() {
    for code in [0x0000u16, 0x0001, 0x0002, 0x0005, 0x0006, 0x0081, 0x0086] {
        assert_eq!(Status::from_u16(code).code(), code);
    }
    assert!(Status::NoError.is_success());
    assert!(!Status::KeyNotFound.is_success());
}

#[test]
fn test_status_text() {
    assert_eq!(Status::KeyNotFound.as_str(), "Not found");
    assert_eq!(Status::KeyExists.as_str(), "Key exists");
}

// =============================================================================
// Response Accessor Tests
// =============================================================================

#[test]
fn test_counter_value_requires_eight_bytes() {
    let mut frame = ResponseFrame::new(Opcode::Increment, Status::NoError, 0);
    frame.value = Bytes::from_static(b"145");

    assert!(matches!(frame.counter_value(), Err(McError::Protocol(_))));
}

#[test]
fn test_flags_missing_without_extras() {
    let frame = ResponseFrame::new(Opcode::Get, Status::NoError, 0);

    assert_eq!(frame.flags(), None);
}

// =============================================================================
// Request Frame Validation Tests
// =============================================================================

#[test]
fn test_to_command_get() {
    let cmd = request(Opcode::Get, &[], &[]).to_command().unwrap();

    assert_eq!(cmd, Command::Get { key: Bytes::from_static(b"k") });
}

#[test]
fn test_to_command_rejects_get_with_extras() {
    let err = request(Opcode::Get, &[0; 4], &[]).to_command().unwrap_err();

    assert!(matches!(err, McError::Protocol(_)));
}

#[test]
fn test_to_command_rejects_delete_with_value() {
    let err = request(Opcode::Delete, &[], b"oops").to_command().unwrap_err();

    assert!(matches!(err, McError::Protocol(_)));
}

#[test]
fn test_to_command_rejects_short_set_extras() {
    let err = request(Opcode::Set, &[0; 4], b"v").to_command().unwrap_err();

    assert!(matches!(err, McError::Protocol(_)));
}

#[test]
fn test_to_command_counter_with_initial() {
    let mut extras = Vec::new();
    extras.extend_from_slice(&3u64.to_be_bytes());
    extras.extend_from_slice(&50u64.to_be_bytes());
    extras.extend_from_slice(&0u32.to_be_bytes());

    let cmd = request(Opcode::Increment, &extras, &[]).to_command().unwrap();

    match cmd {
        Command::Increment(counter) => {
            assert_eq!(counter.delta, 3);
            assert_eq!(counter.initial, Some((50, Expiry::Never)));
        }
        other => panic!("Expected INCREMENT command, got {:?}", other),
    }
}

// =============================================================================
// Frame Limit Tests
// =============================================================================

#[test]
fn test_frame_limits_on_key_length() {
    let fits = Command::Get {
        key: Bytes::from(vec![b'k'; u16::MAX as usize]),
    };
    let too_long = Command::Delete {
        key: Bytes::from(vec![b'k'; u16::MAX as usize + 1]),
    };
    let empty = Command::Get { key: Bytes::new() };

    assert!(fits.check_frame_limits().is_ok());
    assert!(matches!(
        too_long.check_frame_limits(),
        Err(McError::InvalidArgument(_))
    ));
    assert!(matches!(
        empty.check_frame_limits(),
        Err(McError::InvalidArgument(_))
    ));
}
