//! Tests for reconnect backoff

use std::time::Duration;

use atlasmc::network::Backoff;

// =============================================================================
// Growth Tests
// =============================================================================

#[test]
fn test_ceiling_doubles_until_cap() {
    let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(700));

    let mut ceilings = Vec::new();
    for _ in 0..5 {
        ceilings.push(backoff.ceiling());
        backoff.next_delay();
    }

    assert_eq!(
        ceilings,
        vec![
            Duration::from_millis(100),
            Duration::from_millis(200),
            Duration::from_millis(400),
            Duration::from_millis(700),
            Duration::from_millis(700),
        ]
    );
}

#[test]
fn test_many_attempts_do_not_overflow() {
    let mut backoff = Backoff::new(Duration::from_secs(1), Duration::from_secs(30));
    for _ in 0..200 {
        backoff.next_delay();
    }

    assert_eq!(backoff.ceiling(), Duration::from_secs(30));
    assert_eq!(backoff.attempts(), 200);
}

// =============================================================================
// Jitter Tests
// =============================================================================

#[test]
fn test_delay_within_jitter_window() {
    for _ in 0..100 {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_secs(10));
        backoff.next_delay();
        backoff.next_delay();
        // Third attempt: ceiling 400ms
        let delay = backoff.next_delay();

        assert!(delay >= Duration::from_millis(200), "{:?}", delay);
        assert!(delay <= Duration::from_millis(400), "{:?}", delay);
    }
}

#[test]
fn test_zero_initial_gives_zero_delay() {
    let mut backoff = Backoff::new(Duration::ZERO, Duration::ZERO);

    assert_eq!(backoff.next_delay(), Duration::ZERO);
}

// =============================================================================
// Reset Tests
// =============================================================================

#[test]
fn test_reset_restarts_growth() {
    let mut backoff = Backoff::new(Duration::from_millis(50), Duration::from_secs(1));
    backoff.next_delay();
    backoff.next_delay();
    assert_eq!(backoff.attempts(), 2);

    backoff.reset();

    assert_eq!(backoff.attempts(), 0);
    assert_eq!(backoff.ceiling(), Duration::from_millis(50));
}

#[test]
fn test_max_below_initial_is_raised() {
    let backoff = Backoff::new(Duration::from_secs(2), Duration::from_secs(1));

    assert_eq!(backoff.ceiling(), Duration::from_secs(2));
}
