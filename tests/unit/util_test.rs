//! Tests for utility functions

use std::time::Duration;

use backpressure_engine::core::Priority;
use backpressure_engine::util::{now_ms, Clock, LogFormat, ManualClock};

#[test]
fn test_priority_ordering() {
    assert!(Priority::Critical > Priority::High);
    assert!(Priority::High > Priority::Normal);
    assert!(Priority::Normal > Priority::Low);
    assert_eq!(Priority::default(), Priority::Normal);
}

#[test]
fn test_manual_clock_advances() {
    let clock = ManualClock::new();
    let start = clock.now();
    clock.advance(Duration::from_millis(250));
    assert_eq!(clock.now().duration_since(start), Duration::from_millis(250));
}

#[test]
fn test_now_ms_is_wall_clock() {
    let a = now_ms();
    let b = now_ms();
    assert!(b >= a);
    assert!(a > 1_600_000_000_000);
}

#[test]
fn test_log_format_parsing() {
    assert_eq!("json".parse::<LogFormat>(), Ok(LogFormat::Json));
    assert_eq!("text".parse::<LogFormat>(), Ok(LogFormat::Pretty));
    assert!("yaml".parse::<LogFormat>().is_err());
}
