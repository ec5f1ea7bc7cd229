//! Integration tests for vigor-cron

use chrono::{TimeZone, Utc};
use std::time::Duration;
use vigor_cron::*;

#[test]
fn test_cron_expression_parsing() {
    assert!(CronExpression::parse("0 0 * * * *").is_ok());
    assert!(CronExpression::parse("invalid").is_err());
}

#[test]
fn test_cron_error_display() {
    let err = CronExpression::parse("bad cron").unwrap_err();
    assert!(err.to_string().contains("bad cron"));
}

#[test]
fn test_cron_rule_walks_forward() {
    let rule = Recurrence::cron(CronPresets::DAILY).unwrap();
    let start = Utc.with_ymd_and_hms(2026, 1, 30, 12, 0, 0).unwrap();

    let first = rule.first_run(start).unwrap();
    let second = rule.next_firing(first, first).unwrap();

    assert_eq!(first, Utc.with_ymd_and_hms(2026, 1, 31, 0, 0, 0).unwrap());
    assert_eq!(second, Utc.with_ymd_and_hms(2026, 2, 1, 0, 0, 0).unwrap());
}

#[test]
fn test_periodic_rule_is_restart_stable() {
    // Two process starts computing the same firing from the same stored
    // due time agree on the next one.
    let rule = Recurrence::every(Duration::from_secs(24 * 3600));
    let due = Utc.with_ymd_and_hms(2026, 1, 1, 3, 0, 0).unwrap();
    let seen_a = due + chrono::Duration::seconds(5);
    let seen_b = due + chrono::Duration::minutes(40);

    assert_eq!(rule.next_firing(due, seen_a), rule.next_firing(due, seen_b));
}

#[test]
fn test_rules_compare_by_definition() {
    assert_eq!(Recurrence::every_ms(1000), Recurrence::every(Duration::from_secs(1)));
    assert_ne!(
        Recurrence::every_ms(1000),
        Recurrence::cron(CronPresets::EVERY_MINUTE).unwrap()
    );
}
