use chrono::{TimeZone, Timelike, Utc};
use courier_scheduler::CronScheduler;

#[test]
fn test_cron_scheduler_creation() {
    assert!(CronScheduler::new("0 0 0 * * *", chrono_tz::UTC).is_ok());
    assert!(CronScheduler::new("*/5 * * * *", chrono_tz::UTC).is_ok());
    assert!(CronScheduler::new("invalid", chrono_tz::UTC).is_err());
}

#[test]
fn test_five_field_expression_fires_on_the_minute() {
    let scheduler = CronScheduler::new("*/15 * * * *", chrono_tz::UTC).unwrap();
    assert_eq!(scheduler.expression(), "0 */15 * * * *");

    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 7, 30).unwrap();
    let next = scheduler.next_after(now).unwrap();
    assert_eq!(next.minute(), 15);
    assert_eq!(next.second(), 0);
}

#[test]
fn test_upcoming_times_follow_utc_offset_change() {
    // 伦敦 2024-03-31 01:00 UTC 起进入夏令时
    let scheduler = CronScheduler::new("0 0 9 * * *", chrono_tz::Europe::London).unwrap();
    let from = Utc.with_ymd_and_hms(2024, 3, 30, 0, 0, 0).unwrap();

    let times = scheduler.upcoming_times(from, 3);
    assert_eq!(
        times,
        vec![
            Utc.with_ymd_and_hms(2024, 3, 30, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 4, 1, 8, 0, 0).unwrap(),
        ]
    );
}

#[test]
fn test_time_until_next() {
    let scheduler = CronScheduler::new("0 0 * * * *", chrono_tz::UTC).unwrap();
    let now = Utc.with_ymd_and_hms(2024, 1, 1, 12, 59, 0).unwrap();

    assert_eq!(
        scheduler.time_until_next(now),
        Some(std::time::Duration::from_secs(60))
    );
}

#[test]
fn test_validate_cron_expression() {
    assert!(CronScheduler::validate_cron_expression("0 0 0 * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 */5 * * * *").is_ok());
    assert!(CronScheduler::validate_cron_expression("0 0 9-17 * * 1-5").is_ok());
    assert!(CronScheduler::validate_cron_expression("invalid").is_err());
    assert!(CronScheduler::validate_cron_expression("0 0 0 32 * *").is_err());
    assert!(CronScheduler::validate_cron_expression("").is_err());
}
