//! Recurring job schedules
//!
//! Pure functions from a schedule and the current time to the next run time.
//! The coordinator stores the result as a job's `next_scheduled_run` and
//! compares it against wall-clock time when polling.

use crate::config::{Frequency, ScheduleConfig};
use crate::storage::parse_db_timestamp;
use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};

/// Computes the first run strictly after `after`
///
/// Runs start on the hour (`hour:00:00` UTC). Weekly schedules default to
/// Sunday and monthly schedules to the 1st; a day of month past the end of a
/// month runs on that month's last day.
///
/// # Example
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use lantern_crawl::config::{Frequency, ScheduleConfig};
/// use lantern_crawl::schedule::next_run;
///
/// let schedule = ScheduleConfig {
///     frequency: Frequency::Daily,
///     hour: 6,
///     day_of_week: None,
///     day_of_month: None,
/// };
/// let now = Utc.with_ymd_and_hms(2024, 3, 10, 8, 30, 0).unwrap();
/// assert_eq!(
///     next_run(&schedule, now),
///     Some(Utc.with_ymd_and_hms(2024, 3, 11, 6, 0, 0).unwrap())
/// );
/// ```
pub fn next_run(schedule: &ScheduleConfig, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let hour = schedule.hour.min(23);
    let today = after.date_naive();

    match schedule.frequency {
        Frequency::Daily => (0..=1)
            .filter_map(|offset| at_hour(today + Duration::days(offset), hour))
            .find(|candidate| *candidate > after),

        Frequency::Weekly => {
            let target = schedule.day_of_week.unwrap_or(0) % 7;
            (0..=7)
                .map(|offset| today + Duration::days(offset))
                .filter(|date| date.weekday().num_days_from_sunday() == target)
                .filter_map(|date| at_hour(date, hour))
                .find(|candidate| *candidate > after)
        }

        Frequency::Monthly => {
            let day = schedule.day_of_month.unwrap_or(1).clamp(1, 31);
            let (mut year, mut month) = (today.year(), today.month());
            for _ in 0..2 {
                let date = clamped_date(year, month, day)?;
                if let Some(candidate) = at_hour(date, hour).filter(|c| *c > after) {
                    return Some(candidate);
                }
                (year, month) = if month == 12 {
                    (year + 1, 1)
                } else {
                    (year, month + 1)
                };
            }
            None
        }
    }
}

/// Whether a stored `next_scheduled_run` has been reached
pub fn is_due(next_scheduled_run: Option<&str>, now: DateTime<Utc>) -> bool {
    next_scheduled_run
        .and_then(parse_db_timestamp)
        .is_some_and(|next| next <= now)
}

fn at_hour(date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    Utc.with_ymd_and_hms(date.year(), date.month(), date.day(), hour, 0, 0)
        .single()
}

/// `day` in the given month, or the month's last day if it is shorter
fn clamped_date(year: i32, month: u32, day: u32) -> Option<NaiveDate> {
    let first_of_next = if month == 12 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    };
    let last_day = (first_of_next - Duration::days(1)).day();
    NaiveDate::from_ymd_opt(year, month, day.min(last_day))
}
