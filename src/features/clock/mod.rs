//! # Feature: Clock/Calendar Provider
//!
//! Derives the current academic year, semester and per-school teaching week
//! from wall-clock time and the persisted week anchors. The whole system
//! runs in one fixed timezone; every time read goes through the [`Clock`]
//! trait so tests can pin the clock.
//!
//! Semester and begin-year are pure functions of the current date. The only
//! mutable state is the school -> week map, refreshed by
//! [`TimeProvider::recompute_weeks`] on the weekly/daily calendar triggers
//! and synchronously after any week or timetable mutation.

use crate::database::Database;
use anyhow::{Context, Result};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Timelike, Utc};
use dashmap::DashMap;
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

/// Source of "now" in the application's fixed timezone.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<FixedOffset>;
}

/// Production clock: wall time shifted into the configured offset.
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(utc_offset_hours: i32) -> Result<Self> {
        let offset = FixedOffset::east_opt(utc_offset_hours * 3600)
            .context("utc offset out of range")?;
        Ok(SystemClock { offset })
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<FixedOffset> {
        Utc::now().with_timezone(&self.offset)
    }
}

/// Settable clock for tests and local tooling.
pub struct MockClock {
    now: std::sync::Mutex<DateTime<FixedOffset>>,
}

impl MockClock {
    pub fn at(now: DateTime<FixedOffset>) -> Self {
        MockClock {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<FixedOffset>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<FixedOffset> {
        self.now
            .lock()
            .map(|guard| *guard)
            .unwrap_or_else(|poisoned| *poisoned.into_inner())
    }
}

/// Fall semester (September through mid-February).
pub const SEMESTER_FALL: i64 = 1;
/// Spring semester (mid-February through August).
pub const SEMESTER_SPRING: i64 = 2;

/// Semester for a calendar date: March-August is spring, September-January
/// is fall, February splits on the 15th.
pub fn semester_of(date: NaiveDate) -> i64 {
    match date.month() {
        3..=8 => SEMESTER_SPRING,
        2 => {
            if date.day() < 15 {
                SEMESTER_FALL
            } else {
                SEMESTER_SPRING
            }
        }
        _ => SEMESTER_FALL,
    }
}

/// The academic year a date belongs to, named by the year it began in.
/// January through August still belong to the previous year's academic year.
pub fn begin_year_of(date: NaiveDate) -> i64 {
    if (1..=8).contains(&date.month()) {
        date.year() as i64 - 1
    } else {
        date.year() as i64
    }
}

/// Clock/calendar provider with the per-school week counter cache.
pub struct TimeProvider {
    clock: Arc<dyn Clock>,
    db: Database,
    weeks: DashMap<i64, i64>,
}

impl TimeProvider {
    pub fn new(clock: Arc<dyn Clock>, db: Database) -> Self {
        TimeProvider {
            clock,
            db,
            weeks: DashMap::new(),
        }
    }

    pub fn now(&self) -> DateTime<FixedOffset> {
        self.clock.now()
    }

    pub fn today(&self) -> NaiveDate {
        self.clock.now().date_naive()
    }

    pub fn current_semester(&self) -> i64 {
        semester_of(self.today())
    }

    pub fn current_semester_begin_year(&self) -> i64 {
        begin_year_of(self.today())
    }

    /// Current teaching week of a school, or `None` when the school has no
    /// timetable row for the active term (week unknown).
    pub fn current_week_of(&self, school_id: i64) -> Option<i64> {
        self.weeks.get(&school_id).map(|entry| *entry)
    }

    /// Recompute the week counter of every school with a timetable row for
    /// the active term. Callers that just mutated an anchor must await this
    /// before rescheduling, downstream reads depend on freshness.
    pub fn recompute_weeks(&self) -> Result<()> {
        let today = self.today();
        let rows = self
            .db
            .timetables_for_term(self.current_semester(), self.current_semester_begin_year())?;
        for row in rows {
            let anchor = match NaiveDate::parse_from_str(&row.anchor_date, "%Y-%m-%d") {
                Ok(date) => date,
                Err(err) => {
                    warn!(
                        "Skipping week recomputation for school {}: bad anchor date {:?}: {}",
                        row.school_id, row.anchor_date, err
                    );
                    continue;
                }
            };
            let week = week_from_anchor(anchor, row.anchor_week, today);
            self.weeks.insert(row.school_id, week);
        }
        Ok(())
    }

    /// Drop the week counter of a school whose timetable has been deleted.
    pub fn forget_school(&self, school_id: i64) {
        self.weeks.remove(&school_id);
    }
}

/// Week number at `today`, given the anchor date and the week that was
/// current on the anchor date. The counter advances every Monday: with
/// `d = anchor weekday + days since anchor`, the increment is zero while
/// `d` stays within the anchor's week and `d / 7` afterwards.
fn week_from_anchor(anchor: NaiveDate, anchor_week: i64, today: NaiveDate) -> i64 {
    let days_since = (today - anchor).num_days();
    let d = anchor.weekday().number_from_monday() as i64 + days_since;
    let delta = if d <= 7 { 0 } else { d / 7 };
    anchor_week + delta
}

/// Spawn the calendar-driven maintenance loops:
/// - daily at 00:00:30 local: recompute weeks, then rebuild every user's
///   course cache and notification timer from scratch,
/// - weekly on Monday 00:00:10 local: recompute weeks.
///
/// The daily redistribution is a defensive resync against clock drift and
/// missed timer events over long uptimes.
pub fn spawn_calendar_jobs(
    time: Arc<TimeProvider>,
    scheduler: crate::features::notifier::NotificationScheduler,
) -> Vec<tokio::task::JoinHandle<()>> {
    let daily_time = Arc::clone(&time);
    let daily = tokio::spawn(async move {
        loop {
            let wait = seconds_until_daily(daily_time.now(), 0, 0, 30);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            if let Err(err) = daily_time.recompute_weeks() {
                warn!("Daily week recomputation failed: {}", err);
            }
            scheduler.redistribute_all().await;
            info!("Daily notification redistribution executed.");
        }
    });

    let weekly_time = Arc::clone(&time);
    let weekly = tokio::spawn(async move {
        loop {
            let wait = seconds_until_weekly(weekly_time.now(), chrono::Weekday::Mon, 0, 0, 10);
            tokio::time::sleep(Duration::from_secs(wait)).await;
            if let Err(err) = weekly_time.recompute_weeks() {
                warn!("Weekly week recomputation failed: {}", err);
            }
            info!("Weekly school week counters refreshed.");
        }
    });

    vec![daily, weekly]
}

/// Seconds until the next local occurrence of `hh:mm:ss`.
fn seconds_until_daily(now: DateTime<FixedOffset>, hh: u32, mm: u32, ss: u32) -> u64 {
    let target_secs = (hh * 3600 + mm * 60 + ss) as i64;
    let now_secs = now.num_seconds_from_midnight() as i64;
    let mut wait = target_secs - now_secs;
    if wait <= 0 {
        wait += 86_400;
    }
    wait as u64
}

/// Seconds until the next local occurrence of `weekday hh:mm:ss`.
fn seconds_until_weekly(
    now: DateTime<FixedOffset>,
    weekday: chrono::Weekday,
    hh: u32,
    mm: u32,
    ss: u32,
) -> u64 {
    let days_ahead = (7 + weekday.num_days_from_monday() as i64
        - now.weekday().num_days_from_monday() as i64)
        % 7;
    let target_secs = (hh * 3600 + mm * 60 + ss) as i64;
    let now_secs = now.num_seconds_from_midnight() as i64;
    let mut wait = days_ahead * 86_400 + target_secs - now_secs;
    if wait <= 0 {
        wait += 7 * 86_400;
    }
    wait as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TimetableRow;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn fixed_clock(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> Arc<MockClock> {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        Arc::new(MockClock::at(
            offset.with_ymd_and_hms(y, m, d, hh, mm, 0).unwrap(),
        ))
    }

    #[test]
    fn test_semester_boundaries() {
        assert_eq!(semester_of(date(2025, 9, 1)), SEMESTER_FALL);
        assert_eq!(semester_of(date(2025, 12, 31)), SEMESTER_FALL);
        assert_eq!(semester_of(date(2026, 1, 15)), SEMESTER_FALL);
        assert_eq!(semester_of(date(2026, 2, 14)), SEMESTER_FALL);
        assert_eq!(semester_of(date(2026, 2, 15)), SEMESTER_SPRING);
        assert_eq!(semester_of(date(2026, 3, 1)), SEMESTER_SPRING);
        assert_eq!(semester_of(date(2026, 8, 31)), SEMESTER_SPRING);
    }

    #[test]
    fn test_begin_year() {
        assert_eq!(begin_year_of(date(2025, 9, 1)), 2025);
        assert_eq!(begin_year_of(date(2025, 12, 31)), 2025);
        assert_eq!(begin_year_of(date(2026, 1, 2)), 2025);
        assert_eq!(begin_year_of(date(2026, 8, 31)), 2025);
        assert_eq!(begin_year_of(date(2026, 9, 1)), 2026);
    }

    #[test]
    fn test_week_from_anchor_same_week() {
        // anchored on a Monday, still the same week until next Monday
        let anchor = date(2025, 9, 1); // Monday
        assert_eq!(week_from_anchor(anchor, 1, anchor), 1);
        assert_eq!(week_from_anchor(anchor, 1, date(2025, 9, 7)), 1);
        assert_eq!(week_from_anchor(anchor, 1, date(2025, 9, 8)), 2);
        assert_eq!(week_from_anchor(anchor, 1, date(2025, 9, 15)), 3);
    }

    #[test]
    fn test_week_from_anchor_mid_week() {
        // anchored on a Thursday: the counter bumps on the following Monday
        let anchor = date(2025, 9, 4); // Thursday, dow 4
        assert_eq!(week_from_anchor(anchor, 3, date(2025, 9, 5)), 3);
        assert_eq!(week_from_anchor(anchor, 3, date(2025, 9, 7)), 3);
        assert_eq!(week_from_anchor(anchor, 3, date(2025, 9, 8)), 4);
    }

    #[test]
    fn test_recompute_weeks_and_unknown_school() {
        let db = Database::in_memory().unwrap();
        db.insert_timetable(&TimetableRow {
            school_id: 42,
            school_name: "Test University".to_string(),
            begin_year: 2025,
            semester: 1,
            periods: "08:00-08:45".to_string(),
            anchor_date: "2025-09-01".to_string(),
            anchor_week: 1,
        })
        .unwrap();

        let time = TimeProvider::new(fixed_clock(2025, 9, 10, 12, 0), db);
        assert_eq!(time.current_week_of(42), None);

        time.recompute_weeks().unwrap();
        assert_eq!(time.current_week_of(42), Some(2));
        assert_eq!(time.current_week_of(999), None);

        time.forget_school(42);
        assert_eq!(time.current_week_of(42), None);
    }

    #[test]
    fn test_recompute_skips_bad_anchor_dates() {
        let db = Database::in_memory().unwrap();
        db.insert_timetable(&TimetableRow {
            school_id: 42,
            school_name: "Test University".to_string(),
            begin_year: 2025,
            semester: 1,
            periods: "08:00-08:45".to_string(),
            anchor_date: "never".to_string(),
            anchor_week: 1,
        })
        .unwrap();

        let time = TimeProvider::new(fixed_clock(2025, 9, 10, 12, 0), db);
        time.recompute_weeks().unwrap();
        assert_eq!(time.current_week_of(42), None);
    }

    #[test]
    fn test_seconds_until_daily() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = offset.with_ymd_and_hms(2025, 9, 1, 23, 59, 0).unwrap();
        assert_eq!(seconds_until_daily(now, 0, 0, 30), 90);

        let just_past = offset.with_ymd_and_hms(2025, 9, 1, 0, 0, 31).unwrap();
        assert_eq!(seconds_until_daily(just_past, 0, 0, 30), 86_399);
    }

    #[test]
    fn test_seconds_until_weekly() {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        // Sunday 23:59:00 -> Monday 00:00:10 is 70 seconds away
        let now = offset.with_ymd_and_hms(2025, 9, 7, 23, 59, 0).unwrap();
        assert_eq!(seconds_until_weekly(now, chrono::Weekday::Mon, 0, 0, 10), 70);

        // Monday just past the trigger waits a whole week
        let now = offset.with_ymd_and_hms(2025, 9, 8, 0, 0, 11).unwrap();
        assert_eq!(
            seconds_until_weekly(now, chrono::Weekday::Mon, 0, 0, 10),
            7 * 86_400 - 1
        );
    }
}
