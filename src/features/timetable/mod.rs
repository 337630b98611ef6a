//! # Feature: Bell Schedule Cache
//!
//! Per-school cache of the section start/end offsets, in minutes from
//! midnight. The persisted encoding is `"HH:MM-HH:MM|HH:MM-HH:MM|..."`,
//! ordered by section, 24-hour clock. Entries are memoized per (school,
//! semester, year) and dropped wholesale on invalidation, never patched.

use crate::database::Database;
use crate::features::clock::TimeProvider;
use anyhow::{bail, Context, Result};
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

/// (start, end) minute offsets of one section.
pub type Period = (i64, i64);

struct CachedBells {
    semester: i64,
    begin_year: i64,
    periods: Vec<Period>,
}

pub struct BellScheduleCache {
    db: Database,
    time: Arc<TimeProvider>,
    cache: DashMap<i64, CachedBells>,
}

impl BellScheduleCache {
    pub fn new(db: Database, time: Arc<TimeProvider>) -> Self {
        BellScheduleCache {
            db,
            time,
            cache: DashMap::new(),
        }
    }

    /// Bell schedule of a school for the active term. Returns an empty list
    /// when the school has no timetable row or the stored string is
    /// malformed; callers treat both as "schedule absent".
    pub fn get(&self, school_id: i64) -> Vec<Period> {
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();

        if let Some(entry) = self.cache.get(&school_id) {
            if entry.semester == semester && entry.begin_year == begin_year {
                return entry.periods.clone();
            }
        }

        let row = match self.db.timetable(school_id, semester, begin_year) {
            Ok(Some(row)) => row,
            Ok(None) => {
                warn!(
                    "Timetable in {}:{} of school {} is not found.",
                    begin_year, semester, school_id
                );
                return Vec::new();
            }
            Err(err) => {
                warn!("Failed to load timetable of school {}: {}", school_id, err);
                return Vec::new();
            }
        };

        match parse_periods(&row.periods) {
            Ok(periods) => {
                debug!(
                    "Cached bell schedule for school {} ({} sections).",
                    school_id,
                    periods.len()
                );
                self.cache.insert(
                    school_id,
                    CachedBells {
                        semester,
                        begin_year,
                        periods: periods.clone(),
                    },
                );
                periods
            }
            Err(err) => {
                warn!(
                    "Malformed bell schedule for school {}: {}; treating as absent.",
                    school_id, err
                );
                Vec::new()
            }
        }
    }

    /// Drop the cached entry of a school, forcing a reload on the next `get`.
    pub fn invalidate(&self, school_id: i64) {
        if self.cache.remove(&school_id).is_some() {
            debug!("Invalidated bell schedule cache for school {}.", school_id);
        }
    }
}

/// Parse the pipe-delimited period string into minute offsets.
pub fn parse_periods(raw: &str) -> Result<Vec<Period>> {
    raw.split('|')
        .map(|segment| {
            let (start, end) = segment
                .split_once('-')
                .with_context(|| format!("period {:?} has no '-' separator", segment))?;
            Ok((parse_hhmm(start)?, parse_hhmm(end)?))
        })
        .collect()
}

/// Inverse of [`parse_periods`].
pub fn encode_periods(periods: &[Period]) -> String {
    periods
        .iter()
        .map(|&(start, end)| {
            format!(
                "{:02}:{:02}-{:02}:{:02}",
                start / 60,
                start % 60,
                end / 60,
                end % 60
            )
        })
        .collect::<Vec<_>>()
        .join("|")
}

fn parse_hhmm(stamp: &str) -> Result<i64> {
    let (hour, minute) = stamp
        .trim()
        .split_once(':')
        .with_context(|| format!("time {:?} has no ':' separator", stamp))?;
    let hour: i64 = hour.parse().with_context(|| format!("bad hour in {:?}", stamp))?;
    let minute: i64 = minute
        .parse()
        .with_context(|| format!("bad minute in {:?}", stamp))?;
    if hour >= 24 || minute >= 60 {
        bail!("time {:?} out of range", stamp);
    }
    Ok(hour * 60 + minute)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::TimetableRow;
    use crate::features::clock::MockClock;
    use chrono::{FixedOffset, TimeZone};

    fn fall_2025_cache(db: Database) -> BellScheduleCache {
        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let clock = Arc::new(MockClock::at(
            offset.with_ymd_and_hms(2025, 9, 10, 7, 30, 0).unwrap(),
        ));
        let time = Arc::new(TimeProvider::new(clock, db.clone()));
        BellScheduleCache::new(db, time)
    }

    fn timetable(school_id: i64, periods: &str) -> TimetableRow {
        TimetableRow {
            school_id,
            school_name: "Test University".to_string(),
            begin_year: 2025,
            semester: 1,
            periods: periods.to_string(),
            anchor_date: "2025-09-01".to_string(),
            anchor_week: 1,
        }
    }

    #[test]
    fn test_parse_periods() {
        let periods = parse_periods("08:00-08:45|08:55-09:40").unwrap();
        assert_eq!(periods, vec![(480, 525), (535, 580)]);
    }

    #[test]
    fn test_parse_full_day_string() {
        // every pipe segment yields one pair, all offsets within a day
        let raw = "08:10-08:55|09:05-09:50|10:10-10:55|11:05-11:50|14:00-14:45|\
                   14:55-15:40|16:00-16:45|16:55-17:40|19:00-19:45|19:55-20:40|20:50-21:35";
        let periods = parse_periods(raw).unwrap();
        assert_eq!(periods.len(), raw.split('|').count());
        for (start, end) in periods {
            assert!((0..1440).contains(&start));
            assert!((0..1440).contains(&end));
        }
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(parse_periods("08:00").is_err());
        assert!(parse_periods("08:00-").is_err());
        assert!(parse_periods("8h00-8h45").is_err());
        assert!(parse_periods("25:00-26:00").is_err());
        assert!(parse_periods("08:61-09:00").is_err());
    }

    #[test]
    fn test_encode_parse_roundtrip() {
        let periods = vec![(480, 525), (535, 580), (1250, 1295)];
        assert_eq!(parse_periods(&encode_periods(&periods)).unwrap(), periods);
        // and string-side
        let raw = "08:00-08:45|20:50-21:35";
        assert_eq!(encode_periods(&parse_periods(raw).unwrap()), raw);
    }

    #[test]
    fn test_get_memoizes_and_invalidates() {
        let db = Database::in_memory().unwrap();
        db.insert_timetable(&timetable(42, "08:00-08:45")).unwrap();
        let cache = fall_2025_cache(db.clone());

        assert_eq!(cache.get(42), vec![(480, 525)]);

        // a DB update is invisible until invalidation
        db.update_timetable_periods(42, 1, 2025, "09:00-09:45").unwrap();
        assert_eq!(cache.get(42), vec![(480, 525)]);
        cache.invalidate(42);
        assert_eq!(cache.get(42), vec![(540, 585)]);
    }

    #[test]
    fn test_get_missing_or_malformed_is_empty() {
        let db = Database::in_memory().unwrap();
        db.insert_timetable(&timetable(7, "garbage")).unwrap();
        let cache = fall_2025_cache(db);

        assert!(cache.get(42).is_empty()); // no row at all
        assert!(cache.get(7).is_empty()); // malformed row
    }
}
