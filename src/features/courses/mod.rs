//! # Feature: Course Cache
//!
//! Per-user, per-day lazily computed list of class meetings, derived from
//! the persisted course rows filtered by the active term and the school's
//! current teaching week. Entries are invalidated wholesale whenever the
//! underlying rows, the week counter or the school timetable change.

use crate::database::Database;
use crate::features::clock::TimeProvider;
use dashmap::DashMap;
use log::{debug, warn};
use std::sync::Arc;

/// One class meeting on a concrete day, ordered by `start_section`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseMeeting {
    pub course_name: String,
    pub teacher_name: String,
    pub locale: String,
    pub start_section: i64,
    pub end_section: i64,
}

struct CachedCourses {
    day_of_week: i64,
    semester: i64,
    begin_year: i64,
    meetings: Vec<CourseMeeting>,
}

pub struct CourseCache {
    db: Database,
    time: Arc<TimeProvider>,
    cache: DashMap<i64, CachedCourses>,
}

impl CourseCache {
    pub fn new(db: Database, time: Arc<TimeProvider>) -> Self {
        CourseCache {
            db,
            time,
            cache: DashMap::new(),
        }
    }

    /// Meetings of one user on `day_of_week` (1-7; values above 7 mean that
    /// day of the *next* week, used by "tomorrow" queries late on Sunday).
    /// Returns an empty list when the school's current week is unknown.
    pub fn get(&self, user_id: i64, school_id: i64, day_of_week: i64) -> Vec<CourseMeeting> {
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();

        if let Some(entry) = self.cache.get(&user_id) {
            if entry.day_of_week == day_of_week
                && entry.semester == semester
                && entry.begin_year == begin_year
            {
                return entry.meetings.clone();
            }
        }

        let meetings = self.compute(user_id, school_id, day_of_week, semester, begin_year);
        self.cache.insert(
            user_id,
            CachedCourses {
                day_of_week,
                semester,
                begin_year,
                meetings: meetings.clone(),
            },
        );
        meetings
    }

    /// Drop the cached entry of a user, forcing recomputation on next `get`.
    pub fn invalidate(&self, user_id: i64) {
        if self.cache.remove(&user_id).is_some() {
            debug!("Invalidated course cache for user {}.", user_id);
        }
    }

    fn compute(
        &self,
        user_id: i64,
        school_id: i64,
        day_of_week: i64,
        semester: i64,
        begin_year: i64,
    ) -> Vec<CourseMeeting> {
        let (day, week_bump) = if day_of_week > 7 {
            (day_of_week - 7, 1)
        } else {
            (day_of_week, 0)
        };

        let week = match self.time.current_week_of(school_id) {
            Some(week) => week + week_bump,
            None => {
                debug!(
                    "Week of school {} is unknown; user {} gets an empty course list.",
                    school_id, user_id
                );
                return Vec::new();
            }
        };

        let rows = match self.db.courses_for_day(user_id, semester, begin_year, day) {
            Ok(rows) => rows,
            Err(err) => {
                warn!("Failed to load courses of user {}: {}", user_id, err);
                return Vec::new();
            }
        };

        let mut meetings: Vec<CourseMeeting> = rows
            .into_iter()
            .filter(|row| {
                row.weeks
                    .split_whitespace()
                    .any(|w| w.parse::<i64>() == Ok(week))
            })
            .map(|row| CourseMeeting {
                course_name: row.course_name,
                teacher_name: row.teacher_name,
                locale: row.locale,
                start_section: row.section_start,
                end_section: row.section_end,
            })
            .collect();
        meetings.sort_by_key(|meeting| meeting.start_section);
        meetings
    }
}
