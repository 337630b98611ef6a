//! # Persistent Store
//!
//! Sqlite-backed storage for users, per-school timetables and course
//! meetings. All mutating access goes through the request serialization
//! queue, so handlers never race each other; the internal mutex only
//! protects the connection itself from concurrent read-only queries.

use anyhow::{anyhow, Result};
use sqlite::{Connection, State};
use std::sync::{Arc, Mutex};

/// A registered user.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub user_id: i64,
    pub student_id: i64,
    pub name: String,
    pub school_id: i64,
    pub account: String,
    /// Encrypted with [`crate::core::PasswordCipher`].
    pub password: String,
    /// Personal lead-time override in minutes; `None` means the global
    /// default applies.
    pub lead_minutes: Option<i64>,
}

/// One school's bell schedule and week anchor for a (year, semester).
#[derive(Debug, Clone)]
pub struct TimetableRow {
    pub school_id: i64,
    pub school_name: String,
    pub begin_year: i64,
    pub semester: i64,
    /// Pipe-delimited `HH:MM-HH:MM|...` period list, ordered by section.
    pub periods: String,
    /// ISO date on which `anchor_week` was last asserted.
    pub anchor_date: String,
    pub anchor_week: i64,
}

/// One recurring course meeting of a user.
#[derive(Debug, Clone)]
pub struct CourseRow {
    pub course_id: i64,
    pub course_name: String,
    pub teacher_name: String,
    pub locale: String,
    pub day_of_week: i64,
    pub section_start: i64,
    pub section_end: i64,
    /// Space-separated week numbers on which the meeting recurs.
    pub weeks: String,
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database file and make sure the schema exists.
    pub fn open(path: &str) -> Result<Self> {
        let conn = sqlite::open(path)?;
        let db = Database {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// An in-memory database, used by tests.
    pub fn in_memory() -> Result<Self> {
        Self::open(":memory:")
    }

    fn init_schema(&self) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "CREATE TABLE IF NOT EXISTS users (
                    user_id INTEGER PRIMARY KEY,
                    student_id INTEGER NOT NULL,
                    name TEXT NOT NULL,
                    school_id INTEGER NOT NULL,
                    account TEXT NOT NULL,
                    password TEXT NOT NULL,
                    lead_minutes INTEGER
                );
                CREATE TABLE IF NOT EXISTS school_timetables (
                    school_id INTEGER NOT NULL,
                    school_name TEXT NOT NULL,
                    begin_year INTEGER NOT NULL,
                    semester INTEGER NOT NULL,
                    periods TEXT NOT NULL,
                    anchor_date TEXT NOT NULL,
                    anchor_week INTEGER NOT NULL,
                    UNIQUE (school_id, begin_year, semester)
                );
                CREATE TABLE IF NOT EXISTS courses (
                    user_id INTEGER NOT NULL,
                    course_id INTEGER NOT NULL,
                    course_name TEXT NOT NULL,
                    teacher_name TEXT NOT NULL,
                    locale TEXT NOT NULL,
                    day_of_week INTEGER NOT NULL,
                    section_start INTEGER NOT NULL,
                    section_end INTEGER NOT NULL,
                    weeks TEXT NOT NULL,
                    begin_year INTEGER NOT NULL,
                    semester INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_courses_user
                    ON courses (user_id, begin_year, semester, day_of_week);",
            )?;
            Ok(())
        })
    }

    fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self
            .conn
            .lock()
            .map_err(|_| anyhow!("database mutex poisoned"))?;
        f(&conn)
    }

    // ---- users ----

    pub fn user(&self, user_id: i64) -> Result<Option<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, student_id, name, school_id, account, password, lead_minutes
                 FROM users WHERE user_id = ?",
            )?;
            stmt.bind((1, user_id))?;
            if stmt.next()? == State::Row {
                Ok(Some(read_user(&stmt)?))
            } else {
                Ok(None)
            }
        })
    }

    pub fn insert_user(&self, user: &UserRow) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO users (user_id, student_id, name, school_id, account, password, lead_minutes)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            stmt.bind((1, user.user_id))?;
            stmt.bind((2, user.student_id))?;
            stmt.bind((3, user.name.as_str()))?;
            stmt.bind((4, user.school_id))?;
            stmt.bind((5, user.account.as_str()))?;
            stmt.bind((6, user.password.as_str()))?;
            stmt.bind((7, user.lead_minutes))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn delete_user(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("DELETE FROM users WHERE user_id = ?")?;
            stmt.bind((1, user_id))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn update_password(&self, user_id: i64, encrypted: &str) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("UPDATE users SET password = ? WHERE user_id = ?")?;
            stmt.bind((1, encrypted))?;
            stmt.bind((2, user_id))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn update_lead_minutes(&self, user_id: i64, minutes: Option<i64>) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("UPDATE users SET lead_minutes = ? WHERE user_id = ?")?;
            stmt.bind((1, minutes))?;
            stmt.bind((2, user_id))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn users_of_school(&self, school_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, student_id, name, school_id, account, password, lead_minutes
                 FROM users WHERE school_id = ?",
            )?;
            stmt.bind((1, school_id))?;
            let mut users = Vec::new();
            while stmt.next()? == State::Row {
                users.push(read_user(&stmt)?);
            }
            Ok(users)
        })
    }

    pub fn all_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT user_id, student_id, name, school_id, account, password, lead_minutes
                 FROM users",
            )?;
            let mut users = Vec::new();
            while stmt.next()? == State::Row {
                users.push(read_user(&stmt)?);
            }
            Ok(users)
        })
    }

    pub fn school_user_count(&self, school_id: i64) -> Result<i64> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT COUNT(*) FROM users WHERE school_id = ?")?;
            stmt.bind((1, school_id))?;
            if stmt.next()? == State::Row {
                Ok(stmt.read::<i64, _>(0)?)
            } else {
                Ok(0)
            }
        })
    }

    // ---- school timetables ----

    pub fn timetable(
        &self,
        school_id: i64,
        semester: i64,
        begin_year: i64,
    ) -> Result<Option<TimetableRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT school_id, school_name, begin_year, semester, periods, anchor_date, anchor_week
                 FROM school_timetables WHERE school_id = ? AND semester = ? AND begin_year = ?",
            )?;
            stmt.bind((1, school_id))?;
            stmt.bind((2, semester))?;
            stmt.bind((3, begin_year))?;
            if stmt.next()? == State::Row {
                Ok(Some(read_timetable(&stmt)?))
            } else {
                Ok(None)
            }
        })
    }

    pub fn insert_timetable(&self, row: &TimetableRow) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "INSERT INTO school_timetables
                 (school_id, school_name, begin_year, semester, periods, anchor_date, anchor_week)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )?;
            stmt.bind((1, row.school_id))?;
            stmt.bind((2, row.school_name.as_str()))?;
            stmt.bind((3, row.begin_year))?;
            stmt.bind((4, row.semester))?;
            stmt.bind((5, row.periods.as_str()))?;
            stmt.bind((6, row.anchor_date.as_str()))?;
            stmt.bind((7, row.anchor_week))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn update_timetable_periods(
        &self,
        school_id: i64,
        semester: i64,
        begin_year: i64,
        periods: &str,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE school_timetables SET periods = ?
                 WHERE school_id = ? AND semester = ? AND begin_year = ?",
            )?;
            stmt.bind((1, periods))?;
            stmt.bind((2, school_id))?;
            stmt.bind((3, semester))?;
            stmt.bind((4, begin_year))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn update_timetable_anchor(
        &self,
        school_id: i64,
        semester: i64,
        begin_year: i64,
        anchor_date: &str,
        anchor_week: i64,
    ) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "UPDATE school_timetables SET anchor_date = ?, anchor_week = ?
                 WHERE school_id = ? AND semester = ? AND begin_year = ?",
            )?;
            stmt.bind((1, anchor_date))?;
            stmt.bind((2, anchor_week))?;
            stmt.bind((3, school_id))?;
            stmt.bind((4, semester))?;
            stmt.bind((5, begin_year))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn delete_school_timetables(&self, school_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("DELETE FROM school_timetables WHERE school_id = ?")?;
            stmt.bind((1, school_id))?;
            stmt.next()?;
            Ok(())
        })
    }

    pub fn timetables_for_term(&self, semester: i64, begin_year: i64) -> Result<Vec<TimetableRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT school_id, school_name, begin_year, semester, periods, anchor_date, anchor_week
                 FROM school_timetables WHERE semester = ? AND begin_year = ?",
            )?;
            stmt.bind((1, semester))?;
            stmt.bind((2, begin_year))?;
            let mut rows = Vec::new();
            while stmt.next()? == State::Row {
                rows.push(read_timetable(&stmt)?);
            }
            Ok(rows)
        })
    }

    // ---- courses ----

    /// Bulk-replace a user's course rows for one term. Course data is never
    /// edited row by row, every sync rewrites the whole term.
    pub fn replace_courses(
        &self,
        user_id: i64,
        semester: i64,
        begin_year: i64,
        courses: &[CourseRow],
    ) -> Result<()> {
        self.with_conn(|conn| {
            let mut del = conn.prepare(
                "DELETE FROM courses WHERE user_id = ? AND semester = ? AND begin_year = ?",
            )?;
            del.bind((1, user_id))?;
            del.bind((2, semester))?;
            del.bind((3, begin_year))?;
            del.next()?;

            for course in courses {
                let mut ins = conn.prepare(
                    "INSERT INTO courses
                     (user_id, course_id, course_name, teacher_name, locale,
                      day_of_week, section_start, section_end, weeks, begin_year, semester)
                     VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                )?;
                ins.bind((1, user_id))?;
                ins.bind((2, course.course_id))?;
                ins.bind((3, course.course_name.as_str()))?;
                ins.bind((4, course.teacher_name.as_str()))?;
                ins.bind((5, course.locale.as_str()))?;
                ins.bind((6, course.day_of_week))?;
                ins.bind((7, course.section_start))?;
                ins.bind((8, course.section_end))?;
                ins.bind((9, course.weeks.as_str()))?;
                ins.bind((10, begin_year))?;
                ins.bind((11, semester))?;
                ins.next()?;
            }
            Ok(())
        })
    }

    pub fn courses_for_day(
        &self,
        user_id: i64,
        semester: i64,
        begin_year: i64,
        day_of_week: i64,
    ) -> Result<Vec<CourseRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT course_id, course_name, teacher_name, locale,
                        day_of_week, section_start, section_end, weeks
                 FROM courses
                 WHERE user_id = ? AND semester = ? AND begin_year = ? AND day_of_week = ?
                 ORDER BY section_start",
            )?;
            stmt.bind((1, user_id))?;
            stmt.bind((2, semester))?;
            stmt.bind((3, begin_year))?;
            stmt.bind((4, day_of_week))?;
            let mut rows = Vec::new();
            while stmt.next()? == State::Row {
                rows.push(CourseRow {
                    course_id: stmt.read::<i64, _>(0)?,
                    course_name: stmt.read::<String, _>(1)?,
                    teacher_name: stmt.read::<String, _>(2)?,
                    locale: stmt.read::<String, _>(3)?,
                    day_of_week: stmt.read::<i64, _>(4)?,
                    section_start: stmt.read::<i64, _>(5)?,
                    section_end: stmt.read::<i64, _>(6)?,
                    weeks: stmt.read::<String, _>(7)?,
                });
            }
            Ok(rows)
        })
    }

    pub fn delete_courses(&self, user_id: i64) -> Result<()> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("DELETE FROM courses WHERE user_id = ?")?;
            stmt.bind((1, user_id))?;
            stmt.next()?;
            Ok(())
        })
    }
}

fn read_user(stmt: &sqlite::Statement<'_>) -> Result<UserRow> {
    Ok(UserRow {
        user_id: stmt.read::<i64, _>(0)?,
        student_id: stmt.read::<i64, _>(1)?,
        name: stmt.read::<String, _>(2)?,
        school_id: stmt.read::<i64, _>(3)?,
        account: stmt.read::<String, _>(4)?,
        password: stmt.read::<String, _>(5)?,
        lead_minutes: stmt.read::<Option<i64>, _>(6)?,
    })
}

fn read_timetable(stmt: &sqlite::Statement<'_>) -> Result<TimetableRow> {
    Ok(TimetableRow {
        school_id: stmt.read::<i64, _>(0)?,
        school_name: stmt.read::<String, _>(1)?,
        begin_year: stmt.read::<i64, _>(2)?,
        semester: stmt.read::<i64, _>(3)?,
        periods: stmt.read::<String, _>(4)?,
        anchor_date: stmt.read::<String, _>(5)?,
        anchor_week: stmt.read::<i64, _>(6)?,
    })
}
