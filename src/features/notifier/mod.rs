//! # Feature: Notification Scheduler
//!
//! Owns one outstanding reminder timer per user. `arm` picks the next
//! applicable class meeting of the day, schedules a wake-up at its start
//! time minus the user's lead time, delivers the reminder and re-arms for
//! the following meeting, cascading through the whole day. Mutation hooks
//! tear down and rebuild per-user state when course data, the school week
//! counter or the bell schedule change.
//!
//! Ordinary absence of data (no courses today, unknown week, missing
//! schedule) never surfaces as an error: the user simply stays unarmed and
//! a warning is logged. Only data-consistency violations between course
//! rows and the bell schedule are called out loudly.
//!
//! Timers fire on independently spawned tasks; every state transition
//! (public op, hook, or a timer's own re-arm) takes the internal ops mutex,
//! so a firing timer can never race a queue-driven mutation for the same
//! user.

use crate::core::format::minutes_to_hhmm;
use crate::database::Database;
use crate::features::clock::TimeProvider;
use crate::features::courses::{CourseCache, CourseMeeting};
use crate::features::timetable::{BellScheduleCache, Period};
use crate::messaging::MessageSender;
use chrono::{Datelike, Timelike};
use dashmap::DashMap;
use log::{debug, info, warn};
use rand::Rng;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// The armed reminder of one user. At most one exists per user at any
/// instant; the job table key is the user id.
struct ArmedJob {
    /// Section the reminder targets.
    section: i64,
    /// Start section of the meeting after this one, `None` when this is the
    /// last meeting of the day.
    next_section: Option<i64>,
    /// Minutes-from-midnight offset the reminder fires at.
    fire_offset: i64,
    handle: JoinHandle<()>,
}

/// Cheap-to-clone handle; timer tasks hold their own clone so the job table
/// outlives any individual caller.
#[derive(Clone)]
pub struct NotificationScheduler {
    inner: Arc<SchedulerInner>,
}

struct SchedulerInner {
    db: Database,
    time: Arc<TimeProvider>,
    bells: Arc<BellScheduleCache>,
    courses: Arc<CourseCache>,
    sender: Arc<dyn MessageSender>,
    default_lead_minutes: i64,
    jobs: DashMap<i64, ArmedJob>,
    /// Serializes every job-table transition against firing timers.
    ops: Mutex<()>,
}

impl NotificationScheduler {
    pub fn new(
        db: Database,
        time: Arc<TimeProvider>,
        bells: Arc<BellScheduleCache>,
        courses: Arc<CourseCache>,
        sender: Arc<dyn MessageSender>,
        default_lead_minutes: i64,
    ) -> Self {
        NotificationScheduler {
            inner: Arc::new(SchedulerInner {
                db,
                time,
                bells,
                courses,
                sender,
                default_lead_minutes,
                jobs: DashMap::new(),
                ops: Mutex::new(()),
            }),
        }
    }

    /// Arm the next reminder for a user. With `explicit_section` the target
    /// is fixed (used by the cascade re-arm); otherwise the first meeting
    /// that has not started yet is picked. Arming while armed is a caller
    /// error: it logs a warning and changes nothing.
    pub async fn arm(&self, user_id: i64, school_id: i64, explicit_section: Option<i64>) {
        let _guard = self.inner.ops.lock().await;
        self.arm_inner(user_id, school_id, explicit_section).await;
    }

    /// Cancel the user's timer, if any. Idempotent.
    pub async fn disarm(&self, user_id: i64) {
        let _guard = self.inner.ops.lock().await;
        self.disarm_inner(user_id);
    }

    /// The user's course rows were replaced: rebuild their job from fresh
    /// data. Completes before returning, callers rely on the job table
    /// reflecting the new data.
    pub async fn on_course_data_changed(&self, user_id: i64) {
        info!("Course data changed for user {}; rebuilding notification job.", user_id);
        let school_id = match self.inner.db.user(user_id) {
            Ok(Some(user)) => user.school_id,
            Ok(None) => {
                warn!("Course data changed for unknown user {}; nothing to rebuild.", user_id);
                return;
            }
            Err(err) => {
                warn!("Failed to look up user {}: {}", user_id, err);
                return;
            }
        };
        let _guard = self.inner.ops.lock().await;
        self.disarm_inner(user_id);
        self.inner.courses.invalidate(user_id);
        self.arm_inner(user_id, school_id, None).await;
    }

    /// The school's week counter changed: rebuild every affected user.
    /// The caller has already recomputed the week map.
    pub async fn on_week_changed(&self, school_id: i64) {
        info!("Week counter changed for school {}; rebuilding its users.", school_id);
        self.rebuild_school(school_id, false).await;
    }

    /// The school's bell schedule changed: drop the cached schedule and
    /// rebuild every affected user.
    pub async fn on_schedule_changed(&self, school_id: i64) {
        info!("Bell schedule changed for school {}; rebuilding its users.", school_id);
        self.rebuild_school(school_id, true).await;
    }

    /// The user is gone. Tearing down the school's timetable row, week
    /// counter and schedule cache when this was its last user is the
    /// mutation handler's job, not ours.
    pub async fn on_user_deleted(&self, user_id: i64) {
        let _guard = self.inner.ops.lock().await;
        self.disarm_inner(user_id);
        self.inner.courses.invalidate(user_id);
    }

    /// Rebuild one user after their lead time changed.
    pub async fn restart_user(&self, user_id: i64) {
        match self.inner.db.user(user_id) {
            Ok(Some(user)) => {
                let _guard = self.inner.ops.lock().await;
                self.disarm_inner(user_id);
                self.arm_inner(user_id, user.school_id, None).await;
            }
            Ok(None) => warn!("User {} doesn't exist, cannot restart their notification job.", user_id),
            Err(err) => warn!("Failed to look up user {}: {}", user_id, err),
        }
    }

    /// Daily redistribution: rebuild every known user's course cache and
    /// timer from scratch. Guards against clock drift, missed timers and
    /// long-uptime staleness.
    pub async fn redistribute_all(&self) {
        let users = match self.inner.db.all_users() {
            Ok(users) => users,
            Err(err) => {
                warn!("Redistribution skipped, user list unavailable: {}", err);
                return;
            }
        };
        let _guard = self.inner.ops.lock().await;
        for user in users {
            self.disarm_inner(user.user_id);
            self.inner.courses.invalidate(user.user_id);
            self.arm_inner(user.user_id, user.school_id, None).await;
        }
    }

    /// (section, next section, fire offset) of the user's armed job, if any.
    /// Used by status displays and tests.
    pub fn armed_state(&self, user_id: i64) -> Option<(i64, Option<i64>, i64)> {
        self.inner
            .jobs
            .get(&user_id)
            .map(|job| (job.section, job.next_section, job.fire_offset))
    }

    pub fn armed_count(&self) -> usize {
        self.inner.jobs.len()
    }

    async fn rebuild_school(&self, school_id: i64, drop_schedule: bool) {
        let users = match self.inner.db.users_of_school(school_id) {
            Ok(users) => users,
            Err(err) => {
                warn!("Failed to list users of school {}: {}", school_id, err);
                return;
            }
        };
        let _guard = self.inner.ops.lock().await;
        if drop_schedule {
            self.inner.bells.invalidate(school_id);
        }
        for user in users {
            self.disarm_inner(user.user_id);
            self.inner.courses.invalidate(user.user_id);
            self.arm_inner(user.user_id, school_id, None).await;
        }
    }

    /// Core arming logic. Caller must hold the ops mutex.
    async fn arm_inner(&self, user_id: i64, school_id: i64, explicit_section: Option<i64>) {
        if self.inner.jobs.contains_key(&user_id) {
            warn!(
                "A notification job is already armed for user {}; refusing to arm another.",
                user_id
            );
            return;
        }

        let bells = self.inner.bells.get(school_id);
        let now = self.inner.time.now();
        let day = now.weekday().number_from_monday() as i64;
        let today = self.inner.courses.get(user_id, school_id, day);
        // empty means no class today, or the data needed to decide is absent
        if today.is_empty() {
            return;
        }

        let now_minute = (now.hour() * 60 + now.minute()) as i64;
        let section = match explicit_section {
            Some(section) => section,
            None => {
                let last = &today[today.len() - 1];
                match section_start(&bells, last.start_section) {
                    Some(last_start) if now_minute >= last_start => return,
                    Some(_) => {}
                    None => {
                        warn!(
                            "Cannot arm user {}: section {} is beyond the {}-section schedule of school {}.",
                            user_id, last.start_section, bells.len(), school_id
                        );
                        return;
                    }
                }
                match today
                    .iter()
                    .find(|m| section_start(&bells, m.start_section).is_some_and(|s| s >= now_minute))
                {
                    Some(meeting) => meeting.start_section,
                    None => return,
                }
            }
        };

        if section < 1 || section > bells.len() as i64 {
            warn!(
                "Cannot arm user {}: section {} is beyond the {}-section schedule of school {}.",
                user_id, section, bells.len(), school_id
            );
            return;
        }

        // a gap: nothing actually meets at the requested section
        let position = match today.iter().position(|m| m.start_section == section) {
            Some(position) => position,
            None => return,
        };
        let meeting = today[position].clone();
        let next_section = today.get(position + 1).map(|m| m.start_section);

        let start_offset = bells[(meeting.start_section - 1) as usize].0;
        let end_offset = match bells.get((meeting.end_section - 1) as usize) {
            Some(period) if meeting.end_section >= 1 => period.1,
            _ => {
                warn!(
                    "Cannot arm user {}: end section {} is beyond the {}-section schedule of school {}.",
                    user_id, meeting.end_section, bells.len(), school_id
                );
                return;
            }
        };

        let lead = self.lead_minutes_of(user_id);
        let fire_offset = start_offset - lead;

        let now_second = now.num_seconds_from_midnight() as i64;
        let delay_secs = if fire_offset < now_minute {
            // catch-up policy: the reminder window already began, fire now
            debug!("Notification job for user {}: firing immediately.", user_id);
            0
        } else {
            let jitter = rand::rng().random_range(0..60);
            debug!(
                "Notification job for user {}: firing at {} (+{}s jitter).",
                user_id,
                minutes_to_hhmm(fire_offset),
                jitter
            );
            (fire_offset * 60 + jitter - now_second).max(0)
        };

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            if delay_secs > 0 {
                tokio::time::sleep(Duration::from_secs(delay_secs as u64)).await;
            }
            let now = scheduler.inner.time.now();
            let minutes_left = start_offset - (now.hour() * 60 + now.minute()) as i64;
            let text = render_reminder(
                &meeting,
                start_offset,
                end_offset,
                next_section.is_none(),
                minutes_left.max(0),
            );
            scheduler.inner.sender.send_nonblocking(user_id, text, 0);
            info!("Notification job executed for user {}.", user_id);
            scheduler.fired(user_id, school_id, next_section).await;
        });

        self.inner.jobs.insert(
            user_id,
            ArmedJob {
                section,
                next_section,
                fire_offset,
                handle,
            },
        );
    }

    /// Caller must hold the ops mutex.
    fn disarm_inner(&self, user_id: i64) {
        if let Some((_, job)) = self.inner.jobs.remove(&user_id) {
            job.handle.abort();
            debug!("Stopped notification job for user {}.", user_id);
        }
    }

    /// Timer-fire epilogue: drop the spent job entry (never aborting the
    /// running task itself) and cascade to the next meeting of the day.
    fn fired(
        &self,
        user_id: i64,
        school_id: i64,
        next_section: Option<i64>,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let _guard = self.inner.ops.lock().await;
            self.inner.jobs.remove(&user_id);
            if let Some(section) = next_section {
                self.arm_inner(user_id, school_id, Some(section)).await;
            }
        })
    }

    fn lead_minutes_of(&self, user_id: i64) -> i64 {
        match self.inner.db.user(user_id) {
            Ok(Some(user)) => user.lead_minutes.unwrap_or(self.inner.default_lead_minutes),
            _ => self.inner.default_lead_minutes,
        }
    }
}

fn section_start(bells: &[Period], section: i64) -> Option<i64> {
    if section < 1 {
        return None;
    }
    bells.get((section - 1) as usize).map(|period| period.0)
}

fn render_reminder(
    meeting: &CourseMeeting,
    start_offset: i64,
    end_offset: i64,
    is_last_today: bool,
    minutes_left: i64,
) -> String {
    format!(
        "Next class{}: {}\nTeacher: {}\nTime: {} -> {}\nLocation: {}\nStarts in {} minutes.",
        if is_last_today { " (the last one today)" } else { "" },
        meeting.course_name,
        meeting.teacher_name,
        minutes_to_hhmm(start_offset),
        minutes_to_hhmm(end_offset),
        meeting.locale,
        minutes_left,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{CourseRow, TimetableRow, UserRow};
    use crate::features::clock::{Clock, MockClock};
    use crate::messaging::ChannelSender;
    use chrono::{FixedOffset, TimeZone};
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    const SCHOOL: i64 = 42;
    const USER: i64 = 7;

    struct Fixture {
        db: Database,
        time: Arc<TimeProvider>,
        scheduler: NotificationScheduler,
        rx: mpsc::UnboundedReceiver<(i64, String)>,
    }

    fn course(name: &str, day: i64, start: i64, end: i64, weeks: &str) -> CourseRow {
        CourseRow {
            course_id: start,
            course_name: name.to_string(),
            teacher_name: "Prof. Knuth".to_string(),
            locale: "room 101".to_string(),
            day_of_week: day,
            section_start: start,
            section_end: end,
            weeks: weeks.to_string(),
        }
    }

    /// Wednesday 2025-09-10 (week 2 of fall 2025), school bell schedule
    /// "08:00-08:45|08:55-09:40", default lead time 15 minutes.
    fn fixture(hh: u32, mm: u32, lead_override: Option<i64>) -> Fixture {
        let db = Database::in_memory().unwrap();
        db.insert_timetable(&TimetableRow {
            school_id: SCHOOL,
            school_name: "Test University".to_string(),
            begin_year: 2025,
            semester: 1,
            periods: "08:00-08:45|08:55-09:40".to_string(),
            anchor_date: "2025-09-01".to_string(),
            anchor_week: 1,
        })
        .unwrap();
        db.insert_user(&UserRow {
            user_id: USER,
            student_id: 1007,
            name: "sam".to_string(),
            school_id: SCHOOL,
            account: "acct".to_string(),
            password: "enc".to_string(),
            lead_minutes: lead_override,
        })
        .unwrap();

        let offset = FixedOffset::east_opt(8 * 3600).unwrap();
        let clock = Arc::new(MockClock::at(
            offset.with_ymd_and_hms(2025, 9, 10, hh, mm, 0).unwrap(),
        ));
        let time = Arc::new(TimeProvider::new(
            Arc::clone(&clock) as Arc<dyn Clock>,
            db.clone(),
        ));
        time.recompute_weeks().unwrap();

        let bells = Arc::new(BellScheduleCache::new(db.clone(), Arc::clone(&time)));
        let courses = Arc::new(CourseCache::new(db.clone(), Arc::clone(&time)));
        let (sender, rx) = ChannelSender::new();
        let scheduler = NotificationScheduler::new(
            db.clone(),
            Arc::clone(&time),
            bells,
            courses,
            Arc::new(sender),
            15,
        );

        Fixture {
            db,
            time,
            scheduler,
            rx,
        }
    }

    async fn wait_for_armed_section(
        scheduler: &NotificationScheduler,
        user_id: i64,
        section: i64,
    ) {
        for _ in 0..100 {
            if let Some((armed, _, _)) = scheduler.armed_state(user_id) {
                if armed == section {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {} never became armed for section {}", user_id, section);
    }

    #[tokio::test]
    async fn test_arm_schedules_lead_time_before_start() {
        // scenario: 07:30, one course at section 1, lead 15 -> fires 07:45
        let mut f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;

        let (section, next, fire_offset) = f.scheduler.armed_state(USER).unwrap();
        assert_eq!(section, 1);
        assert_eq!(next, None);
        assert_eq!(fire_offset, 465); // 08:00 - 15min = 07:45
        assert!(f.rx.try_recv().is_err(), "nothing fires before the offset");

        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_arm_past_lead_time_fires_immediately() {
        // 07:50 is past the 07:45 fire offset
        let mut f = fixture(7, 50, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;

        let (user_id, text) = timeout(Duration::from_secs(2), f.rx.recv())
            .await
            .expect("reminder should fire immediately")
            .unwrap();
        assert_eq!(user_id, USER);
        assert!(text.contains("algebra"));
        assert!(text.contains("08:00 -> 08:45"));
        assert!(text.contains("the last one today"));

        // the spent job disappears without re-arming
        for _ in 0..100 {
            if f.scheduler.armed_state(USER).is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(f.scheduler.armed_state(USER).is_none());
    }

    #[tokio::test]
    async fn test_fire_cascades_to_next_meeting() {
        // after the section-1 reminder the scheduler re-arms for section 2
        // on its own
        let mut f = fixture(7, 50, None);
        f.db.replace_courses(
            USER,
            1,
            2025,
            &[
                course("algebra", 3, 1, 1, "1 2 3"),
                course("physics", 3, 2, 2, "1 2 3"),
            ],
        )
        .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;

        let (_, text) = timeout(Duration::from_secs(2), f.rx.recv())
            .await
            .expect("first reminder should fire immediately")
            .unwrap();
        assert!(text.contains("algebra"));
        assert!(!text.contains("the last one today"));

        wait_for_armed_section(&f.scheduler, USER, 2).await;
        let (_, next, fire_offset) = f.scheduler.armed_state(USER).unwrap();
        assert_eq!(next, None);
        assert_eq!(fire_offset, 535 - 15); // 08:55 - 15min

        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_schedule_change_rebuilds_armed_user() {
        let mut f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;
        assert_eq!(f.scheduler.armed_state(USER).unwrap().2, 465);

        // the school corrects its bell schedule: first period now at 09:00
        f.db.update_timetable_periods(SCHOOL, 1, 2025, "09:00-09:45|09:55-10:40")
            .unwrap();
        f.scheduler.on_schedule_changed(SCHOOL).await;

        let (section, _, fire_offset) = f.scheduler.armed_state(USER).unwrap();
        assert_eq!(section, 1);
        assert_eq!(fire_offset, 540 - 15);
        assert!(f.rx.try_recv().is_err());

        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_double_arm_is_rejected() {
        let f = fixture(7, 30, None);
        f.db.replace_courses(
            USER,
            1,
            2025,
            &[
                course("algebra", 3, 1, 1, "1 2 3"),
                course("physics", 3, 2, 2, "1 2 3"),
            ],
        )
        .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;
        let before = f.scheduler.armed_state(USER).unwrap();

        // second arm must not replace or duplicate the job
        f.scheduler.arm(USER, SCHOOL, Some(2)).await;
        assert_eq!(f.scheduler.armed_state(USER).unwrap(), before);
        assert_eq!(f.scheduler.armed_count(), 1);

        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_disarm_is_idempotent() {
        let f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;
        f.scheduler.disarm(USER).await;
        assert!(f.scheduler.armed_state(USER).is_none());
        f.scheduler.disarm(USER).await; // no-op, no panic
        assert_eq!(f.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_section_beyond_schedule_stays_unarmed() {
        let f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("phantom", 3, 9, 9, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, Some(9)).await;
        assert!(f.scheduler.armed_state(USER).is_none());

        // same with the implicit pick
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_none());
    }

    #[tokio::test]
    async fn test_no_courses_or_unknown_week_stays_unarmed() {
        let f = fixture(7, 30, None);
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_none());

        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();
        f.time.forget_school(SCHOOL);
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_none());
    }

    #[tokio::test]
    async fn test_after_last_class_started_stays_unarmed() {
        let f = fixture(10, 0, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_none());
    }

    #[tokio::test]
    async fn test_lead_time_override() {
        let f = fixture(7, 30, Some(5));
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();

        f.scheduler.arm(USER, SCHOOL, None).await;
        assert_eq!(f.scheduler.armed_state(USER).unwrap().2, 480 - 5);

        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_week_change_rebuilds_with_new_week() {
        let f = fixture(7, 30, None);
        // course only meets in week 5; week is currently 2, so arming fails
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "5")])
            .unwrap();
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_none());

        // a user corrects the anchor: today is week 5 now
        f.db.update_timetable_anchor(SCHOOL, 1, 2025, "2025-09-08", 5)
            .unwrap();
        f.time.recompute_weeks().unwrap();
        f.scheduler.on_week_changed(SCHOOL).await;

        assert_eq!(f.scheduler.armed_state(USER).unwrap().0, 1);
        f.scheduler.disarm(USER).await;
    }

    #[tokio::test]
    async fn test_user_deleted_tears_down_job() {
        let f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();
        f.scheduler.arm(USER, SCHOOL, None).await;
        assert!(f.scheduler.armed_state(USER).is_some());

        f.scheduler.on_user_deleted(USER).await;
        assert!(f.scheduler.armed_state(USER).is_none());
        assert_eq!(f.scheduler.armed_count(), 0);
    }

    #[tokio::test]
    async fn test_redistribute_all_rearms_every_user() {
        let f = fixture(7, 30, None);
        f.db.replace_courses(USER, 1, 2025, &[course("algebra", 3, 1, 1, "1 2 3")])
            .unwrap();
        f.db.insert_user(&UserRow {
            user_id: 8,
            student_id: 1008,
            name: "alex".to_string(),
            school_id: SCHOOL,
            account: "acct".to_string(),
            password: "enc".to_string(),
            lead_minutes: None,
        })
        .unwrap();
        f.db.replace_courses(8, 1, 2025, &[course("physics", 3, 2, 2, "1 2 3")])
            .unwrap();

        f.scheduler.redistribute_all().await;
        assert_eq!(f.scheduler.armed_count(), 2);
        assert_eq!(f.scheduler.armed_state(USER).unwrap().0, 1);
        assert_eq!(f.scheduler.armed_state(8).unwrap().0, 2);

        // redistribution is idempotent from the outside
        f.scheduler.redistribute_all().await;
        assert_eq!(f.scheduler.armed_count(), 2);

        f.scheduler.disarm(USER).await;
        f.scheduler.disarm(8).await;
    }

    #[test]
    fn test_render_reminder() {
        let meeting = CourseMeeting {
            course_name: "algebra".to_string(),
            teacher_name: "Prof. Knuth".to_string(),
            locale: "room 101".to_string(),
            start_section: 1,
            end_section: 1,
        };
        let text = render_reminder(&meeting, 480, 525, true, 15);
        assert!(text.contains("Next class (the last one today): algebra"));
        assert!(text.contains("Teacher: Prof. Knuth"));
        assert!(text.contains("Time: 08:00 -> 08:45"));
        assert!(text.contains("Location: room 101"));
        assert!(text.contains("Starts in 15 minutes."));
    }
}
