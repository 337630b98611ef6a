//! # Feature: Request Serialization Queue
//!
//! Every state-mutating operation (login, course sync, timetable and week
//! edits, account deletion) travels through one bounded queue drained by a
//! single worker task. That single consumer is the concurrency model: at
//! most one mutation executes at a time system-wide, so two users of the
//! same school can never race on the shared timetable or week state.
//!
//! Enqueueing never blocks the producer. When the queue is full the request
//! is dropped and logged; chat-command handlers must stay responsive.

use crate::api::{CourseProvider, LoginSession, ProviderError, StudentInfo};
use crate::core::PasswordCipher;
use crate::database::{CourseRow, Database, TimetableRow, UserRow};
use crate::features::clock::TimeProvider;
use crate::features::courses::CourseCache;
use crate::features::notifier::NotificationScheduler;
use crate::features::timetable::{parse_periods, BellScheduleCache};
use crate::messaging::MessageSender;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Random delay cap for school-wide fan-out notices.
const FANOUT_JITTER_MS: u64 = 60_000;

/// The sealed set of mutation requests. Dispatch is an exhaustive match in
/// the single consumer, so adding a variant is a compile-enforced todo.
#[derive(Debug)]
pub enum Request {
    /// A new user logs in with provider credentials.
    Login {
        user_id: i64,
        account: String,
        password: String,
    },
    /// Re-sync an existing user's courses with their stored credentials.
    SyncCourses { user_id: i64 },
    /// Delegated second step of a successful login or course re-sync: pull
    /// the course list over an already-established session.
    InternalSyncCourses { user_id: i64, session: LoginSession },
    /// Sync or correct the school's bell schedule. `new_periods` carries a
    /// manual correction as `(start, end)` clock-time pairs; `None` means
    /// "fetch from the provider". `force` overwrites an existing row;
    /// `also_sync_courses` additionally queues a course re-sync for every
    /// user of the school, used when the forced sync starts a new term.
    SyncTimetable {
        user_id: i64,
        new_periods: Option<Vec<(String, String)>>,
        force: bool,
        also_sync_courses: bool,
    },
    /// Re-anchor the school's week counter at `week`, starting today.
    SyncWeek { user_id: i64, week: i64 },
    /// Copy the previous term's timetable into the current term.
    InheritTimetable { user_id: i64 },
    ChangePassword { user_id: i64, password: String },
    ChangeLeadTime { user_id: i64, minutes: i64 },
    DeleteAccount { user_id: i64 },
}

impl std::fmt::Display for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Request::Login { user_id, account, password } => write!(
                f,
                "Login(user={}, account={}, password={})",
                user_id,
                account,
                "*".repeat(password.len())
            ),
            Request::SyncCourses { user_id } => write!(f, "SyncCourses(user={})", user_id),
            Request::InternalSyncCourses { user_id, .. } => {
                write!(f, "InternalSyncCourses(user={})", user_id)
            }
            Request::SyncTimetable { user_id, new_periods, force, also_sync_courses } => write!(
                f,
                "SyncTimetable(user={}, periods={}, force={}, sync_courses={})",
                user_id,
                new_periods
                    .as_ref()
                    .map(|p| format!("{} segments", p.len()))
                    .unwrap_or_else(|| "<from server>".to_string()),
                force,
                also_sync_courses
            ),
            Request::SyncWeek { user_id, week } => {
                write!(f, "SyncWeek(user={}, week={})", user_id, week)
            }
            Request::InheritTimetable { user_id } => {
                write!(f, "InheritTimetable(user={})", user_id)
            }
            Request::ChangePassword { user_id, .. } => {
                write!(f, "ChangePassword(user={})", user_id)
            }
            Request::ChangeLeadTime { user_id, minutes } => {
                write!(f, "ChangeLeadTime(user={}, minutes={})", user_id, minutes)
            }
            Request::DeleteAccount { user_id } => write!(f, "DeleteAccount(user={})", user_id),
        }
    }
}

/// Producer half of the queue. Cheap to clone; handed to every command
/// surface and to the worker itself for follow-up requests.
#[derive(Clone)]
pub struct RequestQueue {
    tx: mpsc::Sender<Request>,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Request>) {
        let (tx, rx) = mpsc::channel(capacity);
        (RequestQueue { tx }, rx)
    }

    /// Hand a request to the worker. Never blocks: on a full (or closed)
    /// queue the request is dropped and logged.
    pub fn submit(&self, request: Request) {
        if let Err(err) = self.tx.try_send(request) {
            warn!("Request is not handled. Request = {}", err.into_inner());
        }
    }
}

/// The single consumer. Owns every collaborator a mutation can touch.
pub struct RequestWorker {
    db: Database,
    provider: Arc<dyn CourseProvider>,
    cipher: PasswordCipher,
    time: Arc<TimeProvider>,
    bells: Arc<BellScheduleCache>,
    courses: Arc<CourseCache>,
    scheduler: NotificationScheduler,
    sender: Arc<dyn MessageSender>,
    queue: RequestQueue,
    default_lead_minutes: i64,
}

impl RequestWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        provider: Arc<dyn CourseProvider>,
        cipher: PasswordCipher,
        time: Arc<TimeProvider>,
        bells: Arc<BellScheduleCache>,
        courses: Arc<CourseCache>,
        scheduler: NotificationScheduler,
        sender: Arc<dyn MessageSender>,
        queue: RequestQueue,
        default_lead_minutes: i64,
    ) -> Self {
        RequestWorker {
            db,
            provider,
            cipher,
            time,
            bells,
            courses,
            scheduler,
            sender,
            queue,
            default_lead_minutes,
        }
    }

    /// Drain the queue until every producer is gone.
    pub async fn run(self, mut rx: mpsc::Receiver<Request>) {
        info!("Request worker started.");
        while let Some(request) = rx.recv().await {
            info!("Handling request: {}", request);
            self.handle(request).await;
        }
        info!("Request worker stopped.");
    }

    /// Execute one request to completion, scheduler hooks included.
    pub async fn handle(&self, request: Request) {
        match request {
            Request::Login { user_id, account, password } => {
                self.handle_login(user_id, account, password).await
            }
            Request::SyncCourses { user_id } => self.handle_sync_courses(user_id).await,
            Request::InternalSyncCourses { user_id, session } => {
                self.handle_internal_sync_courses(user_id, session).await
            }
            Request::SyncTimetable { user_id, new_periods, force, also_sync_courses } => {
                self.handle_sync_timetable(user_id, new_periods, force, also_sync_courses)
                    .await
            }
            Request::SyncWeek { user_id, week } => self.handle_sync_week(user_id, week).await,
            Request::InheritTimetable { user_id } => self.handle_inherit_timetable(user_id).await,
            Request::ChangePassword { user_id, password } => {
                self.handle_change_password(user_id, password).await
            }
            Request::ChangeLeadTime { user_id, minutes } => {
                self.handle_change_lead_time(user_id, minutes).await
            }
            Request::DeleteAccount { user_id } => self.handle_delete_account(user_id).await,
        }
    }

    async fn handle_login(&self, user_id: i64, account: String, password: String) {
        match self.db.user(user_id) {
            Ok(Some(_)) => {
                info!("User {} is already logged in.", user_id);
                self.sender.send_nonblocking(
                    user_id,
                    "You are already logged in. To update your stored password, \
                     use the change-password command instead."
                        .to_string(),
                    0,
                );
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!("Login for user {} failed on the user lookup: {}", user_id, err);
                return;
            }
        }

        match self.provider.login(&account, &password).await {
            Ok((session, student)) => {
                let row = UserRow {
                    user_id,
                    student_id: student.student_id,
                    name: student.name.clone(),
                    school_id: student.school_id,
                    account,
                    password: self.cipher.encrypt(&password),
                    lead_minutes: None,
                };
                if let Err(err) = self.db.insert_user(&row) {
                    error!("Failed to persist user {}: {}", user_id, err);
                    return;
                }
                info!("User {} login successful.", user_id);
                self.sender.send_nonblocking(
                    user_id,
                    "Login successful, syncing your courses...".to_string(),
                    0,
                );
                self.queue.submit(Request::InternalSyncCourses { user_id, session });
                self.queue.submit(Request::SyncTimetable {
                    user_id,
                    new_periods: None,
                    force: false,
                    also_sync_courses: false,
                });
            }
            Err(err) => {
                error!("Failed to log in user {}: {}", user_id, err);
                self.sender.send_nonblocking(
                    user_id,
                    format!("Could not log in to the course provider: {}", err),
                    0,
                );
            }
        }
    }

    async fn handle_sync_courses(&self, user_id: i64) {
        let user = match self.require_user(user_id, "sync courses") {
            Some(user) => user,
            None => return,
        };
        match self.stored_login(&user).await {
            Ok((session, _)) => {
                self.queue.submit(Request::InternalSyncCourses { user_id, session });
            }
            Err(err) => {
                error!("Failed to sync courses of user {}: {}", user_id, err);
                self.sender.send_nonblocking(
                    user_id,
                    format!("Could not sync your courses: {}", err),
                    0,
                );
            }
        }
    }

    async fn handle_internal_sync_courses(&self, user_id: i64, session: LoginSession) {
        if self.require_user(user_id, "sync courses").is_none() {
            return;
        }
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();

        match self.provider.fetch_courses(&session, semester, begin_year).await {
            Ok(remote) => {
                let rows: Vec<CourseRow> = remote
                    .into_iter()
                    .map(|course| CourseRow {
                        course_id: course.course_id,
                        course_name: course.name,
                        teacher_name: course.teacher,
                        locale: course.locale,
                        day_of_week: course.day_of_week,
                        section_start: course.section_start,
                        section_end: course.section_end,
                        weeks: course.weeks,
                    })
                    .collect();
                if let Err(err) = self.db.replace_courses(user_id, semester, begin_year, &rows) {
                    error!("Failed to store courses of user {}: {}", user_id, err);
                    return;
                }
                info!("Synced {} courses for user {}.", rows.len(), user_id);
                self.scheduler.on_course_data_changed(user_id).await;
                self.sender.send_nonblocking(
                    user_id,
                    format!(
                        "Courses synced! You will be reminded {} minutes before each class starts.",
                        self.lead_minutes_of(user_id)
                    ),
                    0,
                );
            }
            Err(err) => {
                error!("Failed to fetch courses of user {}: {}", user_id, err);
                self.sender.send_nonblocking(
                    user_id,
                    format!("Could not sync your courses: {}", err),
                    0,
                );
            }
        }
    }

    async fn handle_sync_timetable(
        &self,
        user_id: i64,
        new_periods: Option<Vec<(String, String)>>,
        force: bool,
        also_sync_courses: bool,
    ) {
        let user = match self.require_user(user_id, "sync the school timetable") {
            Some(user) => user,
            None => return,
        };
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();
        let existing = match self.db.timetable(user.school_id, semester, begin_year) {
            Ok(existing) => existing,
            Err(err) => {
                error!("Timetable lookup failed for school {}: {}", user.school_id, err);
                return;
            }
        };

        if force {
            let applied = match new_periods {
                None => self.sync_timetable_from_server(&user, existing.is_none()).await,
                Some(periods) => {
                    if existing.is_none() {
                        self.sender.send_nonblocking(
                            user_id,
                            "There is no timetable to correct yet; sync one from the server first."
                                .to_string(),
                            0,
                        );
                        return;
                    }
                    self.apply_manual_periods(&user, &periods)
                }
            };
            if applied {
                self.refresh_weeks();
                self.scheduler.on_schedule_changed(user.school_id).await;
                info!(
                    "Timetable of school {} updated by user {} (force).",
                    user.school_id, user_id
                );
                self.sender.send_nonblocking(
                    user_id,
                    "Timetable updated. This affects every user of your school.".to_string(),
                    0,
                );
                self.fan_out(
                    user.school_id,
                    user_id,
                    format!(
                        "The timetable of your school was updated by user {}. \
                         Contact them if this looks wrong.",
                        user_id
                    ),
                );
                if also_sync_courses {
                    self.sync_school_courses(user.school_id);
                }
            }
        } else if existing.is_none() {
            if self.sync_timetable_from_server(&user, true).await {
                self.refresh_weeks();
                self.scheduler.on_schedule_changed(user.school_id).await;
                info!("First timetable sync for school {} by user {}.", user.school_id, user_id);
                self.sender.send_nonblocking(
                    user_id,
                    "School timetable synced from the server for the first time. \
                     If the current week number is wrong, please correct it."
                        .to_string(),
                    0,
                );
                self.queue.submit(Request::SyncWeek { user_id, week: 1 });
            }
        } else {
            warn!(
                "Denied timetable sync for school {} (already present), user {}.",
                user.school_id, user_id
            );
            self.sender.send_nonblocking(
                user_id,
                "Your school's timetable has already been synced by a schoolmate. \
                 Force an update if it needs correcting."
                    .to_string(),
                0,
            );
        }
    }

    /// Pull the term schedule from the provider and write it. Returns
    /// whether a row was written; failures are reported to the user here.
    async fn sync_timetable_from_server(&self, user: &UserRow, create_new: bool) -> bool {
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();

        let result = async {
            let (session, student) = self.stored_login(user).await?;
            let periods = self
                .provider
                .fetch_term_schedule(&session, semester, begin_year)
                .await?;
            Ok::<(String, StudentInfo), ProviderError>((periods, student))
        }
        .await;

        let (periods, student) = match result {
            Ok(ok) => ok,
            Err(err) => {
                error!(
                    "Failed to sync the timetable of school {}: {}",
                    user.school_id, err
                );
                self.sender.send_nonblocking(
                    user.user_id,
                    format!(
                        "Could not sync the school timetable from the server \
                         (did you change your provider password?): {}",
                        err
                    ),
                    0,
                );
                return false;
            }
        };

        let stored = if create_new {
            self.db.insert_timetable(&TimetableRow {
                school_id: user.school_id,
                school_name: student.school_name,
                begin_year,
                semester,
                periods,
                anchor_date: self.time.today().to_string(),
                anchor_week: 1,
            })
        } else {
            self.db
                .update_timetable_periods(user.school_id, semester, begin_year, &periods)
        };
        if let Err(err) = stored {
            error!("Failed to store the timetable of school {}: {}", user.school_id, err);
            return false;
        }
        true
    }

    /// Validate and store a user-supplied period correction.
    fn apply_manual_periods(&self, user: &UserRow, periods: &[(String, String)]) -> bool {
        let raw = periods
            .iter()
            .map(|(start, end)| format!("{}-{}", start, end))
            .collect::<Vec<_>>()
            .join("|");
        if let Err(err) = parse_periods(&raw) {
            warn!("Rejected manual timetable from user {}: {}", user.user_id, err);
            self.sender.send_nonblocking(
                user.user_id,
                format!("That timetable is not valid: {}", err),
                0,
            );
            return false;
        }
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();
        if let Err(err) =
            self.db
                .update_timetable_periods(user.school_id, semester, begin_year, &raw)
        {
            error!("Failed to store the timetable of school {}: {}", user.school_id, err);
            return false;
        }
        true
    }

    async fn handle_sync_week(&self, user_id: i64, week: i64) {
        let user = match self.require_user(user_id, "set the week number") {
            Some(user) => user,
            None => return,
        };
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();

        match self.db.timetable(user.school_id, semester, begin_year) {
            Ok(Some(_)) => {
                let today = self.time.today().to_string();
                if let Err(err) = self.db.update_timetable_anchor(
                    user.school_id,
                    semester,
                    begin_year,
                    &today,
                    week,
                ) {
                    error!("Failed to re-anchor school {}: {}", user.school_id, err);
                    return;
                }
                // must finish before rescheduling, the scheduler reads it
                self.refresh_weeks();
                self.scheduler.on_week_changed(user.school_id).await;
                info!(
                    "Week of school {} set to {} by user {}.",
                    user.school_id, week, user_id
                );
                self.sender.send_nonblocking(
                    user_id,
                    format!(
                        "Week number for {} term {} set to {}.",
                        begin_year, semester, week
                    ),
                    0,
                );
                self.fan_out(
                    user.school_id,
                    user_id,
                    format!(
                        "The current week number of your school was changed by user {}.",
                        user_id
                    ),
                );
            }
            Ok(None) => {
                error!(
                    "Cannot set the week of school {}: no timetable row.",
                    user.school_id
                );
                self.sender.send_nonblocking(
                    user_id,
                    "Could not set the week number: no timetable found for your school. \
                     If you are logged in, delete your data and log in again."
                        .to_string(),
                    0,
                );
            }
            Err(err) => error!("Timetable lookup failed for school {}: {}", user.school_id, err),
        }
    }

    async fn handle_inherit_timetable(&self, user_id: i64) {
        let user = match self.require_user(user_id, "inherit the timetable") {
            Some(user) => user,
            None => return,
        };
        let semester = self.time.current_semester();
        let begin_year = self.time.current_semester_begin_year();
        let (prev_semester, prev_begin_year) = if semester == 2 {
            (1, begin_year)
        } else {
            (2, begin_year - 1)
        };

        match self.db.timetable(user.school_id, semester, begin_year) {
            Ok(Some(_)) => {
                self.sender.send_nonblocking(
                    user_id,
                    "Your school already has a timetable for this term.".to_string(),
                    0,
                );
                return;
            }
            Ok(None) => {}
            Err(err) => {
                error!("Timetable lookup failed for school {}: {}", user.school_id, err);
                return;
            }
        }

        let previous = match self.db.timetable(user.school_id, prev_semester, prev_begin_year) {
            Ok(previous) => previous,
            Err(err) => {
                error!("Timetable lookup failed for school {}: {}", user.school_id, err);
                return;
            }
        };
        match previous {
            Some(previous) => {
                let row = TimetableRow {
                    school_id: previous.school_id,
                    school_name: previous.school_name,
                    begin_year,
                    semester,
                    periods: previous.periods,
                    anchor_date: self.time.today().to_string(),
                    anchor_week: 1,
                };
                if let Err(err) = self.db.insert_timetable(&row) {
                    error!("Failed to inherit the timetable of school {}: {}", user.school_id, err);
                    return;
                }
                self.refresh_weeks();
                self.scheduler.on_schedule_changed(user.school_id).await;
                info!(
                    "School {} inherited its {}:{} timetable from {}:{} (user {}).",
                    user.school_id, begin_year, semester, prev_begin_year, prev_semester, user_id
                );
                self.sender.send_nonblocking(
                    user_id,
                    "Timetable inherited from the previous term. If the terms differ, \
                     force a timetable update with the corrected times."
                        .to_string(),
                    0,
                );
                self.fan_out(
                    user.school_id,
                    user_id,
                    format!(
                        "Your school's timetable for this term was inherited from the \
                         previous term by user {}.",
                        user_id
                    ),
                );
                // the new term starts with empty course tables; re-sync everyone
                self.sync_school_courses(user.school_id);
            }
            None => {
                self.sender.send_nonblocking(
                    user_id,
                    "No timetable found for the previous term; try syncing from the server."
                        .to_string(),
                    0,
                );
            }
        }
    }

    async fn handle_change_password(&self, user_id: i64, password: String) {
        if self.require_user(user_id, "change the password").is_none() {
            return;
        }
        if let Err(err) = self.db.update_password(user_id, &self.cipher.encrypt(&password)) {
            error!("Failed to update the password of user {}: {}", user_id, err);
            return;
        }
        info!("User {} changed their stored password.", user_id);
        self.sender.send_nonblocking(user_id, "Password updated.".to_string(), 0);
    }

    async fn handle_change_lead_time(&self, user_id: i64, minutes: i64) {
        if self.require_user(user_id, "change the lead time").is_none() {
            return;
        }
        if minutes < 1 {
            self.sender.send_nonblocking(
                user_id,
                "The lead time must be at least one minute.".to_string(),
                0,
            );
            return;
        }
        if let Err(err) = self.db.update_lead_minutes(user_id, Some(minutes)) {
            error!("Failed to update the lead time of user {}: {}", user_id, err);
            return;
        }
        self.scheduler.restart_user(user_id).await;
        self.sender.send_nonblocking(
            user_id,
            format!("You will now be reminded {} minutes before each class.", minutes),
            0,
        );
    }

    async fn handle_delete_account(&self, user_id: i64) {
        let user = match self.db.user(user_id) {
            Ok(Some(user)) => user,
            Ok(None) => return, // already gone, deletion is idempotent
            Err(err) => {
                error!("Deletion of user {} failed on the user lookup: {}", user_id, err);
                return;
            }
        };

        // last user of the school: the school's shared state goes with them
        match self.db.school_user_count(user.school_id) {
            Ok(1) => {
                if let Err(err) = self.db.delete_school_timetables(user.school_id) {
                    error!("Failed to drop the timetable of school {}: {}", user.school_id, err);
                }
                self.time.forget_school(user.school_id);
                self.bells.invalidate(user.school_id);
            }
            Ok(_) => {}
            Err(err) => error!("User count failed for school {}: {}", user.school_id, err),
        }

        self.scheduler.on_user_deleted(user_id).await;
        if let Err(err) = self.db.delete_courses(user_id) {
            error!("Failed to drop the courses of user {}: {}", user_id, err);
        }
        if let Err(err) = self.db.delete_user(user_id) {
            error!("Failed to delete user {}: {}", user_id, err);
        }
        info!("Deleted all data of user {}.", user_id);
        self.sender.send_nonblocking(
            user_id,
            "All your data has been deleted; you will receive no more class reminders. \
             Log in again to resume."
                .to_string(),
            0,
        );
    }

    /// Log in with the user's stored, encrypted credentials.
    async fn stored_login(&self, user: &UserRow) -> Result<(LoginSession, StudentInfo), ProviderError> {
        let password = self
            .cipher
            .decrypt(&user.password)
            .map_err(|err| ProviderError::Auth(format!("stored credentials unreadable: {}", err)))?;
        self.provider.login(&user.account, &password).await
    }

    fn require_user(&self, user_id: i64, action: &str) -> Option<UserRow> {
        match self.db.user(user_id) {
            Ok(Some(user)) => Some(user),
            Ok(None) => {
                error!("Failed to {}: user {} doesn't exist.", action, user_id);
                None
            }
            Err(err) => {
                error!("Failed to {} for user {}: {}", action, user_id, err);
                None
            }
        }
    }

    fn lead_minutes_of(&self, user_id: i64) -> i64 {
        match self.db.user(user_id) {
            Ok(Some(user)) => user.lead_minutes.unwrap_or(self.default_lead_minutes),
            _ => self.default_lead_minutes,
        }
    }

    fn refresh_weeks(&self) {
        if let Err(err) = self.time.recompute_weeks() {
            warn!("Week recomputation failed: {}", err);
        }
    }

    /// Queue a course re-sync for every user of a school. Follows any
    /// term-level timetable change, otherwise the users of the new term
    /// keep empty course tables and receive no reminders.
    fn sync_school_courses(&self, school_id: i64) {
        let users = match self.db.users_of_school(school_id) {
            Ok(users) => users,
            Err(err) => {
                warn!(
                    "School-wide course sync skipped for school {}: {}",
                    school_id, err
                );
                return;
            }
        };
        for user in users {
            self.queue.submit(Request::SyncCourses { user_id: user.user_id });
        }
    }

    /// Best-effort notice to every other user of a school after a
    /// school-wide mutation, spread over up to a minute.
    fn fan_out(&self, school_id: i64, origin_user: i64, text: String) {
        let others = match self.db.users_of_school(school_id) {
            Ok(users) => users,
            Err(err) => {
                warn!("Fan-out skipped for school {}: {}", school_id, err);
                return;
            }
        };
        for user in others {
            if user.user_id != origin_user {
                self.sender
                    .send_nonblocking(user.user_id, text.clone(), FANOUT_JITTER_MS);
            }
        }
    }
}
