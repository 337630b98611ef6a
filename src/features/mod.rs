//! # Features Module
//!
//! Feature modules of the class reminder bot: the clock/calendar provider,
//! the two derived-state caches, the notification scheduler and the request
//! serialization queue.

pub mod clock;
pub mod courses;
pub mod notifier;
pub mod requests;
pub mod timetable;

// Re-exports
pub use clock::{spawn_calendar_jobs, Clock, SystemClock, TimeProvider};
pub use courses::{CourseCache, CourseMeeting};
pub use notifier::NotificationScheduler;
pub use requests::{Request, RequestQueue, RequestWorker};
pub use timetable::BellScheduleCache;
