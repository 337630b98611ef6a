// Core layer - configuration, credential encryption, shared formatting
pub mod core;

// Features layer - clock/calendar, caches, scheduler, request queue
pub mod features;

// Infrastructure - persistent store and outbound message delivery
pub mod database;
pub mod messaging;

// Remote course-data provider (HTTP client + DTOs)
pub mod api;

// Re-export core config for convenience
pub use crate::core::Config;

// Re-export feature items
pub use features::{
    // Clock/calendar
    Clock, SystemClock, TimeProvider,
    // Bell schedule
    BellScheduleCache,
    // Courses
    CourseCache, CourseMeeting,
    // Notifier
    NotificationScheduler,
    // Request queue
    Request, RequestQueue, RequestWorker,
};

pub use api::{CourseProvider, ProviderError, SuperClassClient};
pub use database::Database;
pub use messaging::{LogSender, MessageSender};
