//! Formatting helpers shared by the reminder text and the timetable views.

/// Render a minutes-from-midnight offset as a 24-hour `HH:MM` string.
pub fn minutes_to_hhmm(offset: i64) -> String {
    let offset = offset.rem_euclid(24 * 60);
    format!("{:02}:{:02}", offset / 60, offset % 60)
}
