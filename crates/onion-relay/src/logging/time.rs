//! Format the times that appear in log output.
//!
//! Everything we log is stamped to the minute, in UTC.

use time::macros::format_description;
use time::OffsetDateTime;

/// Format `when` as `YYYY-MM-DD HH:MM`.
pub(crate) fn minute_stamp(when: OffsetDateTime) -> Result<String, time::error::Format> {
    when.to_offset(time::UtcOffset::UTC)
        .format(format_description!("[year]-[month]-[day] [hour]:[minute]"))
}

/// Return `msg` with a bracketed timestamp for `when` in front of it.
pub(crate) fn timestamped(msg: &str, when: OffsetDateTime) -> String {
    match minute_stamp(when) {
        Ok(stamp) => format!("[{}] {}", stamp, msg),
        // Only reachable for years that don't fit in four digits.
        Err(_) => format!("[????-??-?? ??:??] {}", msg),
    }
}

/// A [`FormatTime`](tracing_subscriber::fmt::time::FormatTime) that stamps
/// each log line with the current time, to the minute.
#[derive(Clone, Copy, Debug, Default)]
pub(super) struct LogTimer;

impl tracing_subscriber::fmt::time::FormatTime for LogTimer {
    fn format_time(&self, w: &mut tracing_subscriber::fmt::format::Writer<'_>) -> std::fmt::Result {
        w.write_str(&minute_stamp(OffsetDateTime::now_utc()).map_err(|_| std::fmt::Error)?)
    }
}
