//! Provider quota detection.
//!
//! Pure helpers that recognise a usage-limit notice in agent output, pull the
//! reset time out of it, and compute how long to wait for the reset.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Days, Local, NaiveTime, TimeZone, Utc};
use regex::Regex;

static QUOTA_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(?:usage|session|weekly|\d+-hour) limit (?:reached|exceeded)\b|\byou've hit your (?:usage )?limit\b")
        .expect("quota pattern is valid")
});

static RESET_CLOCK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bresets?\s+(?:at\s+)?(\d{1,2})(?::(\d{2}))?\s*([ap])\.?m\b")
        .expect("reset clock pattern is valid")
});

static RESET_EPOCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)limit reached\|(\d{9,12})\b").expect("reset epoch pattern is valid"));

/// Returns true if `text` is a provider usage-limit notice.
pub fn is_quota_message(text: &str) -> bool {
    QUOTA_PATTERN.is_match(text) || RESET_EPOCH_PATTERN.is_match(text)
}

/// Extract the quota reset time from `text`, interpreting clock times in the
/// local timezone.
pub fn parse_reset_time(text: &str) -> Option<DateTime<Utc>> {
    parse_reset_time_at(text, &Local::now())
}

/// Extract the quota reset time relative to `now`.
///
/// Understands "resets 3pm" / "resets at 11:30am" (rolled to the next day when
/// already past) and the pipe-delimited epoch form "limit reached|1760000000".
pub fn parse_reset_time_at<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<DateTime<Utc>> {
    if let Some(caps) = RESET_EPOCH_PATTERN.captures(text) {
        let secs: i64 = caps[1].parse().ok()?;
        return DateTime::from_timestamp(secs, 0);
    }

    let caps = RESET_CLOCK_PATTERN.captures(text)?;
    let hour12: u32 = caps[1].parse().ok()?;
    if !(1..=12).contains(&hour12) {
        return None;
    }
    let minute: u32 = match caps.get(2) {
        Some(m) => m.as_str().parse().ok()?,
        None => 0,
    };
    let is_pm = caps[3].eq_ignore_ascii_case("p");
    let hour = match (hour12, is_pm) {
        (12, false) => 0,
        (12, true) => 12,
        (h, false) => h,
        (h, true) => h + 12,
    };
    let clock = NaiveTime::from_hms_opt(hour, minute, 0)?;

    let tz = now.timezone();
    let today = now.date_naive();
    let candidate = tz.from_local_datetime(&today.and_time(clock)).earliest()?;
    let reset = if candidate <= *now {
        let tomorrow = today.checked_add_days(Days::new(1))?;
        tz.from_local_datetime(&tomorrow.and_time(clock)).earliest()?
    } else {
        candidate
    };
    Some(reset.with_timezone(&Utc))
}

/// Time left until `reset`, zero if it has already passed.
pub fn wait_duration(reset: DateTime<Utc>) -> Duration {
    wait_duration_from(reset, Utc::now())
}

pub fn wait_duration_from(reset: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (reset - now).to_std().unwrap_or(Duration::ZERO)
}
