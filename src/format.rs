use chrono::{DateTime, Utc};

use crate::api::Post;

pub const DEFAULT_WORDS_PER_MINUTE: usize = 200;
pub const DEFAULT_CATEGORY: &str = "Blog";

/// Minutes needed to read `content`, never less than one.
pub fn read_time_minutes(content: &str, words_per_minute: usize) -> usize {
    let words = content.split_whitespace().count();
    let per_minute = words_per_minute.max(1);
    words.div_ceil(per_minute).max(1)
}

/// "January 5, 2024"
pub fn long_date(at: &DateTime<Utc>) -> String {
    at.format("%B %-d, %Y").to_string()
}

/// "Jan 5, 2024"
pub fn short_date(at: &DateTime<Utc>) -> String {
    at.format("%b %-d, %Y").to_string()
}

pub fn category(post: &Post) -> &str {
    post.category.as_deref().unwrap_or(DEFAULT_CATEGORY)
}

/// Human "time ago" label. Times in the future read as "a few seconds ago".
pub fn relative_time(then: &DateTime<Utc>, now: &DateTime<Utc>) -> String {
    let seconds = now.signed_duration_since(*then).num_seconds().max(0);
    let minutes = rounded(seconds, 60);
    let hours = rounded(seconds, 60 * 60);
    let days = rounded(seconds, 24 * 60 * 60);

    match seconds {
        s if s < 45 => "a few seconds ago".to_string(),
        s if s < 90 => "a minute ago".to_string(),
        s if s < 45 * 60 => format!("{minutes} minutes ago"),
        s if s < 90 * 60 => "an hour ago".to_string(),
        s if s < 22 * 60 * 60 => format!("{hours} hours ago"),
        s if s < 36 * 60 * 60 => "a day ago".to_string(),
        _ if days < 26 => format!("{days} days ago"),
        _ if days < 45 => "a month ago".to_string(),
        _ if days < 320 => format!("{} months ago", rounded(days, 30).max(2)),
        _ if days < 548 => "a year ago".to_string(),
        _ => format!("{} years ago", rounded(days, 365).max(2)),
    }
}

fn rounded(value: i64, unit: i64) -> i64 {
    (value + unit / 2) / unit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn read_time_rounds_up_and_has_a_floor() {
        assert_eq!(read_time_minutes("", 200), 1);
        assert_eq!(read_time_minutes("one two three", 200), 1);
        let long = "word ".repeat(401);
        assert_eq!(read_time_minutes(&long, 200), 3);
        assert_eq!(read_time_minutes(&long, 0), 401);
    }

    #[test]
    fn dates_use_month_names() {
        let at = Utc.with_ymd_and_hms(2024, 1, 5, 8, 0, 0).unwrap();
        assert_eq!(long_date(&at), "January 5, 2024");
        assert_eq!(short_date(&at), "Jan 5, 2024");
    }

    #[test]
    fn relative_time_thresholds() {
        let now = now();
        let ago = |d: Duration| relative_time(&(now - d), &now);
        assert_eq!(ago(Duration::seconds(10)), "a few seconds ago");
        assert_eq!(ago(Duration::seconds(60)), "a minute ago");
        assert_eq!(ago(Duration::minutes(5)), "5 minutes ago");
        assert_eq!(ago(Duration::minutes(60)), "an hour ago");
        assert_eq!(ago(Duration::hours(3)), "3 hours ago");
        assert_eq!(ago(Duration::hours(30)), "a day ago");
        assert_eq!(ago(Duration::days(4)), "4 days ago");
        assert_eq!(ago(Duration::days(30)), "a month ago");
        assert_eq!(ago(Duration::days(95)), "3 months ago");
        assert_eq!(ago(Duration::days(400)), "a year ago");
        assert_eq!(ago(Duration::days(3 * 365)), "3 years ago");
        assert_eq!(relative_time(&(now + Duration::hours(1)), &now), "a few seconds ago");
    }
}
