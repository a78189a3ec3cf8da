use std::sync::LazyLock;

use chrono::{DateTime, TimeDelta, Utc};
use chrono_tz::Tz;
use log::warn;
use regex::Regex;

use crate::domain::message::SearchWindow;

/// Used when a time span expression cannot be read.
pub const DEFAULT_SPAN: TimeDelta = TimeDelta::days(2);

static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("number pattern"));
static UNIT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(second|minute|hour|day|week)s?\b").expect("unit pattern")
});

/// Read a span such as "2 days", "1 week" or "days=2": the first number and
/// the first unit word found anywhere in the text.
pub fn parse_span(spec: &str) -> Option<TimeDelta> {
    let n: i64 = NUMBER.find(spec)?.as_str().parse().ok()?;
    let unit = UNIT.captures(spec)?.get(1)?.as_str().to_ascii_lowercase();
    match unit.as_str() {
        "second" => TimeDelta::try_seconds(n),
        "minute" => TimeDelta::try_minutes(n),
        "hour" => TimeDelta::try_hours(n),
        "day" => TimeDelta::try_days(n),
        "week" => TimeDelta::try_weeks(n),
        _ => None,
    }
}

/// Like [`parse_span`], falling back to [`DEFAULT_SPAN`] with a warning.
pub fn span_or_default(spec: &str) -> TimeDelta {
    parse_span(spec).unwrap_or_else(|| {
        warn!(
            "cannot read time span {spec:?}, using {} days",
            DEFAULT_SPAN.num_days()
        );
        DEFAULT_SPAN
    })
}

/// First calendar day, in `tz`, that lies within `span` of `now`. The time of
/// day is dropped because IMAP `SINCE` only compares dates.
pub fn since(now: DateTime<Utc>, span: TimeDelta, tz: Tz) -> SearchWindow {
    let local = now.with_timezone(&tz);
    let start = local
        .checked_sub_signed(span)
        .or_else(|| local.checked_sub_signed(DEFAULT_SPAN))
        .unwrap_or(local);
    SearchWindow {
        since: start.date_naive(),
    }
}

pub fn window_for(now: DateTime<Utc>, spec: &str, tz: Tz) -> SearchWindow {
    since(now, span_or_default(spec), tz)
}
