//! Human-readable time deltas for operator output.

use chrono::{DateTime, Utc};

const CHUNKS: &[(i64, &str, &str)] = &[
    (60 * 60 * 24 * 365, "year", "years"),
    (60 * 60 * 24 * 30, "month", "months"),
    (60 * 60 * 24 * 7, "week", "weeks"),
    (60 * 60 * 24, "day", "days"),
    (60 * 60, "hour", "hours"),
    (60, "minute", "minutes"),
    (0, "second", "seconds"),
];

fn pluralize(count: i64, singular: &str, plural: &str) -> String {
    if count == 1 {
        format!("1 {singular}")
    } else {
        format!("{count} {plural}")
    }
}

/// Render the gap between `from` and `to` with up to two adjacent units,
/// e.g. "2 weeks, 3 days". Sub-second precision is ignored, and a `from`
/// in the future renders as "0 seconds".
pub fn timesince(from: DateTime<Utc>, to: DateTime<Utc>) -> String {
    let since = (to - from).num_seconds();
    if since <= 0 {
        return "0 seconds".to_string();
    }

    let mut index = CHUNKS.len() - 1;
    let mut count = since;
    for (i, &(seconds, _, _)) in CHUNKS.iter().enumerate() {
        if seconds > 0 {
            count = since / seconds;
            if count != 0 {
                index = i;
                break;
            }
        } else {
            count = since;
            index = i;
        }
    }

    let (seconds, singular, plural) = CHUNKS[index];
    let mut result = pluralize(count, singular, plural);
    if index + 1 < CHUNKS.len() {
        let (seconds2, singular2, plural2) = CHUNKS[index + 1];
        let count2 = if seconds2 > 0 {
            (since - seconds * count) / seconds2
        } else {
            since - seconds * count
        };
        if count2 != 0 {
            result.push_str(", ");
            result.push_str(&pluralize(count2, singular2, plural2));
        }
    }
    result
}
