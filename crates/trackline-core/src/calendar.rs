//! Timestamp parsing and business-day arithmetic shared by planned and actual date pairs.

use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Weekday};

/// Absolute instant that remembers the offset it was written with, so the
/// calendar date of a timestamp is the date the tracker recorded.
pub type Timestamp = DateTime<FixedOffset>;

/// Parse an ISO-8601-like tracker timestamp.
///
/// Accepts RFC 3339 (`Z` is the same instant as `+00:00`), Jira's colon-less
/// offsets (`2024-03-01T10:00:00.000+0000`), naive date-times (read as UTC)
/// and bare dates (midnight UTC). Anything else yields `None`.
pub fn parse_timestamp(raw: &str) -> Option<Timestamp> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts);
    }
    if let Ok(ts) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(ts);
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc().fixed_offset());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc().fixed_offset())
}

pub fn is_business_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// Count weekdays from the calendar date of `start` through the calendar date
/// of `end`, both inclusive. An `end` earlier than `start` counts nothing.
///
/// Time of day is ignored: an event at 23:59 on a Monday still counts Monday
/// as a full day.
pub fn business_days(start: &Timestamp, end: &Timestamp) -> f64 {
    if end < start {
        return 0.0;
    }
    let last = end.date_naive();
    let counted = start
        .date_naive()
        .iter_days()
        .take_while(|day| *day <= last)
        .filter(|day| is_business_day(*day))
        .count();
    round_hundredths(counted as f64)
}

/// Business days between two raw timestamps; `None` when either is missing
/// or does not parse.
pub fn business_days_between(start: Option<&str>, end: Option<&str>) -> Option<f64> {
    let start = parse_timestamp(start?)?;
    let end = parse_timestamp(end?)?;
    Some(business_days(&start, &end))
}

fn round_hundredths(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(raw: &str) -> Timestamp {
        parse_timestamp(raw).expect("timestamp parses")
    }

    #[test]
    fn zulu_suffix_and_explicit_offset_are_the_same_instant() {
        assert_eq!(ts("2024-03-01T10:00:00Z"), ts("2024-03-01T10:00:00+00:00"));
    }

    #[test]
    fn jira_offsets_without_colon_parse() {
        let jira = ts("2024-03-01T12:30:00.000+0200");
        assert_eq!(jira, ts("2024-03-01T10:30:00Z"));
        assert_eq!(jira.date_naive(), NaiveDate::from_ymd_opt(2024, 3, 1).unwrap());
    }

    #[test]
    fn date_only_and_naive_values_are_read_as_utc() {
        assert_eq!(ts("2024-03-04"), ts("2024-03-04T00:00:00Z"));
        assert_eq!(ts("2024-03-04T08:15:00"), ts("2024-03-04T08:15:00+00:00"));
    }

    #[test]
    fn garbage_does_not_parse() {
        assert!(parse_timestamp("").is_none());
        assert!(parse_timestamp("   ").is_none());
        assert!(parse_timestamp("next tuesday").is_none());
        assert!(parse_timestamp("2024-13-45T99:00:00Z").is_none());
    }

    #[test]
    fn same_weekday_counts_one_and_same_weekend_day_counts_zero() {
        let monday = ts("2024-03-04T09:00:00Z");
        let saturday = ts("2024-03-02T09:00:00Z");
        assert_eq!(business_days(&monday, &monday), 1.0);
        assert_eq!(business_days(&saturday, &saturday), 0.0);
    }

    #[test]
    fn monday_to_wednesday_is_three_days() {
        let start = ts("2024-03-04T16:00:00Z");
        let end = ts("2024-03-06T08:00:00Z");
        assert_eq!(business_days(&start, &end), 3.0);
    }

    #[test]
    fn weekends_are_skipped_across_weeks() {
        // Fri 1 Mar .. Mon 11 Mar: Fri + 5 weekdays + Mon.
        let start = ts("2024-03-01T10:00:00Z");
        let end = ts("2024-03-11T10:00:00Z");
        assert_eq!(business_days(&start, &end), 7.0);
    }

    #[test]
    fn reversed_inputs_yield_zero() {
        let earlier = ts("2024-03-04T09:00:00Z");
        let later = ts("2024-03-06T09:00:00Z");
        assert_eq!(business_days(&later, &earlier), 0.0);

        let same_day_later = ts("2024-03-04T17:00:00Z");
        assert_eq!(business_days(&same_day_later, &earlier), 0.0);
    }

    #[test]
    fn extending_the_end_never_shrinks_the_count() {
        let start = ts("2024-02-29T12:00:00Z");
        let mut previous = 0.0;
        for offset in 0..21 {
            let end = start + chrono::Duration::days(offset);
            let current = business_days(&start, &end);
            assert!(current >= previous, "day {offset}: {current} < {previous}");
            previous = current;
        }
        assert_eq!(previous, 15.0);
    }

    #[test]
    fn raw_inputs_degrade_to_none() {
        assert_eq!(business_days_between(None, Some("2024-03-04")), None);
        assert_eq!(business_days_between(Some("2024-03-04"), None), None);
        assert_eq!(business_days_between(Some("soon"), Some("2024-03-04")), None);
        assert_eq!(
            business_days_between(Some("2024-03-04T09:00:00.000+0000"), Some("2024-03-08")),
            Some(5.0)
        );
    }
}
