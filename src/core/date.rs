//! Date normalization.
//!
//! Every date that enters the task model passes through [`DateNormalizer`],
//! which turns timestamps, ISO-8601 strings, `d/m/Y` strings and epoch
//! numbers into a single canonical UTC instant. String inputs are memoized
//! by their exact original text, including inputs that fail to parse.

use chrono::{
    DateTime, Datelike, Local, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc,
};
use regex::Regex;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex, MutexGuard};

/// The canonical instant used throughout the task model.
pub type Timestamp = DateTime<Utc>;

pub const DEFAULT_CACHE_CAPACITY: usize = 1000;

/// Epoch numbers with at least this magnitude are read as milliseconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

static ISO_DATE_PREFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}").unwrap());
static SLASH_DATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})/(\d{1,2})/(\d{4})$").unwrap());
static EPOCH_NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^-?\d{1,16}$").unwrap());

static GLOBAL: LazyLock<DateNormalizer> = LazyLock::new(DateNormalizer::default);

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

/// Anything [`DateNormalizer::parse`] accepts.
#[derive(Debug, Clone, Copy)]
pub enum DateInput<'a> {
    Instant(Timestamp),
    Text(&'a str),
}

impl From<Timestamp> for DateInput<'_> {
    fn from(ts: Timestamp) -> Self {
        Self::Instant(ts)
    }
}

impl<'a> From<&'a str> for DateInput<'a> {
    fn from(s: &'a str) -> Self {
        Self::Text(s)
    }
}

impl<'a> From<&'a String> for DateInput<'a> {
    fn from(s: &'a String) -> Self {
        Self::Text(s.as_str())
    }
}

#[derive(Default)]
struct DateCache {
    entries: HashMap<String, Option<Timestamp>>,
    order: VecDeque<String>,
}

/// Parses, validates and caches date inputs.
pub struct DateNormalizer {
    capacity: usize,
    cache: Mutex<DateCache>,
    strategy_runs: AtomicU64,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_CACHE_CAPACITY)
    }
}

impl DateNormalizer {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            cache: Mutex::new(DateCache::default()),
            strategy_runs: AtomicU64::new(0),
        }
    }

    /// Process-wide normalizer with the default capacity.
    pub fn global() -> &'static DateNormalizer {
        &GLOBAL
    }

    /// Normalize any input. Never fails: unusable input yields `None`.
    pub fn parse<'a>(&self, input: impl Into<DateInput<'a>>) -> Option<Timestamp> {
        match input.into() {
            DateInput::Instant(ts) => validate(ts),
            DateInput::Text(s) => self.parse_str(s),
        }
    }

    pub fn parse_str(&self, input: &str) -> Option<Timestamp> {
        if let Some(hit) = self.lock().entries.get(input) {
            return *hit;
        }
        let parsed = self.run_strategies(input);
        self.remember(input, parsed);
        parsed
    }

    /// Same as [`parse_str`](Self::parse_str) for optional wire fields.
    pub fn parse_opt(&self, input: Option<&str>) -> Option<Timestamp> {
        input.and_then(|s| self.parse_str(s))
    }

    /// How many times the parsing strategies actually ran (cache misses).
    pub fn strategy_runs(&self) -> u64 {
        self.strategy_runs.load(Ordering::Relaxed)
    }

    pub fn cached_len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn clear_cache(&self) {
        let mut cache = self.lock();
        cache.entries.clear();
        cache.order.clear();
    }

    /// Compare two inputs. Either side failing to parse yields an empty result.
    pub fn compare<'a, 'b>(
        &self,
        a: impl Into<DateInput<'a>>,
        b: impl Into<DateInput<'b>>,
    ) -> DateComparison {
        match (self.parse(a), self.parse(b)) {
            (Some(a), Some(b)) => DateComparison::between(a, b),
            _ => DateComparison::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DateCache> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn run_strategies(&self, input: &str) -> Option<Timestamp> {
        self.strategy_runs.fetch_add(1, Ordering::Relaxed);
        let s = input.trim();
        if s.is_empty() {
            return None;
        }
        parse_iso(s)
            .or_else(|| parse_slash(s))
            .or_else(|| parse_epoch(s))
            .and_then(validate)
    }

    fn remember(&self, input: &str, parsed: Option<Timestamp>) {
        let mut cache = self.lock();
        if cache.entries.contains_key(input) {
            return;
        }
        cache.entries.insert(input.to_string(), parsed);
        cache.order.push_back(input.to_string());

        if cache.entries.len() > self.capacity {
            let batch = (self.capacity / 4).max(1);
            for _ in 0..batch {
                match cache.order.pop_front() {
                    Some(oldest) => {
                        cache.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            log::debug!(
                "Date cache evicted {} entries ({} remain)",
                batch,
                cache.entries.len()
            );
        }
    }
}

/// Rejects instants that cannot be written as a four-digit-year wire string.
fn validate(ts: Timestamp) -> Option<Timestamp> {
    (0..=9999).contains(&ts.year()).then_some(ts)
}

fn parse_iso(s: &str) -> Option<Timestamp> {
    if !s.contains('T') && !ISO_DATE_PREFIX.is_match(s) {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Postgres style, e.g. "2024-03-05 14:30:00+00"
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f%#z") {
        return Some(dt.with_timezone(&Utc));
    }
    for format in NAIVE_DATETIME_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

fn parse_slash(s: &str) -> Option<Timestamp> {
    let caps = SLASH_DATE.captures(s)?;
    let day: u32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let year: i32 = caps[3].parse().ok()?;
    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn parse_epoch(s: &str) -> Option<Timestamp> {
    if !EPOCH_NUMBER.is_match(s) {
        return None;
    }
    let n: i64 = s.parse().ok()?;
    if n.abs() >= EPOCH_MILLIS_CUTOFF {
        DateTime::from_timestamp_millis(n)
    } else {
        DateTime::from_timestamp(n, 0)
    }
}

/// Canonical instant to transfer string (RFC 3339, millisecond precision, `Z`).
pub fn to_wire(ts: Option<Timestamp>) -> Option<String> {
    ts.map(|t| t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Which components [`format_for_display`] leaves out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisplayOptions {
    pub hide_date: bool,
    pub hide_year: bool,
    pub hide_time: bool,
}

/// Format in the local time zone.
pub fn format_for_display(ts: Option<Timestamp>, options: DisplayOptions) -> String {
    format_for_display_in(ts, options, &Local)
}

pub fn format_for_display_in<Tz>(ts: Option<Timestamp>, options: DisplayOptions, tz: &Tz) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    let Some(ts) = ts else {
        return String::new();
    };
    let local = ts.with_timezone(tz);

    let date_format = match (options.hide_date, options.hide_year) {
        (false, false) => Some("%b %-d, %Y"),
        (false, true) => Some("%b %-d"),
        (true, false) => Some("%Y"),
        (true, true) => None,
    };
    let time_format = (!options.hide_time).then_some("%H:%M");

    [date_format, time_format]
        .into_iter()
        .flatten()
        .map(|f| local.format(f).to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Result of comparing two date inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DateComparison {
    pub equal: bool,
    pub a_before_b: bool,
    pub a_after_b: bool,
    /// `b - a`, in whole seconds.
    pub delta_seconds: i64,
    pub human_readable: String,
}

impl DateComparison {
    pub fn between(a: Timestamp, b: Timestamp) -> Self {
        let delta_seconds = (b - a).num_seconds();
        Self {
            equal: a == b,
            a_before_b: a < b,
            a_after_b: a > b,
            delta_seconds,
            human_readable: describe_gap(a, b),
        }
    }
}

fn describe_gap(a: Timestamp, b: Timestamp) -> String {
    if a == b {
        return "same time".to_string();
    }
    let secs = (b - a).num_seconds().unsigned_abs();
    let (count, unit) = match secs {
        0..=59 => (secs, "second"),
        60..=3599 => (secs / 60, "minute"),
        3600..=86_399 => (secs / 3600, "hour"),
        _ => (secs / 86_400, "day"),
    };
    let plural = if count == 1 { "" } else { "s" };
    let side = if a < b { "before" } else { "after" };
    format!("{} {}{} {}", count, unit, plural, side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> Timestamp {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn parses_iso_variants() {
        let n = DateNormalizer::new(16);
        let expected = at(2024, 3, 5, 14, 30);
        assert_eq!(n.parse("2024-03-05T14:30:00Z"), Some(expected));
        assert_eq!(n.parse("2024-03-05T14:30:00.000Z"), Some(expected));
        assert_eq!(n.parse("2024-03-05T16:30:00+02:00"), Some(expected));
        assert_eq!(n.parse("2024-03-05 14:30:00+00"), Some(expected));
        assert_eq!(n.parse("2024-03-05T14:30"), Some(expected));
        assert_eq!(n.parse("2024-03-05 14:30:00"), Some(expected));
        assert_eq!(n.parse("2024-03-05"), Some(at(2024, 3, 5, 0, 0)));
    }

    #[test]
    fn parses_slash_day_month_year() {
        let n = DateNormalizer::new(16);
        assert_eq!(n.parse("05/03/2024"), Some(at(2024, 3, 5, 0, 0)));
        assert_eq!(n.parse("5/3/2024"), Some(at(2024, 3, 5, 0, 0)));
        assert_eq!(n.parse("31/02/2024"), None);
    }

    #[test]
    fn parses_epoch_seconds_and_millis() {
        let n = DateNormalizer::new(16);
        let expected = at(2024, 3, 5, 14, 30);
        let secs = expected.timestamp().to_string();
        let millis = expected.timestamp_millis().to_string();
        assert_eq!(n.parse(secs.as_str()), Some(expected));
        assert_eq!(n.parse(millis.as_str()), Some(expected));
    }

    #[test]
    fn garbage_is_negatively_cached() {
        let n = DateNormalizer::new(16);
        assert_eq!(n.parse("next tuesday-ish"), None);
        assert_eq!(n.strategy_runs(), 1);
        assert_eq!(n.parse("next tuesday-ish"), None);
        assert_eq!(n.parse("next tuesday-ish"), None);
        assert_eq!(n.strategy_runs(), 1);
    }

    #[test]
    fn cache_is_keyed_by_exact_input() {
        let n = DateNormalizer::new(16);
        n.parse("2024-03-05");
        n.parse(" 2024-03-05");
        assert_eq!(n.strategy_runs(), 2);
        assert_eq!(n.cached_len(), 2);
    }

    #[test]
    fn parse_is_idempotent_on_canonical_input() {
        let n = DateNormalizer::new(16);
        for input in ["2024-03-05T14:30:00Z", "05/03/2024", "1709649000"] {
            let once = n.parse(input).unwrap();
            assert_eq!(n.parse(once), Some(once));
            let wire = to_wire(Some(once)).unwrap();
            assert_eq!(n.parse(wire.as_str()), Some(once));
        }
    }

    #[test]
    fn out_of_range_instant_is_rejected() {
        let n = DateNormalizer::new(16);
        let far = at(9999, 12, 31, 0, 0) + Duration::days(2);
        assert_eq!(n.parse(far), None);
    }

    #[test]
    fn evicts_oldest_quarter_when_full() {
        let n = DateNormalizer::new(8);
        for day in 1..=9 {
            n.parse(format!("2024-01-{:02}", day).as_str());
        }
        // 9 entries exceeded capacity 8, so the two oldest went in one batch.
        assert_eq!(n.cached_len(), 7);
        let runs = n.strategy_runs();
        n.parse("2024-01-09");
        assert_eq!(n.strategy_runs(), runs);
        n.parse("2024-01-01");
        assert_eq!(n.strategy_runs(), runs + 1);
    }

    #[test]
    fn wire_format_is_millisecond_utc() {
        assert_eq!(
            to_wire(Some(at(2024, 3, 5, 14, 30))),
            Some("2024-03-05T14:30:00.000Z".to_string())
        );
        assert_eq!(to_wire(None), None);
    }

    #[test]
    fn display_options_compose() {
        let ts = Some(at(2024, 3, 5, 14, 30));
        let show = |hide_date, hide_year, hide_time| {
            format_for_display_in(
                ts,
                DisplayOptions {
                    hide_date,
                    hide_year,
                    hide_time,
                },
                &Utc,
            )
        };
        assert_eq!(show(false, false, false), "Mar 5, 2024, 14:30");
        assert_eq!(show(false, true, false), "Mar 5, 14:30");
        assert_eq!(show(false, false, true), "Mar 5, 2024");
        assert_eq!(show(true, false, false), "2024, 14:30");
        assert_eq!(show(true, true, false), "14:30");
        assert_eq!(show(true, true, true), "");
        assert_eq!(
            format_for_display_in(None, DisplayOptions::default(), &Utc),
            ""
        );
    }

    #[test]
    fn compare_reports_direction_and_delta() {
        let n = DateNormalizer::new(16);
        let cmp = n.compare("2024-03-05T12:00:00Z", "2024-03-05T14:00:00Z");
        assert!(cmp.a_before_b);
        assert!(!cmp.a_after_b);
        assert!(!cmp.equal);
        assert_eq!(cmp.delta_seconds, 7200);
        assert_eq!(cmp.human_readable, "2 hours before");

        let same = n.compare(at(2024, 1, 1, 0, 0), "2024-01-01");
        assert!(same.equal);
        assert_eq!(same.human_readable, "same time");
    }

    #[test]
    fn compare_with_unparseable_side_is_empty() {
        let n = DateNormalizer::new(16);
        let cmp = n.compare("soon", "2024-01-01");
        assert_eq!(cmp, DateComparison::default());
    }
}
