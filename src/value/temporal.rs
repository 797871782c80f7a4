//! Temporal datatypes: time, date, dateTime and the two XML Schema
//! duration types. Values carry an optional timezone offset; comparison
//! treats unzoned values as UTC so that ordering is total and
//! deterministic. Duration arithmetic is fields-then-normalize — a
//! yearMonthDuration is not a fixed number of days, so the year/month part
//! is applied to the calendar fields and the day/time part as an exact
//! millisecond delta.

use std::cmp::Ordering;

use chrono::{Duration, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

use crate::errors::IndeterminateError;

type ParseResult<T> = Result<T, &'static str>;

/// Split a trailing timezone designator (`Z` or `±HH:MM`) off a temporal
/// lexical form, returning the remainder and the offset in seconds east.
fn split_timezone(s: &str) -> ParseResult<(&str, Option<i32>)> {
    if let Some(rest) = s.strip_suffix('Z') {
        return Ok((rest, Some(0)));
    }
    // The offset sign must come after the time part, so look for ±HH:MM in
    // the last six characters only (a date like 2002-09-24 contains '-').
    if s.len() > 6 {
        let (head, tail) = s.split_at(s.len() - 6);
        let bytes = tail.as_bytes();
        if (bytes[0] == b'+' || bytes[0] == b'-') && bytes[3] == b':' {
            let hours: i32 = tail[1..3].parse().map_err(|_| "invalid timezone hours")?;
            let minutes: i32 = tail[4..6].parse().map_err(|_| "invalid timezone minutes")?;
            if hours > 14 || minutes > 59 {
                return Err("timezone offset out of range");
            }
            let mut offset = hours * 3600 + minutes * 60;
            if bytes[0] == b'-' {
                offset = -offset;
            }
            return Ok((head, Some(offset)));
        }
    }
    Ok((s, None))
}

fn print_timezone(offset: Option<i32>) -> String {
    match offset {
        None => String::new(),
        Some(0) => "Z".to_string(),
        Some(secs) => {
            let sign = if secs < 0 { '-' } else { '+' };
            let abs = secs.abs();
            format!("{sign}{:02}:{:02}", abs / 3600, (abs % 3600) / 60)
        }
    }
}

fn print_fraction(nanos: u32) -> String {
    if nanos == 0 {
        String::new()
    } else {
        let millis = nanos / 1_000_000;
        format!(".{millis:03}")
    }
}

// ─── time ───────────────────────────────────────────────────────────────

/// xs:time with an optional timezone offset (seconds east of UTC).
#[derive(Debug, Clone)]
pub struct TimeValue {
    time: NaiveTime,
    offset: Option<i32>,
}

impl TimeValue {
    pub fn new(time: NaiveTime, offset: Option<i32>) -> Self {
        Self { time, offset }
    }

    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let (body, offset) = split_timezone(lexical.trim())?;
        let time = NaiveTime::parse_from_str(body, "%H:%M:%S%.f")
            .map_err(|_| "expected HH:MM:SS[.fff][Z|±HH:MM]")?;
        Ok(Self { time, offset })
    }

    pub fn print(&self) -> String {
        format!(
            "{:02}:{:02}:{:02}{}{}",
            self.time.hour(),
            self.time.minute(),
            self.time.second(),
            print_fraction(self.time.nanosecond()),
            print_timezone(self.offset)
        )
    }

    /// Milliseconds since UTC midnight; unzoned values count as UTC.
    fn normalized_millis(&self) -> i64 {
        let local = self.time.num_seconds_from_midnight() as i64 * 1000
            + (self.time.nanosecond() / 1_000_000) as i64;
        local - self.offset.unwrap_or(0) as i64 * 1000
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.normalized_millis().cmp(&other.normalized_millis())
    }
}

impl PartialEq for TimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_millis() == other.normalized_millis()
    }
}

// ─── date ───────────────────────────────────────────────────────────────

/// xs:date with an optional timezone offset.
#[derive(Debug, Clone)]
pub struct DateValue {
    date: NaiveDate,
    offset: Option<i32>,
}

impl DateValue {
    pub fn new(date: NaiveDate, offset: Option<i32>) -> Self {
        Self { date, offset }
    }

    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let (body, offset) = split_timezone(lexical.trim())?;
        let date = NaiveDate::parse_from_str(body, "%Y-%m-%d")
            .map_err(|_| "expected YYYY-MM-DD[Z|±HH:MM]")?;
        Ok(Self { date, offset })
    }

    pub fn print(&self) -> String {
        format!("{}{}", self.date.format("%Y-%m-%d"), print_timezone(self.offset))
    }

    /// Starting instant of the day in UTC milliseconds.
    fn normalized_millis(&self) -> i64 {
        let midnight = self.date.and_time(NaiveTime::MIN);
        midnight.and_utc().timestamp_millis() - self.offset.unwrap_or(0) as i64 * 1000
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.normalized_millis().cmp(&other.normalized_millis())
    }

    pub fn add_year_month(&self, d: &YearMonthDuration) -> Result<Self, IndeterminateError> {
        let date = add_months(self.date, d.months)?;
        Ok(Self {
            date,
            offset: self.offset,
        })
    }
}

impl PartialEq for DateValue {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_millis() == other.normalized_millis()
    }
}

// ─── dateTime ───────────────────────────────────────────────────────────

/// xs:dateTime with an optional timezone offset.
#[derive(Debug, Clone)]
pub struct DateTimeValue {
    datetime: NaiveDateTime,
    offset: Option<i32>,
}

impl DateTimeValue {
    pub fn new(datetime: NaiveDateTime, offset: Option<i32>) -> Self {
        Self { datetime, offset }
    }

    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let (body, offset) = split_timezone(lexical.trim())?;
        let datetime = NaiveDateTime::parse_from_str(body, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(|_| "expected YYYY-MM-DDTHH:MM:SS[.fff][Z|±HH:MM]")?;
        Ok(Self { datetime, offset })
    }

    pub fn print(&self) -> String {
        format!(
            "{}{}{}",
            self.datetime.format("%Y-%m-%dT%H:%M:%S"),
            print_fraction(self.datetime.and_utc().timestamp_subsec_nanos()),
            print_timezone(self.offset)
        )
    }

    fn normalized_millis(&self) -> i64 {
        self.datetime.and_utc().timestamp_millis() - self.offset.unwrap_or(0) as i64 * 1000
    }

    pub fn compare(&self, other: &Self) -> Ordering {
        self.normalized_millis().cmp(&other.normalized_millis())
    }

    /// Projections used by the PDP to derive current-date and current-time
    /// from the single per-request clock sample.
    pub fn date_part(&self) -> DateValue {
        DateValue::new(self.datetime.date(), self.offset)
    }

    pub fn time_part(&self) -> TimeValue {
        TimeValue::new(self.datetime.time(), self.offset)
    }

    pub fn add_day_time(&self, d: &DayTimeDuration) -> Result<Self, IndeterminateError> {
        let datetime = self
            .datetime
            .checked_add_signed(Duration::milliseconds(d.millis))
            .ok_or_else(|| IndeterminateError::processing("dateTime arithmetic overflow"))?;
        Ok(Self {
            datetime,
            offset: self.offset,
        })
    }

    pub fn add_year_month(&self, d: &YearMonthDuration) -> Result<Self, IndeterminateError> {
        let date = add_months(self.datetime.date(), d.months)?;
        Ok(Self {
            datetime: date.and_time(self.datetime.time()),
            offset: self.offset,
        })
    }
}

impl PartialEq for DateTimeValue {
    fn eq(&self, other: &Self) -> bool {
        self.normalized_millis() == other.normalized_millis()
    }
}

fn add_months(date: NaiveDate, months: i64) -> Result<NaiveDate, IndeterminateError> {
    let overflow = || IndeterminateError::processing("date arithmetic overflow");
    let magnitude = u32::try_from(months.unsigned_abs()).map_err(|_| overflow())?;
    if months >= 0 {
        date.checked_add_months(Months::new(magnitude)).ok_or_else(overflow)
    } else {
        date.checked_sub_months(Months::new(magnitude)).ok_or_else(overflow)
    }
}

// ─── durations ──────────────────────────────────────────────────────────

/// xs:dayTimeDuration as an exact millisecond count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayTimeDuration {
    pub millis: i64,
}

impl DayTimeDuration {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let s = lexical.trim();
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let rest = rest.strip_prefix('P').ok_or("expected P designator")?;
        let (day_part, time_part) = match rest.split_once('T') {
            Some((d, t)) => (d, Some(t)),
            None => (rest, None),
        };
        if time_part == Some("") {
            return Err("T designator with no time components");
        }

        let mut millis: i64 = 0;
        let mut seen = false;
        if !day_part.is_empty() {
            let days = day_part
                .strip_suffix('D')
                .ok_or("expected D designator")?
                .parse::<i64>()
                .map_err(|_| "invalid day count")?;
            millis += days * 86_400_000;
            seen = true;
        }
        if let Some(time) = time_part {
            let mut rest = time;
            if let Some((n, tail)) = split_component(rest, 'H')? {
                millis += n * 3_600_000;
                rest = tail;
                seen = true;
            }
            if let Some((n, tail)) = split_component(rest, 'M')? {
                millis += n * 60_000;
                rest = tail;
                seen = true;
            }
            if let Some((n, tail)) = split_seconds(rest)? {
                millis += n;
                rest = tail;
                seen = true;
            }
            if !rest.is_empty() {
                return Err("trailing characters in duration");
            }
        }
        if !seen {
            return Err("duration has no components");
        }
        Ok(Self {
            millis: if negative { -millis } else { millis },
        })
    }

    pub fn print(&self) -> String {
        if self.millis == 0 {
            return "PT0S".to_string();
        }
        let mut out = String::new();
        if self.millis < 0 {
            out.push('-');
        }
        out.push('P');
        let mut rem = self.millis.unsigned_abs();
        let days = rem / 86_400_000;
        rem %= 86_400_000;
        if days > 0 {
            out.push_str(&format!("{days}D"));
        }
        if rem > 0 {
            out.push('T');
            let hours = rem / 3_600_000;
            rem %= 3_600_000;
            let minutes = rem / 60_000;
            rem %= 60_000;
            if hours > 0 {
                out.push_str(&format!("{hours}H"));
            }
            if minutes > 0 {
                out.push_str(&format!("{minutes}M"));
            }
            if rem > 0 {
                let secs = rem / 1000;
                let millis = rem % 1000;
                if millis > 0 {
                    out.push_str(&format!("{secs}.{millis:03}S"));
                } else {
                    out.push_str(&format!("{secs}S"));
                }
            }
        }
        out
    }
}

/// Take a leading `<digits><marker>` component off `rest`, if present.
fn split_component(rest: &str, marker: char) -> ParseResult<Option<(i64, &str)>> {
    let Some(pos) = rest.find(marker) else {
        return Ok(None);
    };
    // A later component marker may share letters with an earlier value
    // (e.g. "3.5S" contains no M); only accept if all leading chars are
    // digits.
    let head = &rest[..pos];
    if head.is_empty() || !head.bytes().all(|b| b.is_ascii_digit()) {
        return Ok(None);
    }
    let n = head.parse::<i64>().map_err(|_| "invalid duration component")?;
    Ok(Some((n, &rest[pos + 1..])))
}

/// Take a leading `<decimal>S` seconds component, returning milliseconds.
fn split_seconds(rest: &str) -> ParseResult<Option<(i64, &str)>> {
    let Some(pos) = rest.find('S') else {
        return Ok(None);
    };
    let head = &rest[..pos];
    let (int_part, frac_part) = match head.split_once('.') {
        Some((i, f)) => (i, f),
        None => (head, ""),
    };
    if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err("invalid seconds component");
    }
    let mut millis = int_part
        .parse::<i64>()
        .map_err(|_| "invalid seconds component")?
        * 1000;
    if !frac_part.is_empty() {
        if !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err("invalid fractional seconds");
        }
        let padded = format!("{frac_part:0<3}");
        millis += padded[..3].parse::<i64>().map_err(|_| "invalid fractional seconds")?;
    }
    Ok(Some((millis, &rest[pos + 1..])))
}

/// xs:yearMonthDuration as a month count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct YearMonthDuration {
    pub months: i64,
}

impl YearMonthDuration {
    pub fn parse(lexical: &str) -> ParseResult<Self> {
        let s = lexical.trim();
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        let mut rest = rest.strip_prefix('P').ok_or("expected P designator")?;
        let mut months: i64 = 0;
        let mut seen = false;
        if let Some((n, tail)) = split_component(rest, 'Y')? {
            months += n * 12;
            rest = tail;
            seen = true;
        }
        if let Some((n, tail)) = split_component(rest, 'M')? {
            months += n;
            rest = tail;
            seen = true;
        }
        if !seen || !rest.is_empty() {
            return Err("expected [-]PnYnM");
        }
        Ok(Self {
            months: if negative { -months } else { months },
        })
    }

    pub fn print(&self) -> String {
        if self.months == 0 {
            return "P0M".to_string();
        }
        let mut out = String::new();
        if self.months < 0 {
            out.push('-');
        }
        out.push('P');
        let abs = self.months.unsigned_abs();
        let years = abs / 12;
        let months = abs % 12;
        if years > 0 {
            out.push_str(&format!("{years}Y"));
        }
        if months > 0 {
            out.push_str(&format!("{months}M"));
        }
        out
    }

    pub fn negated(&self) -> Self {
        Self { months: -self.months }
    }
}

impl DayTimeDuration {
    pub fn negated(&self) -> Self {
        Self { millis: -self.millis }
    }
}
