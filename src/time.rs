use chrono::{Datelike, Days, Months, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Weekday};

use crate::engine::EngineError;

/// One hour-aligned `[start, end)` block of a schedule or slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourBlock {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// Parse `H:MM`, `HH:MM` or `HH:MM:SS` into a clock time.
pub fn parse_clock_time(raw: &str) -> Result<NaiveTime, EngineError> {
    let invalid = || EngineError::Invalid(format!("invalid time '{raw}', expected HH:MM or HH:MM:SS"));
    let parts: Vec<&str> = raw.trim().split(':').collect();
    let (h, m, s) = match parts.as_slice() {
        [h, m] => (*h, *m, "0"),
        [h, m, s] => (*h, *m, *s),
        _ => return Err(invalid()),
    };
    let h: u32 = h.trim().parse().map_err(|_| invalid())?;
    let m: u32 = m.trim().parse().map_err(|_| invalid())?;
    let s: u32 = s.trim().parse().map_err(|_| invalid())?;
    NaiveTime::from_hms_opt(h, m, s).ok_or_else(invalid)
}

pub fn parse_date(raw: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|_| EngineError::Invalid(format!("invalid date '{raw}', expected YYYY-MM-DD")))
}

/// The top of the hour `h`, or `None` for `h >= 24`.
pub fn hour(h: u32) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(h, 0, 0)
}

/// Split `[start, end)` into whole-hour blocks: start is floored and end is
/// ceiled to the hour boundary. Blocks must finish by 23:00 because a slot
/// cannot end at midnight.
pub fn hour_blocks(start: NaiveTime, end: NaiveTime) -> Result<Vec<HourBlock>, EngineError> {
    if end <= start {
        return Err(EngineError::Invalid("end time must be after start time".into()));
    }
    let first = start.hour();
    let last = if end.minute() == 0 && end.second() == 0 {
        end.hour()
    } else {
        end.hour() + 1
    };
    if last > 23 {
        return Err(EngineError::Invalid("schedule must end by 23:00".into()));
    }
    (first..last)
        .map(|h| match (hour(h), hour(h + 1)) {
            (Some(start), Some(end)) => Ok(HourBlock { start, end }),
            _ => Err(EngineError::Invalid(format!("hour {h} out of range"))),
        })
        .collect()
}

/// `date + months`, clamping the day-of-month to the target month's length.
pub fn add_months_clamped(date: NaiveDate, months: u32) -> NaiveDate {
    date.checked_add_months(Months::new(months)).unwrap_or(NaiveDate::MAX)
}

/// Last day of the rolling window that starts at `today` and spans `days` days.
pub fn window_end(today: NaiveDate, days: u32) -> NaiveDate {
    today
        .checked_add_days(Days::new(u64::from(days.saturating_sub(1))))
        .unwrap_or(NaiveDate::MAX)
}

pub fn in_window(date: NaiveDate, today: NaiveDate, days: u32) -> bool {
    date >= today && date <= window_end(today, days)
}

/// 0 = Monday … 6 = Sunday.
pub fn weekday_from_index(index: u8) -> Result<Weekday, EngineError> {
    match index {
        0 => Ok(Weekday::Mon),
        1 => Ok(Weekday::Tue),
        2 => Ok(Weekday::Wed),
        3 => Ok(Weekday::Thu),
        4 => Ok(Weekday::Fri),
        5 => Ok(Weekday::Sat),
        6 => Ok(Weekday::Sun),
        _ => Err(EngineError::Invalid(format!("weekday {index} out of range 0..=6"))),
    }
}

pub fn weekday_index(day: Weekday) -> u8 {
    day.num_days_from_monday() as u8
}

/// Half-open overlap of two clock ranges.
pub fn ranges_overlap(a_start: NaiveTime, a_end: NaiveTime, b_start: NaiveTime, b_end: NaiveTime) -> bool {
    a_start < b_end && b_start < a_end
}

/// Every date in `[from, to]` that falls on `day`.
pub fn dates_on_weekday(from: NaiveDate, to: NaiveDate, day: Weekday) -> impl Iterator<Item = NaiveDate> {
    let offset = (7 + day.num_days_from_monday() - from.weekday().num_days_from_monday()) % 7;
    let first = from.checked_add_days(Days::new(u64::from(offset)));
    std::iter::successors(first, |d| d.checked_add_days(Days::new(7))).take_while(move |d| *d <= to)
}

/// True once the wall clock is strictly past `date end`.
pub fn has_ended(date: NaiveDate, end: NaiveTime, now: NaiveDateTime) -> bool {
    date.and_time(end) < now
}
