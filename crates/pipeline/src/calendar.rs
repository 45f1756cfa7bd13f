use chrono::{Datelike, NaiveDate, Weekday};

/// `YYYYMMDD` as an integer, the form every store keys on.
pub fn date_key(date: NaiveDate) -> u32 {
    let year = u32::try_from(date.year()).unwrap_or(0);
    year * 10_000 + date.month() * 100 + date.day()
}

/// Inverse of [`date_key`]. `None` for anything that is not a calendar date.
pub fn parse_date_key(key: u32) -> Option<NaiveDate> {
    let year = i32::try_from(key / 10_000).ok()?;
    NaiveDate::from_ymd_opt(year, (key / 100) % 100, key % 100)
}

/// Year-week stamp for export rows.
///
/// Takes the ISO (Monday-first) year and week, then bumps the week by one
/// when the date is a Sunday to approximate a Sunday-first week. Year and
/// week are concatenated as decimals with no zero padding, so week 2 of 2023
/// is `20232` and week 27 is `202327`.
///
/// The year component is never adjusted: a Sunday at the end of a 53-week
/// ISO year reports week 54 of that year (see the boundary tests below).
pub fn year_week(date: NaiveDate) -> u32 {
    let iso = date.iso_week();
    let mut week = iso.week();
    if date.weekday() == Weekday::Sun {
        week += 1;
    }
    let year = u32::try_from(iso.year()).unwrap_or(0);
    let shift = if week < 10 { 10 } else { 100 };
    year * shift + week
}

/// Calendar year, used on propane rows alongside the year-week.
pub fn calendar_year(date: NaiveDate) -> i32 {
    date.year()
}
