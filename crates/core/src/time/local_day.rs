use anyhow::Context;
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc};

pub fn offset(utc_offset_hours: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(utc_offset_hours * 3600)
        .with_context(|| format!("invalid UTC offset: {utc_offset_hours}h"))
}

/// Calendar day of `now_utc` in the local fixed-offset timezone.
pub fn local_day(now_utc: DateTime<Utc>, utc_offset_hours: i32) -> anyhow::Result<NaiveDate> {
    Ok(now_utc.with_timezone(&offset(utc_offset_hours)?).date_naive())
}

/// `YYYYMMDD`, used in file paths and job keys.
pub fn day_key(day: NaiveDate) -> String {
    day.format("%Y%m%d").to_string()
}

/// Local midnight that ends `day`.
pub fn valid_until(day: NaiveDate, utc_offset_hours: i32) -> anyhow::Result<DateTime<FixedOffset>> {
    let tz = offset(utc_offset_hours)?;
    let next = day + Duration::days(1);
    tz.from_local_datetime(&next.and_time(NaiveTime::MIN))
        .single()
        .with_context(|| format!("ambiguous local midnight for {next}"))
}

/// Cutoff instant for a draw: `cutoff` local wall-clock time on the draw date, expressed in UTC.
pub fn draw_cutoff_utc(
    draw_date: NaiveDate,
    cutoff: NaiveTime,
    utc_offset_hours: i32,
) -> anyhow::Result<DateTime<Utc>> {
    let tz = offset(utc_offset_hours)?;
    let local = tz
        .from_local_datetime(&draw_date.and_time(cutoff))
        .single()
        .with_context(|| format!("ambiguous draw cutoff for {draw_date}"))?;
    Ok(local.with_timezone(&Utc))
}
