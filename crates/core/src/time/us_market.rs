use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::collections::HashSet;

// Fixed ET offset (no DST handling); the 30-minute pad on the cutoff absorbs
// the difference for this purpose.
const ET_OFFSET_SECS: i32 = -5 * 3600;

// If the job runs before this time (ET), treat it as "yesterday's" market
// date. NYSE close is 16:00 ET; we use a slightly conservative cutoff.
const CLOSE_CUTOFF_HOUR_ET: u32 = 16;
const CLOSE_CUTOFF_MINUTE_ET: u32 = 30;

pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return Ok(NaiveDate::parse_from_str(s, "%Y-%m-%d")?);
    }

    let et = chrono::FixedOffset::east_opt(ET_OFFSET_SECS).context("invalid ET offset")?;
    let now_et = now_utc.with_timezone(&et);

    let cutoff_reached =
        (now_et.hour(), now_et.minute()) >= (CLOSE_CUTOFF_HOUR_ET, CLOSE_CUTOFF_MINUTE_ET);
    let mut date = now_et.date_naive();
    if !cutoff_reached {
        date = date - Duration::days(1);
    }

    // Roll back to the previous trading day.
    let holidays = configured_holidays();
    while is_weekend(date) || holidays.contains(&date) {
        date = date - Duration::days(1);
    }

    Ok(date)
}

fn is_weekend(date: NaiveDate) -> bool {
    matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun)
}

// Extend via MARKET_HOLIDAYS="YYYY-MM-DD,YYYY-MM-DD"; no built-in NYSE
// calendar.
fn configured_holidays() -> HashSet<NaiveDate> {
    let mut out = HashSet::new();
    if let Ok(raw) = std::env::var("MARKET_HOLIDAYS") {
        for part in raw.split(',') {
            if let Ok(d) = NaiveDate::parse_from_str(part.trim(), "%Y-%m-%d") {
                out.insert(d);
            }
        }
    }
    out
}
