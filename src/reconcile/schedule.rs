use chrono::{DateTime, Days, FixedOffset, Months, NaiveDate, NaiveTime, TimeZone, Timelike};

use crate::config::Config;
use crate::model::{BookingRecord, BookingState, Epoch, HOUR, MINUTE, RepeatRule, SLOT};

pub(crate) fn now() -> Epoch {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as Epoch)
        .unwrap_or(0)
}

// ── Quarter-hour grid ────────────────────────────────────────────

/// Round down to the 15-minute grid.
pub fn trunc_to_slot(t: Epoch) -> Epoch {
    t - t.rem_euclid(SLOT)
}

/// Round up to the 15-minute grid.
pub fn ceil_to_slot(t: Epoch) -> Epoch {
    let rem = t.rem_euclid(SLOT);
    if rem == 0 { t } else { t + SLOT - rem }
}

/// The post-change cool-down: at least 15 minutes from `now`, landing on a
/// grid boundary.
pub fn cooldown_deadline(now: Epoch) -> Epoch {
    ceil_to_slot(now + 15 * MINUTE)
}

fn round_time_to_slot(t: NaiveTime) -> NaiveTime {
    let secs = t.num_seconds_from_midnight() as Epoch;
    let mut rounded = ((secs + SLOT / 2) / SLOT) * SLOT;
    if rounded >= 24 * HOUR {
        rounded = 24 * HOUR - SLOT;
    }
    NaiveTime::from_num_seconds_from_midnight_opt(rounded as u32, 0).unwrap_or(t)
}

// ── Parsing & normalization ──────────────────────────────────────

fn parse_date(date: &str) -> Option<NaiveDate> {
    let day = date.split('T').next().unwrap_or(date);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

fn parse_time(time: &str, offset: &FixedOffset) -> Option<NaiveTime> {
    if time.contains('T') {
        return DateTime::parse_from_rfc3339(time)
            .ok()
            .map(|dt| dt.with_timezone(offset).time());
    }
    NaiveTime::parse_from_str(time, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(time, "%H:%M:%S"))
        .ok()
}

/// Derive the absolute instants for one record: clamp the duration, parse
/// the date and time (rounded to the quarter-hour grid the remote books in)
/// and apply the configured UTC offset. Malformed input is a terminal
/// validation failure, reported by the returned message.
pub fn normalize(record: &mut BookingRecord, cfg: &Config) -> Result<(), &'static str> {
    record.duration_min = record
        .duration_min
        .clamp(cfg.min_duration_min, cfg.max_duration_min);

    let date = parse_date(&record.date).ok_or("date not valid yyyy-mm-dd")?;
    record.epoch_date = date.and_time(NaiveTime::MIN).and_utc().timestamp();

    let time = parse_time(&record.time, &cfg.utc_offset).ok_or("time not valid hh:mm")?;
    let local = date.and_time(round_time_to_slot(time));
    let start = cfg
        .utc_offset
        .from_local_datetime(&local)
        .single()
        .ok_or("time not valid hh:mm")?;
    record.epoch_start = start.timestamp();
    record.epoch_end = record.epoch_start + record.duration_min * MINUTE;
    Ok(())
}

pub fn fmt_local_hhmm(t: Epoch, offset: &FixedOffset) -> String {
    match DateTime::from_timestamp(t, 0) {
        Some(dt) => dt.with_timezone(offset).format("%H:%M").to_string(),
        None => "??:??".into(),
    }
}

// ── Repeat & lifecycle policy ────────────────────────────────────

/// Next date for a repeating record, derived from its current start.
/// Calendar-aware: monthly/yearly clamp to the shorter target month.
pub fn advance_date(epoch_start: Epoch, rule: RepeatRule, offset: &FixedOffset) -> Option<String> {
    let day = DateTime::from_timestamp(epoch_start, 0)?
        .with_timezone(offset)
        .date_naive();
    let next = match rule {
        RepeatRule::None => return None,
        RepeatRule::Daily => day.checked_add_days(Days::new(1))?,
        RepeatRule::Weekly => day.checked_add_days(Days::new(7))?,
        RepeatRule::Monthly => day.checked_add_months(Months::new(1))?,
        RepeatRule::Yearly => day.checked_add_months(Months::new(12))?,
    };
    Some(next.format("%Y-%m-%d").to_string())
}

/// A repeating record regenerates once its end time has passed.
pub fn repeat_due(record: &BookingRecord, now: Epoch) -> bool {
    !record.repeat.is_none() && record.epoch_end < now
}

/// Non-repeating records a day past their end are purged.
pub fn expired(record: &BookingRecord, now: Epoch) -> bool {
    record.repeat.is_none() && record.epoch_end < now - 24 * HOUR
}

/// A finished booking is confirmed once inside the configured window before
/// its start.
pub fn confirm_due(record: &BookingRecord, cfg: &Config, now: Epoch) -> bool {
    record.state == BookingState::Finished
        && cfg.confirm_time_min > 0
        && now >= record.epoch_start - cfg.confirm_time_min * MINUTE
        && now <= record.epoch_start
}
