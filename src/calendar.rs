//! Period resolution: map an instant to its calendar-aligned budget window.

use chrono::{
    DateTime, Datelike, Days, Duration, FixedOffset, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;

use crate::error::{DcaError, Result};
use crate::types::Period;

/// Calendar capability the resolver depends on.
pub trait Calendar {
    /// Express a UTC instant in the calendar's local time.
    fn localize(&self, now: DateTime<Utc>) -> DateTime<FixedOffset>;

    /// Most recent Monday 00:00 local at or before `now`.
    fn week_start(&self, now: DateTime<Utc>) -> Result<DateTime<FixedOffset>>;

    /// ISO-8601 week identifier (`YYYY-Www`) of the local date of `instant`.
    fn iso_week_key(&self, instant: &DateTime<FixedOffset>) -> String {
        let week = instant.date_naive().iso_week();
        format!("{}-W{:02}", week.year(), week.week())
    }
}

/// IANA timezone calendar backed by `chrono-tz`.
#[derive(Debug, Clone, Copy)]
pub struct TzCalendar {
    tz: Tz,
}

impl TzCalendar {
    pub fn new(name: &str) -> Result<Self> {
        let tz = name.trim().parse::<Tz>().map_err(|_| {
            DcaError::InvalidConfiguration(format!("unknown IANA timezone '{name}'"))
        })?;
        Ok(Self { tz })
    }

    pub fn name(&self) -> &'static str {
        self.tz.name()
    }

    /// First valid instant at or after a local wall-clock time. Midnight can
    /// fall inside a DST gap in some zones.
    fn first_instant_at_or_after(&self, local: NaiveDateTime) -> Option<DateTime<Tz>> {
        (0..=12)
            .map(|step| local + Duration::minutes(15 * step))
            .find_map(|candidate| self.tz.from_local_datetime(&candidate).earliest())
    }
}

impl Calendar for TzCalendar {
    fn localize(&self, now: DateTime<Utc>) -> DateTime<FixedOffset> {
        now.with_timezone(&self.tz).fixed_offset()
    }

    fn week_start(&self, now: DateTime<Utc>) -> Result<DateTime<FixedOffset>> {
        let local = now.with_timezone(&self.tz);
        let back = u64::from(local.weekday().num_days_from_monday());
        let monday = local
            .date_naive()
            .checked_sub_days(Days::new(back))
            .ok_or_else(|| DcaError::InvalidConfiguration(format!("date out of range: {now}")))?;
        self.first_instant_at_or_after(monday.and_time(NaiveTime::MIN))
            .map(|dt| dt.fixed_offset())
            .ok_or_else(|| {
                DcaError::InvalidConfiguration(format!(
                    "no valid local midnight on {monday} in {}",
                    self.tz.name()
                ))
            })
    }
}

/// A half-open window `[start, start + period.length())`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodWindow {
    pub key: String,
    pub start: DateTime<FixedOffset>,
}

pub fn resolve<C: Calendar + ?Sized>(
    calendar: &C,
    now: DateTime<Utc>,
    period: Period,
) -> Result<PeriodWindow> {
    match period {
        Period::Week => {
            let start = calendar.week_start(now)?;
            let key = calendar.iso_week_key(&start);
            Ok(PeriodWindow { key, start })
        }
    }
}
