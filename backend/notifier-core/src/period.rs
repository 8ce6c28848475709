// src/period.rs
use chrono::{DateTime, Datelike, Duration, LocalResult, Months, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;
use serde::Serialize;
#[cfg(test)]
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PeriodError {
    #[error("months_ago={months_ago} is outside the supported calendar range")]
    OutOfRange { months_ago: u32 },
}

// --- Clock ---

/// Source of the reference instant used for period calculation.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock pinned to a given instant.
#[cfg(test)]
#[derive(Debug, Clone)]
pub struct FixedClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

#[cfg(test)]
impl FixedClock {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(at)),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        if let Ok(mut guard) = self.current_time.lock() {
            *guard = at;
        }
    }
}

#[cfg(test)]
impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.current_time.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

// --- Month arithmetic ---

/// Last day of the month starting at `first`, or `None` past chrono's range.
fn last_of_month(first: NaiveDate) -> Option<NaiveDate> {
    match first.month() {
        12 => first.with_day(31),
        _ => first.checked_add_months(Months::new(1))?.pred_opt(),
    }
}

/// First day of the current month in the business timezone.
fn current_month_start(now: DateTime<Utc>, tz: Tz) -> Option<NaiveDate> {
    now.with_timezone(&tz).date_naive().with_day(1)
}

/// First calendar day of the month `months_ago` months before the current one.
pub fn first_day_of_months_ago(now: DateTime<Utc>, months_ago: u32, tz: Tz) -> Option<NaiveDate> {
    current_month_start(now, tz)?.checked_sub_months(Months::new(months_ago))
}

/// Last calendar day of the month `months_ago` months before the current one.
pub fn last_day_of_months_ago(now: DateTime<Utc>, months_ago: u32, tz: Tz) -> Option<NaiveDate> {
    last_of_month(first_day_of_months_ago(now, months_ago, tz)?)
}

/// Midnight of `date` in `tz`. A DST gap at midnight resolves to the earliest valid instant.
pub fn midnight_in(date: NaiveDate, tz: Tz) -> DateTime<Tz> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => earliest,
        LocalResult::None => {
            let shifted = naive + Duration::hours(1);
            tz.from_local_datetime(&shifted)
                .earliest()
                .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        }
    }
}

// --- Period ---

/// One calendar month used as the reporting window. Both ends are inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Period {
    pub start: NaiveDate,
    pub end: NaiveDate,
    #[serde(skip)]
    tz: Tz,
}

impl Period {
    pub fn months_ago(now: DateTime<Utc>, months_ago: u32, tz: Tz) -> Result<Self, PeriodError> {
        match (
            first_day_of_months_ago(now, months_ago, tz),
            last_day_of_months_ago(now, months_ago, tz),
        ) {
            (Some(start), Some(end)) => Ok(Self { start, end, tz }),
            _ => Err(PeriodError::OutOfRange { months_ago }),
        }
    }

    #[cfg(test)]
    pub fn for_month(year: i32, month: u32, tz: Tz) -> Option<Self> {
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let end = last_of_month(start)?;
        Some(Self { start, end, tz })
    }

    /// The month immediately before this one, `None` at the start of chrono's range.
    pub fn previous(&self) -> Option<Self> {
        let end = self.start.pred_opt()?;
        Some(Self {
            start: end.with_day(1)?,
            end,
            tz: self.tz,
        })
    }

    /// Start of the period anchored to midnight in the business timezone.
    pub fn first_instant(&self) -> DateTime<Tz> {
        midnight_in(self.start, self.tz)
    }

    /// "MM/YYYY" as printed on the form.
    pub fn month_year(&self) -> String {
        format!("{:02}/{}", self.start.month(), self.start.year())
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}
