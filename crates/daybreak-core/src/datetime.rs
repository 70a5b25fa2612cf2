use std::fmt;
use std::str::FromStr;

use chrono::{
  Datelike,
  Duration,
  Local,
  NaiveDate,
  NaiveDateTime,
  Timelike
};
use parking_lot::Mutex;
use regex::Regex;

use crate::error::{
  CoreError,
  CoreResult
};

pub const ISO_DATE_FORMAT: &str =
  "%Y-%m-%d";

const MINUTES_PER_DAY: u16 = 24 * 60;

/// Source of the local wall-clock.
///
/// Everything that needs "now" takes
/// one of these so reset boundaries
/// can be exercised with synthetic
/// instants.
pub trait Clock: Send + Sync {
  fn now(&self) -> NaiveDateTime;

  fn today(&self) -> NaiveDate {
    self.now().date()
  }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> NaiveDateTime {
    Local::now().naive_local()
  }
}

#[derive(Debug)]
pub struct FixedClock {
  now: Mutex<NaiveDateTime>
}

impl FixedClock {
  pub fn new(
    now: NaiveDateTime
  ) -> Self {
    Self {
      now: Mutex::new(now)
    }
  }

  pub fn advance(
    &self,
    by: Duration
  ) {
    let mut guard = self.now.lock();
    *guard += by;
  }
}

impl Clock for FixedClock {
  fn now(&self) -> NaiveDateTime {
    *self.now.lock()
  }
}

/// Wall-clock time of day with minute
/// precision, rendered as `HH:MM`.
#[derive(
  Debug,
  Clone,
  Copy,
  PartialEq,
  Eq,
  PartialOrd,
  Ord,
  Hash,
)]
pub struct TimeOfDay {
  hour:   u8,
  minute: u8
}

impl TimeOfDay {
  #[must_use]
  pub fn new(
    hour: u8,
    minute: u8
  ) -> Option<Self> {
    (hour < 24 && minute < 60)
      .then_some(Self { hour, minute })
  }

  #[must_use]
  pub fn of(
    now: &NaiveDateTime
  ) -> Self {
    Self {
      hour:   now.hour() as u8,
      minute: now.minute() as u8
    }
  }

  pub fn parse(
    raw: &str
  ) -> CoreResult<Self> {
    let clock_re = Regex::new(
      r"^(?P<hour>\d{1,2}):(?P<minute>\d{2})$"
    )
    .map_err(|e| {
      CoreError::invalid(format!(
        "internal regex compile \
         failure: {e}"
      ))
    })?;

    let trimmed = raw.trim();
    let caps =
      clock_re.captures(trimmed).ok_or_else(
        || {
          CoreError::invalid(format!(
            "expected HH:MM time, got \
             {raw:?}"
          ))
        }
      )?;

    let hour = caps["hour"]
      .parse::<u8>()
      .map_err(|_| {
        CoreError::invalid(format!(
          "invalid hour in {raw:?}"
        ))
      })?;
    let minute = caps["minute"]
      .parse::<u8>()
      .map_err(|_| {
        CoreError::invalid(format!(
          "invalid minute in {raw:?}"
        ))
      })?;

    Self::new(hour, minute).ok_or_else(
      || {
        CoreError::invalid(format!(
          "time out of range: {raw:?}"
        ))
      }
    )
  }

  #[must_use]
  pub fn minutes_since_midnight(
    &self
  ) -> u16 {
    u16::from(self.hour) * 60
      + u16::from(self.minute)
  }

  /// One hour earlier, wrapping from
  /// `00:xx` to `23:xx`.
  #[must_use]
  pub fn one_hour_earlier(
    &self
  ) -> Self {
    let minutes = (self
      .minutes_since_midnight()
      + MINUTES_PER_DAY
      - 60)
      % MINUTES_PER_DAY;
    Self {
      hour:   (minutes / 60) as u8,
      minute: (minutes % 60) as u8
    }
  }

  /// `9:05 AM` style rendering.
  #[must_use]
  pub fn format_12h(&self) -> String {
    let suffix = if self.hour >= 12 {
      "PM"
    } else {
      "AM"
    };
    let hour12 = match self.hour % 12 {
      | 0 => 12,
      | h => h
    };
    format!(
      "{hour12}:{:02} {suffix}",
      self.minute
    )
  }
}

impl fmt::Display for TimeOfDay {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>
  ) -> fmt::Result {
    write!(
      f,
      "{:02}:{:02}",
      self.hour, self.minute
    )
  }
}

impl FromStr for TimeOfDay {
  type Err = CoreError;

  fn from_str(
    s: &str
  ) -> Result<Self, Self::Err> {
    Self::parse(s)
  }
}

pub fn parse_iso_date(
  raw: &str
) -> CoreResult<NaiveDate> {
  let date_re =
    Regex::new(r"^\d{4}-\d{2}-\d{2}$")
      .map_err(|e| {
        CoreError::invalid(format!(
          "internal regex compile \
           failure: {e}"
        ))
      })?;

  let trimmed = raw.trim();
  if !date_re.is_match(trimmed) {
    return Err(CoreError::invalid(
      format!(
        "expected YYYY-MM-DD date, got \
         {raw:?}"
      )
    ));
  }

  NaiveDate::parse_from_str(
    trimmed,
    ISO_DATE_FORMAT
  )
  .map_err(|err| {
    CoreError::invalid(format!(
      "invalid calendar date {raw:?}: \
       {err}"
    ))
  })
}

#[must_use]
pub fn format_iso_date(
  date: NaiveDate
) -> String {
  date
    .format(ISO_DATE_FORMAT)
    .to_string()
}

/// Accepts an ISO date or one of
/// `today`, `yesterday`, `tomorrow`.
pub fn resolve_date_expr(
  raw: &str,
  today: NaiveDate
) -> CoreResult<NaiveDate> {
  match raw
    .trim()
    .to_ascii_lowercase()
    .as_str()
  {
    | "today" => Ok(today),
    | "yesterday" => {
      Ok(today - Duration::days(1))
    }
    | "tomorrow" => {
      Ok(today + Duration::days(1))
    }
    | _ => parse_iso_date(raw)
  }
}

/// Weekday index with Sunday as 0.
#[must_use]
pub fn weekday_index(
  date: NaiveDate
) -> u8 {
  date.weekday().num_days_from_sunday()
    as u8
}

/// The calendar date completions made
/// at `now` are attributed to.
///
/// Before the task's reset time the
/// previous day is still current.
#[must_use]
pub fn effective_date(
  reset_time: Option<TimeOfDay>,
  now: NaiveDateTime
) -> NaiveDate {
  let today = now.date();
  let Some(reset) = reset_time else {
    return today;
  };

  if TimeOfDay::of(&now)
    .minutes_since_midnight()
    < reset.minutes_since_midnight()
  {
    today.pred_opt().unwrap_or(today)
  } else {
    today
  }
}
