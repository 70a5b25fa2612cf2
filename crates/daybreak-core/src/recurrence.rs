//! Recurrence rules and the matcher deciding whether a rule applies to a
//! calendar date.
//!
//! Rules are stored as a `(recurrence_type, recurrence_value)` pair:
//! `daily` with no value, `weekly` with a comma separated list of weekday
//! indices (`0` = Sunday) and `monthly` with a day of month. Rows written by
//! older builds or edited by hand may not decode; those become
//! [`Recurrence::Invalid`] and simply never match.

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use tracing::warn;

use crate::datetime::weekday_index;
use crate::error::{CoreError, CoreResult};

const DAY_NAMES: [&str; 7] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecurrenceKind {
    Daily,
    Weekly,
    Monthly,
}

impl RecurrenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
        }
    }
}

impl FromStr for RecurrenceKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(Self::Daily),
            "weekly" => Ok(Self::Weekly),
            "monthly" => Ok(Self::Monthly),
            other => Err(CoreError::invalid(format!(
                "unknown recurrence type: {other:?}"
            ))),
        }
    }
}

/// Set of weekday indices, Sunday = 0 through Saturday = 6.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn new() -> Self {
        Self(0)
    }

    /// Returns `false` when `index` is not a weekday.
    pub fn insert(&mut self, index: u8) -> bool {
        if index > 6 {
            return false;
        }
        self.0 |= 1 << index;
        true
    }

    pub fn contains(&self, index: u8) -> bool {
        index <= 6 && self.0 & (1 << index) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        (0..7u8).filter(|idx| self.contains(*idx))
    }

    /// Strict parse used when creating tasks. Accepts indices (`1,3`) and
    /// English day names (`mon,wednesday`).
    pub fn parse(raw: &str) -> CoreResult<Self> {
        let mut set = Self::new();
        for token in raw.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let index = parse_weekday_token(token).ok_or_else(|| {
                CoreError::invalid(format!("unknown weekday: {token:?}"))
            })?;
            set.insert(index);
        }
        if set.is_empty() {
            return Err(CoreError::invalid(
                "weekly recurrence needs at least one weekday",
            ));
        }
        Ok(set)
    }

    /// Lenient parse for stored values; unknown tokens are dropped.
    fn from_storage(raw: &str) -> Self {
        let mut set = Self::new();
        for token in raw.split(',').map(str::trim) {
            if let Ok(index) = token.parse::<u8>() {
                set.insert(index);
            }
        }
        set
    }

    pub fn to_storage(&self) -> String {
        self.iter()
            .map(|idx| idx.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Position of the earliest member in a Monday-first week, used to
    /// group tasks by weekday.
    pub fn first_in_monday_week(&self) -> Option<u8> {
        self.iter().map(|idx| (idx + 6) % 7).min()
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(|idx| DAY_NAMES[idx as usize]).collect();
        write!(f, "{}", names.join(", "))
    }
}

fn parse_weekday_token(token: &str) -> Option<u8> {
    if let Ok(index) = token.parse::<u8>() {
        return (index <= 6).then_some(index);
    }

    let lower = token.to_ascii_lowercase();
    let index = match lower.as_str() {
        "sun" | "sunday" => 0,
        "mon" | "monday" => 1,
        "tue" | "tues" | "tuesday" => 2,
        "wed" | "wednesday" => 3,
        "thu" | "thur" | "thurs" | "thursday" => 4,
        "fri" | "friday" => 5,
        "sat" | "saturday" => 6,
        _ => return None,
    };
    Some(index)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recurrence {
    Daily,
    Weekly(WeekdaySet),
    /// Day of month, 1 through 31.
    Monthly(u8),
    /// A stored rule that could not be decoded. Never matches.
    Invalid { kind: String, value: Option<String> },
}

impl Recurrence {
    /// Validating constructor for new tasks.
    pub fn parse(kind: &str, value: Option<&str>) -> CoreResult<Self> {
        let value = value.map(str::trim).filter(|v| !v.is_empty());
        match kind.parse::<RecurrenceKind>()? {
            RecurrenceKind::Daily => Ok(Self::Daily),
            RecurrenceKind::Weekly => {
                let raw = value.ok_or_else(|| {
                    CoreError::invalid("weekly recurrence needs at least one weekday")
                })?;
                Ok(Self::Weekly(WeekdaySet::parse(raw)?))
            }
            RecurrenceKind::Monthly => {
                let raw = value.ok_or_else(|| {
                    CoreError::invalid("monthly recurrence needs a day of month")
                })?;
                let day = raw
                    .parse::<u8>()
                    .ok()
                    .filter(|d| (1..=31).contains(d))
                    .ok_or_else(|| {
                        CoreError::invalid(format!("invalid day of month: {raw:?}"))
                    })?;
                Ok(Self::Monthly(day))
            }
        }
    }

    /// Decodes a stored rule without failing.
    pub fn from_storage(kind: &str, value: Option<&str>) -> Self {
        let invalid = || {
            warn!(kind, value = ?value, "undecodable recurrence rule; it will never match");
            Self::Invalid {
                kind: kind.to_string(),
                value: value.map(str::to_string),
            }
        };

        match (kind, value.map(str::trim)) {
            ("daily", _) => Self::Daily,
            ("weekly", Some(raw)) => Self::Weekly(WeekdaySet::from_storage(raw)),
            ("monthly", Some(raw)) => match raw.parse::<u8>() {
                Ok(day) if (1..=31).contains(&day) => Self::Monthly(day),
                _ => invalid(),
            },
            _ => invalid(),
        }
    }

    /// Whether the rule schedules the task on `date`.
    pub fn matches(&self, date: NaiveDate) -> bool {
        match self {
            Self::Daily => true,
            Self::Weekly(days) => days.contains(weekday_index(date)),
            Self::Monthly(day) => date.day() == u32::from(*day),
            Self::Invalid { .. } => false,
        }
    }

    pub fn kind_str(&self) -> &str {
        match self {
            Self::Daily => RecurrenceKind::Daily.as_str(),
            Self::Weekly(_) => RecurrenceKind::Weekly.as_str(),
            Self::Monthly(_) => RecurrenceKind::Monthly.as_str(),
            Self::Invalid { kind, .. } => kind,
        }
    }

    pub fn storage_value(&self) -> Option<String> {
        match self {
            Self::Daily => None,
            Self::Weekly(days) => Some(days.to_storage()),
            Self::Monthly(day) => Some(day.to_string()),
            Self::Invalid { value, .. } => value.clone(),
        }
    }

    /// Sort key for the manage listing: weekly tasks by their first day in a
    /// Monday-first week, everything else after.
    pub fn manage_rank(&self) -> u8 {
        match self {
            Self::Weekly(days) => days.first_in_monday_week().unwrap_or(99),
            _ => 99,
        }
    }
}

impl fmt::Display for Recurrence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Daily => write!(f, "Daily"),
            Self::Weekly(days) => write!(f, "{days}"),
            Self::Monthly(day) => write!(f, "Monthly on day {day}"),
            Self::Invalid { kind, value } => {
                write!(f, "invalid ({kind}: {})", value.as_deref().unwrap_or("-"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::datetime::parse_iso_date;

    fn date(raw: &str) -> NaiveDate {
        parse_iso_date(raw).expect("valid date")
    }

    fn days_from(start: &str, count: i64) -> impl Iterator<Item = NaiveDate> {
        let start = date(start);
        (0..count).map(move |offset| start + Duration::days(offset))
    }

    #[test]
    fn daily_matches_every_date() {
        let rule = Recurrence::parse("daily", None).expect("daily");
        assert!(days_from("2023-12-25", 800).all(|d| rule.matches(d)));
    }

    #[test]
    fn weekly_matches_exactly_its_weekdays() {
        let rule = Recurrence::parse("weekly", Some("1,3,5")).expect("weekly");
        for d in days_from("2024-01-01", 60) {
            let expected = matches!(weekday_index(d), 1 | 3 | 5);
            assert_eq!(rule.matches(d), expected, "date {d}");
        }
    }

    #[test]
    fn monthly_never_clamps_short_months() {
        let rule = Recurrence::parse("monthly", Some("31")).expect("monthly");
        assert!(rule.matches(date("2024-01-31")));
        assert!(!days_from("2024-04-01", 30).any(|d| rule.matches(d)));
        assert!(!days_from("2024-02-01", 29).any(|d| rule.matches(d)));
        assert!(!rule.matches(date("2024-05-01")));
    }

    #[test]
    fn monthly_matches_day_of_month() {
        let rule = Recurrence::parse("monthly", Some("15")).expect("monthly");
        let hits: Vec<NaiveDate> = days_from("2024-01-01", 366)
            .filter(|d| rule.matches(*d))
            .collect();
        assert_eq!(hits.len(), 12);
        assert!(hits.iter().all(|d| d.day() == 15));
    }

    #[test]
    fn malformed_stored_rules_never_match() {
        let cases = [
            Recurrence::from_storage("weekly", None),
            Recurrence::from_storage("weekly", Some("")),
            Recurrence::from_storage("weekly", Some("x,9")),
            Recurrence::from_storage("monthly", Some("0")),
            Recurrence::from_storage("monthly", Some("32")),
            Recurrence::from_storage("monthly", None),
            Recurrence::from_storage("yearly", Some("1")),
        ];
        for rule in cases {
            assert!(
                !days_from("2024-01-01", 60).any(|d| rule.matches(d)),
                "rule {rule:?} should never match"
            );
        }
    }

    #[test]
    fn strict_parse_rejects_incomplete_rules() {
        assert!(Recurrence::parse("weekly", None).is_err());
        assert!(Recurrence::parse("weekly", Some(" , ")).is_err());
        assert!(Recurrence::parse("weekly", Some("7")).is_err());
        assert!(Recurrence::parse("monthly", Some("0")).is_err());
        assert!(Recurrence::parse("monthly", Some("thirty")).is_err());
        assert!(Recurrence::parse("hourly", None).is_err());
    }

    #[test]
    fn weekday_names_and_indices_mix() {
        let rule = Recurrence::parse("Weekly", Some("mon, 3,Friday")).expect("weekly");
        assert_eq!(rule.storage_value().as_deref(), Some("1,3,5"));
        assert_eq!(rule.to_string(), "Mon, Wed, Fri");
    }

    #[test]
    fn manage_rank_orders_monday_first() {
        let monday = Recurrence::parse("weekly", Some("1")).expect("weekly");
        let sunday = Recurrence::parse("weekly", Some("0")).expect("weekly");
        let sun_and_tue = Recurrence::parse("weekly", Some("0,2")).expect("weekly");
        assert_eq!(monday.manage_rank(), 0);
        assert_eq!(sunday.manage_rank(), 6);
        assert_eq!(sun_and_tue.manage_rank(), 1);
        assert_eq!(Recurrence::Daily.manage_rank(), 99);
    }
}
