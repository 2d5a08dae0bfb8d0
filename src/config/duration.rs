//! `"<amount> <unit>"` durations used for staleness cutoffs.

use chrono::{DateTime, Duration, Months, Utc};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationUnit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
    Days,
    Weeks,
    Months,
    Years,
}

impl DurationUnit {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "ms" | "millisecond" | "milliseconds" => DurationUnit::Milliseconds,
            "s" | "second" | "seconds" => DurationUnit::Seconds,
            "m" | "minute" | "minutes" => DurationUnit::Minutes,
            "h" | "hour" | "hours" => DurationUnit::Hours,
            "d" | "day" | "days" => DurationUnit::Days,
            "w" | "week" | "weeks" => DurationUnit::Weeks,
            "M" | "month" | "months" => DurationUnit::Months,
            "y" | "year" | "years" => DurationUnit::Years,
            _ => return None,
        })
    }

    fn as_str(self) -> &'static str {
        match self {
            DurationUnit::Milliseconds => "milliseconds",
            DurationUnit::Seconds => "seconds",
            DurationUnit::Minutes => "minutes",
            DurationUnit::Hours => "hours",
            DurationUnit::Days => "days",
            DurationUnit::Weeks => "weeks",
            DurationUnit::Months => "months",
            DurationUnit::Years => "years",
        }
    }
}

/// How long a claim may be held before the job counts as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaleAfter {
    pub amount: u32,
    pub unit: DurationUnit,
}

impl StaleAfter {
    /// `now` minus this duration. Fails if the result is not a valid instant.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let amount = i64::from(self.amount);
        let cutoff = match self.unit {
            DurationUnit::Months => now.checked_sub_months(Months::new(self.amount)),
            DurationUnit::Years => self
                .amount
                .checked_mul(12)
                .and_then(|months| now.checked_sub_months(Months::new(months))),
            unit => {
                let delta = match unit {
                    DurationUnit::Milliseconds => Duration::try_milliseconds(amount),
                    DurationUnit::Seconds => Duration::try_seconds(amount),
                    DurationUnit::Minutes => Duration::try_minutes(amount),
                    DurationUnit::Hours => Duration::try_hours(amount),
                    DurationUnit::Days => Duration::try_days(amount),
                    _ => Duration::try_weeks(amount),
                };
                delta.and_then(|delta| now.checked_sub_signed(delta))
            }
        };
        cutoff.ok_or_else(|| {
            Error::Config(format!("staleness cutoff `{self}` before {now} is not a valid date"))
        })
    }
}

impl std::str::FromStr for StaleAfter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let malformed =
            || Error::Config(format!("duration must be in format `<value> <unit>`. Actual: {s:?}"));

        let mut parts = s.split_whitespace();
        let (Some(amount), Some(unit), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed());
        };
        let amount = amount.parse::<u32>().map_err(|_| malformed())?;
        let unit = DurationUnit::parse(unit)
            .ok_or_else(|| Error::Config(format!("unknown duration unit `{unit}` in {s:?}")))?;
        Ok(Self { amount, unit })
    }
}

impl std::fmt::Display for StaleAfter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.amount, self.unit.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_amount_and_unit() {
        let d: StaleAfter = "30 minutes".parse().unwrap();
        assert_eq!(d.amount, 30);
        assert_eq!(d.unit, DurationUnit::Minutes);
        assert_eq!("2 M".parse::<StaleAfter>().unwrap().unit, DurationUnit::Months);
        assert_eq!(" 5   s ".parse::<StaleAfter>().unwrap().amount, 5);
    }

    #[test]
    fn rejects_malformed_values() {
        for bad in ["", "30", "minutes", "thirty minutes", "30 fortnights", "1 2 3", "-5 days"] {
            assert!(bad.parse::<StaleAfter>().is_err(), "{bad:?} parsed");
        }
    }

    #[test]
    fn cutoff_subtracts_from_now() {
        let now = Utc.with_ymd_and_hms(2024, 3, 31, 12, 0, 0).unwrap();
        let d: StaleAfter = "90 minutes".parse().unwrap();
        assert_eq!(
            d.cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 10, 30, 0).unwrap()
        );
        let d: StaleAfter = "1 month".parse().unwrap();
        assert_eq!(
            d.cutoff(now).unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 29, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn out_of_range_cutoff_is_a_config_error() {
        for unit in [DurationUnit::Days, DurationUnit::Years] {
            let d = StaleAfter {
                amount: u32::MAX,
                unit,
            };
            assert!(matches!(d.cutoff(Utc::now()), Err(Error::Config(_))), "{d}");
        }
    }
}
