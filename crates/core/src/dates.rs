//! Current-date helper and relative date phrase resolution.

use chrono::{Datelike, Duration, Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::errors::DomainError;
use crate::text;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// The current local date as `YYYY-MM-DD`.
pub fn current_date() -> String {
    format_date(today())
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_iso_date(value: &str) -> Result<NaiveDate, DomainError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|_| DomainError::InvalidDate { value: value.to_string() })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn single(day: NaiveDate) -> Self {
        Self { start: day, end: day }
    }

    pub fn to_strings(self) -> [String; 2] {
        [format_date(self.start), format_date(self.end)]
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelativeDate {
    Today,
    Yesterday,
    LastWeek,
    ThisWeek,
    LastMonth,
    ThisMonth,
    LastYear,
    ThisYear,
}

const PHRASES: &[(&str, RelativeDate)] = &[
    ("semana passada", RelativeDate::LastWeek),
    ("ultima semana", RelativeDate::LastWeek),
    ("last week", RelativeDate::LastWeek),
    ("nesta semana", RelativeDate::ThisWeek),
    ("desta semana", RelativeDate::ThisWeek),
    ("esta semana", RelativeDate::ThisWeek),
    ("essa semana", RelativeDate::ThisWeek),
    ("this week", RelativeDate::ThisWeek),
    ("mes passado", RelativeDate::LastMonth),
    ("ultimo mes", RelativeDate::LastMonth),
    ("last month", RelativeDate::LastMonth),
    ("neste mes", RelativeDate::ThisMonth),
    ("deste mes", RelativeDate::ThisMonth),
    ("este mes", RelativeDate::ThisMonth),
    ("esse mes", RelativeDate::ThisMonth),
    ("this month", RelativeDate::ThisMonth),
    ("ano passado", RelativeDate::LastYear),
    ("ultimo ano", RelativeDate::LastYear),
    ("last year", RelativeDate::LastYear),
    ("neste ano", RelativeDate::ThisYear),
    ("deste ano", RelativeDate::ThisYear),
    ("este ano", RelativeDate::ThisYear),
    ("esse ano", RelativeDate::ThisYear),
    ("this year", RelativeDate::ThisYear),
    ("ontem", RelativeDate::Yesterday),
    ("yesterday", RelativeDate::Yesterday),
    ("hoje", RelativeDate::Today),
    ("today", RelativeDate::Today),
];

impl RelativeDate {
    /// First relative date phrase found in free text, accent- and case-insensitive.
    pub fn detect(question: &str) -> Option<Self> {
        let padded = format!(" {} ", text::words(question).join(" "));
        PHRASES
            .iter()
            .find(|(phrase, _)| padded.contains(&format!(" {phrase} ")))
            .map(|(_, relative)| *relative)
    }

    pub fn resolve(self, today: NaiveDate) -> DateRange {
        match self {
            Self::Today => DateRange::single(today),
            Self::Yesterday => DateRange::single(today - Duration::days(1)),
            Self::LastWeek => {
                let this_sunday = start_of_week(today);
                DateRange {
                    start: this_sunday - Duration::days(7),
                    end: this_sunday - Duration::days(1),
                }
            }
            Self::ThisWeek => DateRange { start: start_of_week(today), end: today },
            Self::LastMonth => {
                let first_of_this_month = first_of_month(today);
                let last_of_previous = first_of_this_month - Duration::days(1);
                DateRange { start: first_of_month(last_of_previous), end: last_of_previous }
            }
            Self::ThisMonth => DateRange { start: first_of_month(today), end: today },
            Self::LastYear => {
                let year = today.year() - 1;
                DateRange {
                    start: NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(today),
                    end: NaiveDate::from_ymd_opt(year, 12, 31).unwrap_or(today),
                }
            }
            Self::ThisYear => DateRange {
                start: NaiveDate::from_ymd_opt(today.year(), 1, 1).unwrap_or(today),
                end: today,
            },
        }
    }
}

/// Weeks start on Sunday.
fn start_of_week(day: NaiveDate) -> NaiveDate {
    day - Duration::days(i64::from(day.weekday().num_days_from_sunday()))
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{format_date, parse_iso_date, RelativeDate};

    fn friday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 18).expect("valid date")
    }

    fn resolve(phrase: &str) -> Option<[String; 2]> {
        RelativeDate::detect(phrase).map(|relative| relative.resolve(friday()).to_strings())
    }

    #[test]
    fn yesterday_and_today_resolve_to_single_days() {
        let yesterday = Some(["2025-07-17".to_string(), "2025-07-17".to_string()]);
        let today = Some(["2025-07-18".to_string(), "2025-07-18".to_string()]);

        assert_eq!(resolve("vendas de ontem"), yesterday);
        assert_eq!(resolve("sales from yesterday"), yesterday);
        assert_eq!(resolve("pedidos de HOJE"), today);
        assert_eq!(resolve("orders today?"), today);
    }

    #[test]
    fn last_week_is_the_previous_sunday_to_saturday() {
        let expected = Some(["2025-07-06".to_string(), "2025-07-12".to_string()]);
        assert_eq!(resolve("Quantos pedidos na semana passada"), expected);
        assert_eq!(resolve("orders last week"), expected);

        let sunday = NaiveDate::from_ymd_opt(2025, 7, 13).expect("valid date");
        let range = RelativeDate::LastWeek.resolve(sunday).to_strings();
        assert_eq!(range, ["2025-07-06".to_string(), "2025-07-12".to_string()]);
    }

    #[test]
    fn month_and_year_ranges_cover_whole_periods() {
        assert_eq!(
            resolve("faturamento do mês passado"),
            Some(["2025-06-01".to_string(), "2025-06-30".to_string()])
        );
        assert_eq!(
            resolve("vendas do ano passado"),
            Some(["2024-01-01".to_string(), "2024-12-31".to_string()])
        );
        assert_eq!(
            resolve("pedidos deste mês"),
            Some(["2025-07-01".to_string(), "2025-07-18".to_string()])
        );
        assert_eq!(
            resolve("this week"),
            Some(["2025-07-13".to_string(), "2025-07-18".to_string()])
        );
    }

    #[test]
    fn last_month_handles_january() {
        let january = NaiveDate::from_ymd_opt(2025, 1, 15).expect("valid date");
        let range = RelativeDate::LastMonth.resolve(january).to_strings();
        assert_eq!(range, ["2024-12-01".to_string(), "2024-12-31".to_string()]);
    }

    #[test]
    fn phrases_must_match_whole_words() {
        assert_eq!(RelativeDate::detect("vendas por marca"), None);
        assert_eq!(RelativeDate::detect("anteontem"), None);
        assert_eq!(RelativeDate::detect("todayish numbers"), None);
    }

    #[test]
    fn iso_dates_round_trip() {
        let parsed = parse_iso_date("2025-07-18").expect("valid");
        assert_eq!(format_date(parsed), "2025-07-18");
        assert!(parse_iso_date("18/07/2025").is_err());
    }
}
