use crate::event::DatePrecision;
use chrono::NaiveDate;
use once_cell::sync::Lazy;
use regex::Regex;

static ISO_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})-(\d{1,2})\b").expect("iso pattern"));
static NUMERIC_DATE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,2})[/.](\d{1,2})[/.](\d{4})\b").expect("numeric pattern"));
static NAMED_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(january|february|march|april|may|june|july|august|september|october|november|december|jan|feb|mar|apr|jun|jul|aug|sep|sept|oct|nov|dec)\.?\s+(?:(\d{1,2})(?:st|nd|rd|th)?,?\s+)?(\d{4})\b",
    )
    .expect("named month pattern")
});
static MONTH_YEAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{4})-(\d{1,2})\b").expect("month-year pattern"));
static YEAR_ONLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(19\d{2}|20\d{2})\b").expect("year pattern"));
static APPROX_YEAR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:~|circa|around|about)\s*(19\d{2}|20\d{2})\b").expect("approx pattern")
});

/// A date pulled out of free text together with its precision and the
/// span of text it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDate {
    pub date: NaiveDate,
    pub precision: DatePrecision,
    pub matched: String,
}

fn month_number(name: &str) -> Option<u32> {
    let month = match name.to_lowercase().trim_end_matches('.') {
        "january" | "jan" => 1,
        "february" | "feb" => 2,
        "march" | "mar" => 3,
        "april" | "apr" => 4,
        "may" => 5,
        "june" | "jun" => 6,
        "july" | "jul" => 7,
        "august" | "aug" => 8,
        "september" | "sep" | "sept" => 9,
        "october" | "oct" => 10,
        "november" | "nov" => 11,
        "december" | "dec" => 12,
        _ => return None,
    };
    Some(month)
}

/// Extract every recognizable date from text. More precise patterns win:
/// a span already claimed by an exact date is not re-reported as a bare
/// year.
pub fn extract_dates(text: &str) -> Vec<ExtractedDate> {
    let mut found: Vec<(usize, usize, ExtractedDate)> = Vec::new();
    let claimed = |found: &[(usize, usize, ExtractedDate)], start: usize, end: usize| {
        found.iter().any(|(s, e, _)| start < *e && end > *s)
    };

    for caps in ISO_DATE.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        let (year, month, day) = (
            caps[1].parse::<i32>().unwrap_or(0),
            caps[2].parse::<u32>().unwrap_or(0),
            caps[3].parse::<u32>().unwrap_or(0),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision: DatePrecision::ExactDate,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    for caps in NUMERIC_DATE.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if claimed(&found, whole.start(), whole.end()) {
            continue;
        }
        let (first, second, year) = (
            caps[1].parse::<u32>().unwrap_or(0),
            caps[2].parse::<u32>().unwrap_or(0),
            caps[3].parse::<i32>().unwrap_or(0),
        );
        // US month/day first, then EU day/month
        let date = NaiveDate::from_ymd_opt(year, first, second)
            .or_else(|| NaiveDate::from_ymd_opt(year, second, first));
        if let Some(date) = date {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision: DatePrecision::ExactDate,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    for caps in NAMED_MONTH.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if claimed(&found, whole.start(), whole.end()) {
            continue;
        }
        let Some(month) = month_number(&caps[1]) else {
            continue;
        };
        let year = caps[3].parse::<i32>().unwrap_or(0);
        let (day, precision) = match caps.get(2) {
            Some(d) => (
                d.as_str().parse::<u32>().unwrap_or(1),
                DatePrecision::ExactDate,
            ),
            None => (1, DatePrecision::Month),
        };
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    for caps in MONTH_YEAR.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if claimed(&found, whole.start(), whole.end()) {
            continue;
        }
        let (year, month) = (
            caps[1].parse::<i32>().unwrap_or(0),
            caps[2].parse::<u32>().unwrap_or(0),
        );
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, 1) {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision: DatePrecision::Month,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    for caps in APPROX_YEAR.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if claimed(&found, whole.start(), whole.end()) {
            continue;
        }
        let year = caps[1].parse::<i32>().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision: DatePrecision::ApproxYear,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    for caps in YEAR_ONLY.captures_iter(text) {
        let whole = caps.get(0).expect("match");
        if claimed(&found, whole.start(), whole.end()) {
            continue;
        }
        let year = caps[1].parse::<i32>().unwrap_or(0);
        if let Some(date) = NaiveDate::from_ymd_opt(year, 1, 1) {
            found.push((
                whole.start(),
                whole.end(),
                ExtractedDate {
                    date,
                    precision: DatePrecision::Year,
                    matched: whole.as_str().to_string(),
                },
            ));
        }
    }

    found.sort_by_key(|(start, _, _)| *start);
    found.into_iter().map(|(_, _, d)| d).collect()
}

/// Parse one date string in any supported format.
pub fn parse_date(raw: &str) -> Option<(NaiveDate, DatePrecision)> {
    let extracted = extract_dates(raw);
    extracted
        .into_iter()
        .min_by_key(|d| d.precision)
        .map(|d| (d.date, d.precision))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iso_date() {
        let dates = extract_dates("joined on 2019-03-15 according to the filing");
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date, NaiveDate::from_ymd_opt(2019, 3, 15).unwrap());
        assert_eq!(dates[0].precision, DatePrecision::ExactDate);
    }

    #[test]
    fn test_us_numeric_date() {
        let dates = extract_dates("filed 06/15/2021 in King County");
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date, NaiveDate::from_ymd_opt(2021, 6, 15).unwrap());
    }

    #[test]
    fn test_eu_numeric_date_fallback() {
        // 25 cannot be a month, so day/month order applies
        let dates = extract_dates("seen 25/06/2021");
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].date, NaiveDate::from_ymd_opt(2021, 6, 25).unwrap());
    }

    #[test]
    fn test_named_month() {
        let dates = extract_dates("graduated in June 2014");
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].precision, DatePrecision::Month);
        assert_eq!(dates[0].date, NaiveDate::from_ymd_opt(2014, 6, 1).unwrap());

        let with_day = extract_dates("married on June 8th, 2019");
        assert_eq!(with_day[0].precision, DatePrecision::ExactDate);
        assert_eq!(
            with_day[0].date,
            NaiveDate::from_ymd_opt(2019, 6, 8).unwrap()
        );
    }

    #[test]
    fn test_year_only_and_approx() {
        let dates = extract_dates("born circa 1987, active since 2010");
        assert_eq!(dates.len(), 2);
        assert_eq!(dates[0].precision, DatePrecision::ApproxYear);
        assert_eq!(dates[0].date.format("%Y").to_string(), "1987");
        assert_eq!(dates[1].precision, DatePrecision::Year);
    }

    #[test]
    fn test_precise_match_not_double_counted_as_year() {
        let dates = extract_dates("on 2019-03-15 exactly");
        assert_eq!(dates.len(), 1);
        assert_eq!(dates[0].precision, DatePrecision::ExactDate);
    }

    #[test]
    fn test_invalid_dates_skipped() {
        assert!(extract_dates("firmware build 2021-13-45 notes").is_empty() ||
            // the bare year may still surface when the full date is invalid
            extract_dates("firmware build 2021-13-45 notes")
                .iter()
                .all(|d| d.precision == DatePrecision::Year));
    }

    #[test]
    fn test_parse_date_prefers_precision() {
        let (date, precision) = parse_date("May 2020").unwrap();
        assert_eq!(precision, DatePrecision::Month);
        assert_eq!(date, NaiveDate::from_ymd_opt(2020, 5, 1).unwrap());
        assert!(parse_date("no dates here").is_none());
    }
}
