//! Value coercion for dates, counts and currency
//!
//! Every function returns a reason string on failure; the caller turns it
//! into a row warning and substitutes a default.

use chrono::{Datelike, NaiveDate, NaiveDateTime};

/// Tried in order; the first format that parses wins.
pub const DEFAULT_DATE_FORMATS: &[&str] = &[
    "%m/%d/%Y",
    "%m/%d/%y",
    "%Y-%m-%d",
    "%d/%m/%Y",
    "%Y/%m/%d",
    "%Y%m%d",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%m/%d/%Y %H:%M",
];

pub const MICROS_PER_UNIT: i64 = 1_000_000;

/// Largest magnitude accepted for one cell, counts and spend micros alike.
/// Keeps any realistic number of merged rows far from i64 overflow.
pub const MAX_CELL_VALUE: i64 = 1_000_000_000_000_000;

/// Parse a date against `formats` in order. Datetime formats keep only the date.
pub fn parse_date(value: &str, formats: &[String]) -> Result<NaiveDate, String> {
    let value = value.trim();
    for format in formats {
        let parsed = if format.contains("%H") {
            NaiveDateTime::parse_from_str(value, format).map(|dt| dt.date())
        } else {
            NaiveDate::parse_from_str(value, format)
        };
        // %Y happily reads "25" as year 25; leave two-digit years to %y.
        if let Ok(date) = parsed {
            if date.year() >= 1970 {
                return Ok(date);
            }
        }
    }
    Err("no accepted date format matched".to_string())
}

/// Non-negative integer count. Grouping separators are ignored and a zero
/// fractional part (`"1,024.00"`) is accepted. Blank means 0.
pub fn parse_count(value: &str) -> Result<i64, String> {
    let cleaned: String = value
        .trim()
        .chars()
        .filter(|c| !is_grouping(*c))
        .collect();
    if cleaned.is_empty() {
        return Ok(0);
    }

    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    if !frac.chars().all(|c| c == '0') {
        return Err("fractional count".to_string());
    }
    if whole.starts_with('-') {
        return Err("negative count".to_string());
    }
    let digits = whole.trim_start_matches('+');
    if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
        return match digits.parse::<i64>() {
            Ok(n) if n <= MAX_CELL_VALUE => Ok(n),
            _ => Err("count out of range".to_string()),
        };
    }
    Err("not a number".to_string())
}

/// Currency amount to integer micros, without going through floating point.
///
/// Strips currency symbols, ISO codes, grouping separators and whitespace.
/// Accepts a leading minus or accounting parentheses. Digits beyond the
/// sixth decimal place round half up. Blank means 0.
pub fn parse_currency_micros(value: &str) -> Result<i64, String> {
    let trimmed = value.trim();
    let (negative, body) = if trimmed.starts_with('(') && trimmed.ends_with(')') && trimmed.len() >= 2 {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let mut cleaned: String = body
        .chars()
        .filter(|c| !is_grouping(*c) && !is_currency_symbol(*c) && !c.is_ascii_alphabetic())
        .collect();
    if cleaned.is_empty() {
        return if body.chars().all(is_grouping) {
            Ok(0)
        } else {
            Err("not a currency amount".to_string())
        };
    }

    let mut negative = negative;
    if let Some(rest) = cleaned.strip_prefix('-') {
        negative = !negative;
        cleaned = rest.to_string();
    } else if let Some(rest) = cleaned.strip_prefix('+') {
        cleaned = rest.to_string();
    }

    let (whole, frac) = match cleaned.split_once('.') {
        Some((w, f)) => (w, f),
        None => (cleaned.as_str(), ""),
    };
    let digits_only = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if (whole.is_empty() && frac.is_empty()) || !digits_only(whole) || !digits_only(frac) {
        return Err("not a currency amount".to_string());
    }

    let whole_units: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| "amount out of range".to_string())?
    };

    let mut frac_digits: Vec<u32> = frac.chars().filter_map(|c| c.to_digit(10)).collect();
    let round_up = frac_digits.len() > 6 && frac_digits[6] >= 5;
    frac_digits.resize(6, 0);
    let frac_micros = frac_digits
        .iter()
        .fold(0i64, |acc, d| acc * 10 + i64::from(*d))
        + i64::from(round_up);

    let micros = whole_units
        .checked_mul(MICROS_PER_UNIT)
        .and_then(|m| m.checked_add(frac_micros))
        .filter(|m| *m <= MAX_CELL_VALUE)
        .ok_or_else(|| "amount out of range".to_string())?;

    Ok(if negative { -micros } else { micros })
}

/// Render micros as a decimal amount with two places.
pub fn format_micros(micros: i64) -> String {
    let sign = if micros < 0 { "-" } else { "" };
    let abs = micros.unsigned_abs();
    let cents = (abs + 5_000) / 10_000;
    format!("{}{}.{:02}", sign, cents / 100, cents % 100)
}

fn is_grouping(c: char) -> bool {
    matches!(c, ',' | '_' | '\'' | '\u{a0}' | '\u{202f}') || c.is_whitespace()
}

fn is_currency_symbol(c: char) -> bool {
    matches!(c, '$' | '€' | '£' | '¥' | '₹' | '₩' | '¢')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formats() -> Vec<String> {
        DEFAULT_DATE_FORMATS.iter().map(|f| f.to_string()).collect()
    }

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_date_formats_first_match_wins() {
        let f = formats();
        assert_eq!(parse_date("11/05/2025", &f).unwrap(), ymd(2025, 11, 5));
        assert_eq!(parse_date("11/05/25", &f).unwrap(), ymd(2025, 11, 5));
        assert_eq!(parse_date("2025-11-05", &f).unwrap(), ymd(2025, 11, 5));
        // Month 25 is invalid so day-first is reached
        assert_eq!(parse_date("25/11/2025", &f).unwrap(), ymd(2025, 11, 25));
        assert_eq!(parse_date("2025-11-05 13:00:00", &f).unwrap(), ymd(2025, 11, 5));
        assert!(parse_date("yesterday", &f).is_err());
        assert!(parse_date("", &f).is_err());
    }

    #[test]
    fn test_parse_count() {
        assert_eq!(parse_count("1,234"), Ok(1234));
        assert_eq!(parse_count(" 107 663 "), Ok(107_663));
        assert_eq!(parse_count("80062.00"), Ok(80_062));
        assert_eq!(parse_count(""), Ok(0));
        assert!(parse_count("12.5").is_err());
        assert!(parse_count("-3").is_err());
        assert!(parse_count("n/a").is_err());
    }

    #[test]
    fn test_parse_count_rejects_out_of_range() {
        assert_eq!(parse_count("1,000,000,000,000,000"), Ok(MAX_CELL_VALUE));
        assert_eq!(parse_count("1000000000000001"), Err("count out of range".to_string()));
        assert_eq!(parse_count("5000000000000000000"), Err("count out of range".to_string()));
        assert_eq!(parse_count("99999999999999999999999"), Err("count out of range".to_string()));
        assert!(parse_currency_micros("9,999,999,999.00").is_err());
        assert_eq!(parse_currency_micros("999,999,999.99"), Ok(999_999_999_990_000));
    }

    #[test]
    fn test_parse_currency_exact() {
        assert_eq!(parse_currency_micros("$1,234.56"), Ok(1_234_560_000));
        assert_eq!(parse_currency_micros("0.1"), Ok(100_000));
        assert_eq!(parse_currency_micros("USD 12"), Ok(12_000_000));
        assert_eq!(parse_currency_micros("€ 0.000001"), Ok(1));
        assert_eq!(parse_currency_micros("0.0000005"), Ok(1));
        assert_eq!(parse_currency_micros("(2.50)"), Ok(-2_500_000));
        assert_eq!(parse_currency_micros("-.75"), Ok(-750_000));
        assert_eq!(parse_currency_micros(""), Ok(0));
        assert!(parse_currency_micros("1.2.3").is_err());
        assert!(parse_currency_micros("-").is_err());
        assert!(parse_currency_micros("$abc").is_err());
    }

    #[test]
    fn test_format_micros() {
        assert_eq!(format_micros(1_234_560_000), "1234.56");
        assert_eq!(format_micros(5_000), "0.01");
        assert_eq!(format_micros(-2_500_000), "-2.50");
        assert_eq!(format_micros(0), "0.00");
    }
}
