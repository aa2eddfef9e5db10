//! Shared parsing helpers and error types for the stock ledger.

use std::str::FromStr;

use rust_decimal::Decimal;
use thiserror::Error;

/// Result type for shared helpers.
pub type UtilsResult<T> = Result<T, UtilsError>;

/// Shared error variants for cross-crate helpers.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UtilsError {
    /// The input is not a number of the expected shape.
    #[error("parse error: {0}")]
    Parse(String),
    /// The input is a number but does not fit the target type.
    #[error("out of range: {0}")]
    OutOfRange(String),
}

/// Parse a whole number typed into a form field.
///
/// Blank input yields `Ok(None)` so callers can apply their own default.
pub fn parse_whole(raw: &str) -> UtilsResult<Option<i64>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let digits = trimmed.strip_prefix('+').unwrap_or(trimmed);
    if !digits.chars().enumerate().all(|(idx, ch)| {
        ch.is_ascii_digit() || (idx == 0 && ch == '-' && digits.len() > 1)
    }) {
        return Err(UtilsError::Parse(format!("`{trimmed}` is not a whole number")));
    }
    digits
        .parse::<i64>()
        .map(Some)
        .map_err(|_| UtilsError::OutOfRange(format!("`{trimmed}` is too large")))
}

/// Parse a decimal amount (such as a price) typed into a form field.
///
/// Blank input yields `Ok(None)`. A comma is accepted as the decimal separator.
pub fn parse_amount(raw: &str) -> UtilsResult<Option<Decimal>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    let normalized = trimmed.replace(',', ".");
    Decimal::from_str(&normalized)
        .map(Some)
        .map_err(|_| UtilsError::Parse(format!("`{trimmed}` is not a decimal amount")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whole_numbers_parse_with_signs_and_padding() {
        assert_eq!(parse_whole(" 42 "), Ok(Some(42)));
        assert_eq!(parse_whole("+7"), Ok(Some(7)));
        assert_eq!(parse_whole("-3"), Ok(Some(-3)));
    }

    #[test]
    fn blank_whole_number_is_absent() {
        assert_eq!(parse_whole("   "), Ok(None));
    }

    #[test]
    fn garbage_whole_number_is_rejected() {
        assert!(matches!(parse_whole("12abc"), Err(UtilsError::Parse(_))));
        assert!(matches!(parse_whole("1.5"), Err(UtilsError::Parse(_))));
        assert!(matches!(parse_whole("-"), Err(UtilsError::Parse(_))));
    }

    #[test]
    fn oversized_whole_number_is_out_of_range() {
        assert!(matches!(
            parse_whole("99999999999999999999"),
            Err(UtilsError::OutOfRange(_))
        ));
    }

    #[test]
    fn amounts_accept_comma_separator() {
        assert_eq!(parse_amount("2,50"), Ok(Some(Decimal::new(250, 2))));
        assert_eq!(parse_amount("10"), Ok(Some(Decimal::new(10, 0))));
        assert_eq!(parse_amount(""), Ok(None));
        assert!(parse_amount("ten").is_err());
    }
}
