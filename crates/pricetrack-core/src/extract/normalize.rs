use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::FieldValue;

/// A number; a leading minus and a trailing percent sign are captured separately.
static NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(-)?(\d[\d,]*(?:\.\d+)?|\.\d+)(\s*%)?").expect("number pattern compiles")
});

#[derive(Debug, Clone, Error, PartialEq)]
pub enum NormalizeError {
    #[error("empty text")]
    Empty,

    #[error("no number in {0:?}")]
    NotNumeric(String),

    #[error("negative price {0}")]
    Negative(f64),
}

/// Converts the raw text of a matched element into a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Normalizer {
    /// First number in the text, currency tokens and thousand separators dropped.
    Price,
    /// Leading value of an `x/y` rating.
    Rating,
    /// Trimmed text.
    Text,
}

impl Normalizer {
    pub fn apply(self, raw: &str) -> Result<FieldValue, NormalizeError> {
        match self {
            Normalizer::Price => normalize_price(raw).map(FieldValue::Number),
            Normalizer::Rating => normalize_rating(raw).map(FieldValue::Number),
            Normalizer::Text => normalize_text(raw).map(FieldValue::Text),
        }
    }
}

pub fn normalize_price(raw: &str) -> Result<f64, NormalizeError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(NormalizeError::Empty);
    }

    // Percentages are discount badges, not prices.
    let token = NUMBER
        .captures_iter(text)
        .find(|caps| caps.get(3).is_none())
        .ok_or_else(|| NormalizeError::NotNumeric(text.to_string()))?;
    let value: f64 = token[2]
        .replace(',', "")
        .parse()
        .map_err(|_| NormalizeError::NotNumeric(text.to_string()))?;

    if !value.is_finite() {
        return Err(NormalizeError::NotNumeric(text.to_string()));
    }
    if token.get(1).is_some() && value > 0.0 {
        return Err(NormalizeError::Negative(-value));
    }
    Ok(value)
}

pub fn normalize_rating(raw: &str) -> Result<f64, NormalizeError> {
    let first = raw.split('/').next().unwrap_or_default().trim();
    if first.is_empty() {
        return Err(NormalizeError::Empty);
    }
    match first.parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(NormalizeError::NotNumeric(first.to_string())),
    }
}

pub fn normalize_text(raw: &str) -> Result<String, NormalizeError> {
    let text = raw.trim();
    if text.is_empty() {
        Err(NormalizeError::Empty)
    } else {
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_price_with_trailing_currency() {
        assert_eq!(normalize_price("123.45 EGP"), Ok(123.45));
    }

    #[test]
    fn test_price_with_leading_symbol_and_separators() {
        assert_eq!(normalize_price("$1,299.00"), Ok(1299.0));
        assert_eq!(normalize_price("EGP\u{a0}54,999"), Ok(54999.0));
    }

    #[test]
    fn test_price_rejects_negative_and_non_numeric() {
        assert_eq!(normalize_price("-5 USD"), Err(NormalizeError::Negative(-5.0)));
        assert!(matches!(
            normalize_price("Price on request"),
            Err(NormalizeError::NotNumeric(_))
        ));
        assert_eq!(normalize_price("   "), Err(NormalizeError::Empty));
    }

    #[test]
    fn test_price_skips_discount_badge() {
        assert_eq!(normalize_price("-20% EGP 99"), Ok(99.0));
        assert_eq!(normalize_price("Save 15 % now 1,050.50"), Ok(1050.5));
        assert!(matches!(
            normalize_price("50% off"),
            Err(NormalizeError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_rating_split() {
        assert_eq!(normalize_rating("4.2/5"), Ok(4.2));
        assert_eq!(normalize_rating(" 3 / 5 "), Ok(3.0));
        assert_eq!(normalize_rating("4.7"), Ok(4.7));
    }

    #[test]
    fn test_rating_failures() {
        assert_eq!(normalize_rating(""), Err(NormalizeError::Empty));
        assert!(matches!(
            normalize_rating("four/5"),
            Err(NormalizeError::NotNumeric(_))
        ));
    }

    #[test]
    fn test_text_is_trimmed() {
        assert_eq!(
            Normalizer::Text.apply("  In stock \n"),
            Ok(FieldValue::Text("In stock".to_string()))
        );
        assert_eq!(Normalizer::Text.apply(""), Err(NormalizeError::Empty));
    }

    #[test]
    fn test_normalizer_serde_names() {
        let n: Normalizer = serde_json::from_str("\"rating\"").unwrap();
        assert_eq!(n, Normalizer::Rating);
    }
}
