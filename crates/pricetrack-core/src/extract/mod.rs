pub mod normalize;
pub mod resolver;

pub use normalize::{NormalizeError, Normalizer};
pub use resolver::{Probe, Resolved, SelectorResolver};

use crate::driver::BrowserDriver;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

pub const PRICE: &str = "price";
pub const AVAILABILITY: &str = "availability";
pub const RATING: &str = "rating";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Number(f64),
    Text(String),
}

impl FieldValue {
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(s) => Some(s),
            FieldValue::Number(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::Number(n) => write!(f, "{}", n),
            FieldValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("field `{0}` has no candidate selectors")]
pub struct EmptySelectors(pub String);

/// One logical field and the ordered selectors that may hold it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub selectors: Vec<String>,
    pub normalizer: Normalizer,
    pub default: FieldValue,
}

impl FieldSpec {
    pub fn new<S: Into<String>>(
        name: &str,
        selectors: impl IntoIterator<Item = S>,
        normalizer: Normalizer,
        default: FieldValue,
    ) -> Result<Self, EmptySelectors> {
        let spec = Self {
            name: name.to_string(),
            selectors: selectors.into_iter().map(Into::into).collect(),
            normalizer,
            default,
        };
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<(), EmptySelectors> {
        if self.selectors.iter().all(|s| s.trim().is_empty()) {
            return Err(EmptySelectors(self.name.clone()));
        }
        Ok(())
    }

    pub fn price(
        selectors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, EmptySelectors> {
        Self::new(PRICE, selectors, Normalizer::Price, FieldValue::Number(0.0))
    }

    pub fn availability(
        selectors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, EmptySelectors> {
        Self::new(
            AVAILABILITY,
            selectors,
            Normalizer::Text,
            FieldValue::Text("Unknown".to_string()),
        )
    }

    pub fn rating(
        selectors: impl IntoIterator<Item = impl Into<String>>,
    ) -> Result<Self, EmptySelectors> {
        Self::new(RATING, selectors, Normalizer::Rating, FieldValue::Number(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultReason {
    NotFound,
    Normalization { selector: String, error: String },
    Driver { error: String },
    SessionLost,
}

/// Where a field's value came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum FieldSource {
    Matched { selector: String, index: usize },
    Defaulted { reason: DefaultReason },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedField {
    pub value: FieldValue,
    pub source: FieldSource,
}

/// Values for every requested field; unmatched fields carry their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExtractionResult {
    fields: BTreeMap<String, ExtractedField>,
    pub(crate) session_lost: bool,
}

impl ExtractionResult {
    /// Every field set to its default.
    pub fn defaults(specs: &[FieldSpec], reason: DefaultReason) -> Self {
        let fields = specs
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    ExtractedField {
                        value: spec.default.clone(),
                        source: FieldSource::Defaulted {
                            reason: reason.clone(),
                        },
                    },
                )
            })
            .collect();
        Self {
            fields,
            session_lost: false,
        }
    }

    pub fn get(&self, name: &str) -> Option<&ExtractedField> {
        self.fields.get(name)
    }

    pub fn value(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name).map(|f| &f.value)
    }

    pub fn is_matched(&self, name: &str) -> bool {
        matches!(
            self.fields.get(name).map(|f| &f.source),
            Some(FieldSource::Matched { .. })
        )
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &ExtractedField)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// True when extraction stopped because the browser session died.
    pub fn session_lost(&self) -> bool {
        self.session_lost
    }

    fn insert(&mut self, name: &str, value: FieldValue, source: FieldSource) {
        self.fields
            .insert(name.to_string(), ExtractedField { value, source });
    }
}

/// Populates field specs from the current page.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    resolver: SelectorResolver,
}

impl FieldExtractor {
    pub fn new(resolver: SelectorResolver) -> Self {
        Self { resolver }
    }

    pub async fn extract_fields(
        &self,
        driver: &dyn BrowserDriver,
        specs: &[FieldSpec],
    ) -> ExtractionResult {
        let mut result = ExtractionResult::default();

        for spec in specs {
            if result.session_lost {
                result.insert(
                    &spec.name,
                    spec.default.clone(),
                    FieldSource::Defaulted {
                        reason: DefaultReason::SessionLost,
                    },
                );
                continue;
            }

            let (value, source) = match self.resolver.resolve_text(driver, &spec.selectors).await {
                Ok(Some(found)) => match spec.normalizer.apply(&found.text) {
                    Ok(value) => {
                        info!(
                            "Found {} with selector {}: {}",
                            spec.name, found.selector, value
                        );
                        (
                            value,
                            FieldSource::Matched {
                                selector: found.selector,
                                index: found.index,
                            },
                        )
                    }
                    Err(e) => {
                        warn!(
                            "Could not normalize {} from {:?} ({}), using default {}",
                            spec.name, found.text, e, spec.default
                        );
                        (
                            spec.default.clone(),
                            FieldSource::Defaulted {
                                reason: DefaultReason::Normalization {
                                    selector: found.selector,
                                    error: e.to_string(),
                                },
                            },
                        )
                    }
                },
                Ok(None) => {
                    info!(
                        "No selector matched {}, using default {}",
                        spec.name, spec.default
                    );
                    (
                        spec.default.clone(),
                        FieldSource::Defaulted {
                            reason: DefaultReason::NotFound,
                        },
                    )
                }
                Err(e) => {
                    warn!("Browser failed while extracting {}: {}", spec.name, e);
                    result.session_lost = e.is_fatal();
                    (
                        spec.default.clone(),
                        FieldSource::Defaulted {
                            reason: DefaultReason::Driver {
                                error: e.to_string(),
                            },
                        },
                    )
                }
            };

            result.insert(&spec.name, value, source);
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::MemoryDriver;
    use std::time::Duration;

    fn extractor() -> FieldExtractor {
        FieldExtractor::new(SelectorResolver::new(Duration::ZERO))
    }

    fn specs() -> Vec<FieldSpec> {
        vec![
            FieldSpec::price(["div[data-qa='product-price']", "div.priceNow"]).unwrap(),
            FieldSpec::availability(["div.stockStatus"]).unwrap(),
            FieldSpec::rating(["div.ratingValue", "span.stars"]).unwrap(),
        ]
    }

    #[test]
    fn test_empty_selectors_rejected() {
        let empty: Vec<String> = vec![];
        assert_eq!(
            FieldSpec::price(empty).unwrap_err(),
            EmptySelectors("price".to_string())
        );
    }

    #[tokio::test]
    async fn test_all_fields_matched() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element("div.priceNow", "123.45 EGP")
            .with_result_element("div.stockStatus", " In stock ")
            .with_result_element("span.stars", "4.2/5");

        let result = extractor().extract_fields(&driver, &specs()).await;

        assert_eq!(result.value(PRICE), Some(&FieldValue::Number(123.45)));
        assert_eq!(
            result.value(AVAILABILITY),
            Some(&FieldValue::Text("In stock".to_string()))
        );
        assert_eq!(result.value(RATING), Some(&FieldValue::Number(4.2)));
        assert_eq!(
            result.get(RATING).unwrap().source,
            FieldSource::Matched {
                selector: "span.stars".to_string(),
                index: 1
            }
        );
    }

    #[tokio::test]
    async fn test_missing_fields_use_defaults() {
        let driver = MemoryDriver::new().on_results_page();

        let result = extractor().extract_fields(&driver, &specs()).await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.value(PRICE), Some(&FieldValue::Number(0.0)));
        assert_eq!(
            result.value(AVAILABILITY),
            Some(&FieldValue::Text("Unknown".to_string()))
        );
        assert!(!result.is_matched(RATING));
        assert!(!result.session_lost());
    }

    #[tokio::test]
    async fn test_unparsable_text_defaults() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element("div.priceNow", "Call for price");

        let result = extractor().extract_fields(&driver, &specs()).await;

        assert_eq!(result.value(PRICE), Some(&FieldValue::Number(0.0)));
        assert!(matches!(
            result.get(PRICE).unwrap().source,
            FieldSource::Defaulted {
                reason: DefaultReason::Normalization { .. }
            }
        ));
    }

    #[tokio::test]
    async fn test_extraction_is_idempotent() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element("div[data-qa='product-price']", "EGP 54,999")
            .with_result_element("div.ratingValue", "3.9/5");

        let first = extractor().extract_fields(&driver, &specs()).await;
        let second = extractor().extract_fields(&driver, &specs()).await;

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_session_loss_defaults_remaining_fields() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element("div.priceNow", "10")
            .with_result_element("div.ratingValue", "5/5")
            .with_session_lost_on("div.stockStatus");

        let result = extractor().extract_fields(&driver, &specs()).await;

        assert!(result.session_lost());
        assert!(result.is_matched(PRICE));
        assert_eq!(
            result.get(RATING).unwrap().source,
            FieldSource::Defaulted {
                reason: DefaultReason::SessionLost
            }
        );
    }
}
