use crate::driver::Screenshot;
use crate::extract::{ExtractionResult, AVAILABILITY, PRICE, RATING};
use chrono::{DateTime, Utc};
use serde::Serialize;

pub const DEFAULT_AVAILABILITY: &str = "Unknown";

/// The outcome of tracking one product on one site.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProductRecord {
    pub site: String,
    pub product: String,
    pub price: f64,
    pub availability: String,
    /// Present only when a rating was found on the page.
    pub rating: Option<f64>,
    #[serde(skip)]
    pub screenshot: Option<Screenshot>,
    pub timestamp: DateTime<Utc>,
}

impl ProductRecord {
    pub fn from_extraction(
        site: &str,
        product: &str,
        fields: &ExtractionResult,
        screenshot: Option<Screenshot>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let price = fields
            .value(PRICE)
            .and_then(|v| v.as_number())
            .unwrap_or(0.0);
        let availability = fields
            .value(AVAILABILITY)
            .and_then(|v| v.as_text())
            .unwrap_or(DEFAULT_AVAILABILITY)
            .to_string();
        let rating = if fields.is_matched(RATING) {
            fields.value(RATING).and_then(|v| v.as_number())
        } else {
            None
        };

        Self {
            site: site.to_string(),
            product: product.to_string(),
            price,
            availability,
            rating,
            screenshot,
            timestamp,
        }
    }
}

/// File-name-safe form of a site name.
pub fn sanitize_site(site: &str) -> String {
    site.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
