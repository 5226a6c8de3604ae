//! Per-site navigation and selector profiles.

use crate::extract::{EmptySelectors, FieldSpec, Normalizer, AVAILABILITY, PRICE, RATING};
use serde::Deserialize;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("profile {site}: invalid landing url: {source}")]
    InvalidUrl {
        site: String,
        #[source]
        source: url::ParseError,
    },

    #[error("profile {0}: no search box selectors")]
    NoSearchSelectors(String),

    #[error("profile {site}: {source}")]
    EmptyField {
        site: String,
        #[source]
        source: EmptySelectors,
    },

    #[error("profile {site}: duplicate field `{field}`")]
    DuplicateField { site: String, field: String },

    #[error("profile {site}: field `{field}` must use the {expected:?} normalizer")]
    WrongNormalizer {
        site: String,
        field: String,
        expected: Normalizer,
    },

    #[error("failed to read profile file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse profile file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Everything a tracking run needs to know about one site.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SiteProfile {
    pub site: String,
    pub landing_url: Url,
    pub search_selectors: Vec<String>,
    #[serde(default)]
    pub popup_selectors: Vec<String>,
    pub fields: Vec<FieldSpec>,
}

impl SiteProfile {
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.search_selectors.iter().all(|s| s.trim().is_empty()) {
            return Err(ProfileError::NoSearchSelectors(self.site.clone()));
        }

        let mut seen = HashSet::new();
        for field in &self.fields {
            field.validate().map_err(|source| ProfileError::EmptyField {
                site: self.site.clone(),
                source,
            })?;
            if !seen.insert(field.name.as_str()) {
                return Err(ProfileError::DuplicateField {
                    site: self.site.clone(),
                    field: field.name.clone(),
                });
            }
            let expected = match field.name.as_str() {
                PRICE => Some(Normalizer::Price),
                RATING => Some(Normalizer::Rating),
                _ => None,
            };
            if let Some(expected) = expected.filter(|n| *n != field.normalizer) {
                return Err(ProfileError::WrongNormalizer {
                    site: self.site.clone(),
                    field: field.name.clone(),
                    expected,
                });
            }
        }
        Ok(())
    }

    /// Selectors for noon.com, the tracker's primary target.
    pub fn noon() -> Result<Self, ProfileError> {
        let site = "noon.com";
        let profile = Self {
            site: site.to_string(),
            landing_url: parse_url(site, "https://www.noon.com/egypt-en/")?,
            search_selectors: strings(&[
                "input[type='search']",
                "input[data-qa='txt_searchBar']",
                "input[placeholder*='Search']",
                "#searchBar",
            ]),
            popup_selectors: default_popup_selectors(),
            fields: vec![
                field(site, FieldSpec::price([
                    "div[data-qa='product-price']",
                    "div.priceNow",
                    "span[data-currency='EGP']",
                    "div.productPrice",
                    "strong.amount",
                ]))?,
                field(site, FieldSpec::availability([
                    "div[data-qa='delivery-message']",
                    "div.fulfillmentText",
                    "div.stockStatus",
                    "div[data-qa='availability']",
                ]))?,
                field(site, FieldSpec::rating([
                    "div[data-qa='product-rating']",
                    "div.ratingValue",
                    "div.rating",
                    "span.stars",
                ]))?,
            ],
        };
        profile.validate()?;
        Ok(profile)
    }

    /// Best-effort profile for a site without dedicated selectors.
    pub fn generic(site: &str) -> Result<Self, ProfileError> {
        let host = site_key(site);
        let host = host.as_str();
        let profile = Self {
            site: host.to_string(),
            landing_url: parse_url(host, &format!("https://www.{}/", host))?,
            search_selectors: strings(&[
                "input[type='search']",
                "input[name='q']",
                "input[name='k']",
                "input[name='field-keywords']",
                "input[placeholder*='Search']",
                "input[aria-label*='Search']",
            ]),
            popup_selectors: default_popup_selectors(),
            fields: vec![
                field(host, FieldSpec::price([
                    "[data-qa='product-price']",
                    "[itemprop='price']",
                    "[data-test='product-price']",
                    "span.a-price span.a-offscreen",
                    ".price",
                    "[class*='price']",
                ]))?,
                field(host, FieldSpec::availability([
                    "[data-qa='availability']",
                    "[itemprop='availability']",
                    "#availability",
                    "[class*='stock']",
                    "[class*='availability']",
                ]))?,
                field(host, FieldSpec::rating([
                    "[data-qa='product-rating']",
                    "[itemprop='ratingValue']",
                    "[class*='rating']",
                ]))?,
            ],
        };
        profile.validate()?;
        Ok(profile)
    }
}

fn parse_url(site: &str, raw: &str) -> Result<Url, ProfileError> {
    Url::parse(raw).map_err(|source| ProfileError::InvalidUrl {
        site: site.to_string(),
        source,
    })
}

fn field(site: &str, spec: Result<FieldSpec, EmptySelectors>) -> Result<FieldSpec, ProfileError> {
    spec.map_err(|source| ProfileError::EmptyField {
        site: site.to_string(),
        source,
    })
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

fn default_popup_selectors() -> Vec<String> {
    strings(&[
        "[role='dialog'] button[class*='close']",
        "button[aria-label*='close']",
        "button[aria-label*='Close']",
        "[class*='CloseButton']",
        ".modal-close",
        "#onetrust-accept-btn-handler",
    ])
}

/// Built-in profiles plus any loaded from a file, keyed by site.
#[derive(Debug, Clone)]
pub struct ProfileSet {
    profiles: BTreeMap<String, SiteProfile>,
}

impl ProfileSet {
    pub fn builtin() -> Result<Self, ProfileError> {
        let mut set = Self {
            profiles: BTreeMap::new(),
        };
        set.insert(SiteProfile::noon()?);
        Ok(set)
    }

    pub fn insert(&mut self, profile: SiteProfile) {
        self.profiles.insert(site_key(&profile.site), profile);
    }

    /// Adds (or replaces) profiles from a JSON array.
    pub fn load_json(&mut self, json: &str) -> Result<usize, ProfileError> {
        let profiles: Vec<SiteProfile> = serde_json::from_str(json)?;
        for profile in &profiles {
            profile.validate()?;
        }
        let count = profiles.len();
        for profile in profiles {
            self.insert(profile);
        }
        Ok(count)
    }

    pub fn load_file(&mut self, path: &Path) -> Result<usize, ProfileError> {
        let json = std::fs::read_to_string(path)?;
        self.load_json(&json)
    }

    /// The registered profile for `site`, or a generic one.
    pub fn resolve(&self, site: &str) -> Result<SiteProfile, ProfileError> {
        match self.profiles.get(&site_key(site)) {
            Some(profile) => Ok(profile.clone()),
            None => SiteProfile::generic(site),
        }
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.profiles.values().map(|p| p.site.as_str())
    }
}

fn site_key(site: &str) -> String {
    site.trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://")
        .trim_start_matches("www.")
        .trim_end_matches('/')
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::FieldValue;

    #[test]
    fn test_noon_profile_is_valid() {
        let profile = SiteProfile::noon().unwrap();
        assert_eq!(profile.landing_url.as_str(), "https://www.noon.com/egypt-en/");
        assert_eq!(profile.search_selectors[0], "input[type='search']");
        let names: Vec<&str> = profile.fields.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec![PRICE, AVAILABILITY, RATING]);
    }

    #[test]
    fn test_generic_profile_normalizes_host() {
        let profile = SiteProfile::generic("https://www.walmart.com/").unwrap();
        assert_eq!(profile.site, "walmart.com");
        assert_eq!(profile.landing_url.as_str(), "https://www.walmart.com/");
    }

    #[test]
    fn test_resolve_prefers_registered_profile() {
        let set = ProfileSet::builtin().unwrap();
        assert_eq!(set.resolve("www.noon.com").unwrap(), SiteProfile::noon().unwrap());
        assert_eq!(set.resolve("target.com").unwrap().site, "target.com");
    }

    #[test]
    fn test_load_json_overrides_profile() {
        let mut set = ProfileSet::builtin().unwrap();
        let json = r##"[{
            "site": "noon.com",
            "landing_url": "https://www.noon.com/uae-en/",
            "search_selectors": ["#searchBar"],
            "fields": [
                { "name": "price", "selectors": [".amount"], "normalizer": "price", "default": 0.0 },
                { "name": "availability", "selectors": [".stock"], "normalizer": "text", "default": "Unknown" }
            ]
        }]"##;

        assert_eq!(set.load_json(json).unwrap(), 1);
        let profile = set.resolve("noon.com").unwrap();
        assert_eq!(profile.landing_url.as_str(), "https://www.noon.com/uae-en/");
        assert!(profile.popup_selectors.is_empty());
        assert_eq!(profile.fields[1].default, FieldValue::Text("Unknown".to_string()));
    }

    #[test]
    fn test_load_json_rejects_empty_selectors() {
        let mut set = ProfileSet::builtin().unwrap();
        let json = r##"[{
            "site": "shop.test",
            "landing_url": "https://shop.test/",
            "search_selectors": ["#q"],
            "fields": [{ "name": "price", "selectors": [], "normalizer": "price", "default": 0 }]
        }]"##;

        assert!(matches!(
            set.load_json(json),
            Err(ProfileError::EmptyField { .. })
        ));
    }

    #[test]
    fn test_generic_rating_selectors_use_slash_format() {
        let profile = SiteProfile::generic("amazon.com").unwrap();
        let rating = profile.fields.iter().find(|f| f.name == RATING).unwrap();
        assert!(!rating.selectors.iter().any(|s| s == "span.a-icon-alt"));
        assert_eq!(rating.selectors.last().map(String::as_str), Some("[class*='rating']"));
    }

    #[test]
    fn test_rejects_mismatched_normalizer() {
        let mut profile = SiteProfile::generic("shop.test").unwrap();
        profile.fields[0].normalizer = Normalizer::Text;
        assert!(matches!(
            profile.validate(),
            Err(ProfileError::WrongNormalizer { .. })
        ));
    }
}
