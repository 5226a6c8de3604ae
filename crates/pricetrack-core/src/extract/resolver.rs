use crate::driver::{BrowserDriver, DriverError};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

const INITIAL_POLL_DELAY: Duration = Duration::from_millis(50);
const MAX_POLL_DELAY: Duration = Duration::from_millis(500);

/// What counts as a match for a candidate selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The element exists. Used for inputs, whose text is always empty.
    Presence,
    /// The element exists and has non-blank text.
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub selector: String,
    /// Position of `selector` in the candidate list.
    pub index: usize,
    /// Element text; empty for `Probe::Presence` matches.
    pub text: String,
}

/// Tries candidate selectors strictly in order and returns the first match.
#[derive(Debug, Clone)]
pub struct SelectorResolver {
    timeout_per_attempt: Duration,
}

impl SelectorResolver {
    pub fn new(timeout_per_attempt: Duration) -> Self {
        Self {
            timeout_per_attempt,
        }
    }

    pub fn timeout_per_attempt(&self) -> Duration {
        self.timeout_per_attempt
    }

    /// `Ok(None)` when no candidate matches. `Err` only for fatal driver failures.
    pub async fn resolve(
        &self,
        driver: &dyn BrowserDriver,
        selectors: &[String],
        probe: Probe,
    ) -> Result<Option<Resolved>, DriverError> {
        for (index, selector) in selectors.iter().enumerate() {
            if let Some(text) = self.poll(driver, selector, probe).await? {
                return Ok(Some(Resolved {
                    selector: selector.clone(),
                    index,
                    text,
                }));
            }
            debug!("No match for selector {}", selector);
        }
        Ok(None)
    }

    pub async fn locate(
        &self,
        driver: &dyn BrowserDriver,
        selectors: &[String],
    ) -> Result<Option<Resolved>, DriverError> {
        self.resolve(driver, selectors, Probe::Presence).await
    }

    pub async fn resolve_text(
        &self,
        driver: &dyn BrowserDriver,
        selectors: &[String],
    ) -> Result<Option<Resolved>, DriverError> {
        self.resolve(driver, selectors, Probe::Text).await
    }

    async fn poll(
        &self,
        driver: &dyn BrowserDriver,
        selector: &str,
        probe: Probe,
    ) -> Result<Option<String>, DriverError> {
        let deadline = Instant::now() + self.timeout_per_attempt;
        let mut delay = INITIAL_POLL_DELAY;

        loop {
            match Self::probe_once(driver, selector, probe).await {
                Ok(Some(text)) => return Ok(Some(text)),
                Ok(None) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!("Probe of selector {} failed: {}", selector, e);
                    return Ok(None);
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(MAX_POLL_DELAY);
        }
    }

    async fn probe_once(
        driver: &dyn BrowserDriver,
        selector: &str,
        probe: Probe,
    ) -> Result<Option<String>, DriverError> {
        if !driver.element_exists(selector).await? {
            return Ok(None);
        }
        match probe {
            Probe::Presence => Ok(Some(String::new())),
            Probe::Text => Ok(driver
                .get_text(selector)
                .await?
                .filter(|text| !text.trim().is_empty())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::memory::{DriverCall, MemoryDriver};

    fn selectors(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn immediate() -> SelectorResolver {
        SelectorResolver::new(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_nth_selector_wins_when_earlier_ones_miss() {
        for n in 1..=6 {
            let mut list: Vec<String> = (1..n).map(|i| format!("#missing{}", i)).collect();
            list.push("#present".to_string());
            let driver = MemoryDriver::new()
                .on_results_page()
                .with_result_element("#present", "value");

            let resolved = immediate()
                .resolve_text(&driver, &list)
                .await
                .unwrap()
                .expect("last selector should match");

            assert_eq!(resolved.index, n - 1);
            assert_eq!(resolved.selector, "#present");
            assert_eq!(resolved.text, "value");
        }
    }

    #[tokio::test]
    async fn test_earlier_selector_takes_precedence() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element(".a", "first")
            .with_result_element(".b", "second");

        let resolved = immediate()
            .resolve_text(&driver, &selectors(&[".a", ".b"]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.text, "first");
        assert!(!driver.calls().contains(&DriverCall::ElementExists(".b".into())));
    }

    #[tokio::test]
    async fn test_blank_text_falls_through() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element(".price", "   ")
            .with_result_element(".price-alt", "99 EGP");

        let resolved = immediate()
            .resolve_text(&driver, &selectors(&[".price", ".price-alt"]))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(resolved.selector, ".price-alt");
    }

    #[tokio::test]
    async fn test_presence_accepts_empty_input() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_result_element("input[type='search']", "");

        let resolved = immediate()
            .locate(&driver, &selectors(&["input[type='search']"]))
            .await
            .unwrap();

        assert!(resolved.is_some());
    }

    #[tokio::test]
    async fn test_no_match_is_not_an_error() {
        let driver = MemoryDriver::new().on_results_page();
        let resolved = immediate()
            .resolve_text(&driver, &selectors(&["#a", "#b"]))
            .await
            .unwrap();
        assert!(resolved.is_none());
    }

    #[tokio::test]
    async fn test_session_loss_aborts_resolution() {
        let driver = MemoryDriver::new()
            .on_results_page()
            .with_session_lost_on("#b")
            .with_result_element("#c", "late");

        let err = immediate()
            .resolve_text(&driver, &selectors(&["#a", "#b", "#c"]))
            .await
            .unwrap_err();

        assert!(err.is_fatal());
        assert!(!driver.calls().contains(&DriverCall::ElementExists("#c".into())));
    }

    #[tokio::test]
    async fn test_polls_until_timeout() {
        let driver = MemoryDriver::new().on_results_page();
        let resolver = SelectorResolver::new(Duration::from_millis(120));

        let start = std::time::Instant::now();
        let resolved = resolver
            .resolve_text(&driver, &selectors(&["#never"]))
            .await
            .unwrap();

        assert!(resolved.is_none());
        assert!(start.elapsed() >= Duration::from_millis(120));
        let probes = driver
            .calls()
            .iter()
            .filter(|c| **c == DriverCall::ElementExists("#never".into()))
            .count();
        assert!(probes >= 2);
    }
}
