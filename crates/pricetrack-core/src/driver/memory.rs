//! In-memory driver for running tracking sessions without a browser.
//!
//! A `MemoryDriver` serves two fixed pages: the landing page shown after `navigate`
//! and the results page shown after Enter is pressed in a search box. Every call is
//! recorded so callers can inspect what a session did.

use super::{BrowserDriver, DriverError, DriverLauncher, Screenshot};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Navigate(String),
    ElementExists(String),
    GetText(String),
    TypeText(String, String),
    PressEnter(String),
    PressKey(String, String),
    Click(String),
    Screenshot,
    Close,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Location {
    Blank,
    Landing,
    Results,
}

#[derive(Debug)]
struct PageState {
    landing: BTreeMap<String, String>,
    results: BTreeMap<String, String>,
    location: Location,
    calls: Vec<DriverCall>,
    typed: Option<String>,
    navigation_error: Option<String>,
    navigation_delay: Option<Duration>,
    session_lost_on: Option<String>,
    screenshot: Screenshot,
}

#[derive(Debug, Clone)]
pub struct MemoryDriver {
    state: Arc<Mutex<PageState>>,
}

impl Default for MemoryDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PageState {
                landing: BTreeMap::new(),
                results: BTreeMap::new(),
                location: Location::Blank,
                calls: Vec::new(),
                typed: None,
                navigation_error: None,
                navigation_delay: None,
                session_lost_on: None,
                screenshot: b"\x89PNG\r\n\x1a\n".to_vec(),
            })),
        }
    }

    /// Adds an element to the landing page. Inputs use an empty text.
    pub fn with_landing_element(self, selector: &str, text: &str) -> Self {
        self.lock()
            .landing
            .insert(selector.to_string(), text.to_string());
        self
    }

    /// Adds an element to the page shown once a search is submitted.
    pub fn with_result_element(self, selector: &str, text: &str) -> Self {
        self.lock()
            .results
            .insert(selector.to_string(), text.to_string());
        self
    }

    pub fn with_navigation_error(self, reason: &str) -> Self {
        self.lock().navigation_error = Some(reason.to_string());
        self
    }

    /// Makes every `navigate` call take `delay` before it completes.
    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        self.lock().navigation_delay = Some(delay);
        self
    }

    /// Any call touching `selector` reports a lost session.
    pub fn with_session_lost_on(self, selector: &str) -> Self {
        self.lock().session_lost_on = Some(selector.to_string());
        self
    }

    /// Starts the driver directly on the results page.
    pub fn on_results_page(self) -> Self {
        self.lock().location = Location::Results;
        self
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.lock().calls.clone()
    }

    pub fn close_calls(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == DriverCall::Close)
            .count()
    }

    /// Text typed into the search box, if any.
    pub fn typed(&self) -> Option<String> {
        self.lock().typed.clone()
    }

    fn lock(&self) -> MutexGuard<'_, PageState> {
        // A poisoned lock only means a test panicked mid-call; the page data is still usable.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, call: DriverCall) {
        self.lock().calls.push(call);
    }

    fn check_session(&self, selector: &str) -> Result<(), DriverError> {
        match &self.lock().session_lost_on {
            Some(s) if s == selector => Err(DriverError::SessionLost(format!(
                "session dropped while querying {}",
                selector
            ))),
            _ => Ok(()),
        }
    }

    fn lookup(&self, selector: &str) -> Option<String> {
        let state = self.lock();
        match state.location {
            Location::Blank => None,
            Location::Landing => state.landing.get(selector).cloned(),
            Location::Results => state.results.get(selector).cloned(),
        }
    }

    fn missing(selector: &str) -> DriverError {
        DriverError::Element {
            selector: selector.to_string(),
            reason: "no matching element".to_string(),
        }
    }
}

#[async_trait]
impl BrowserDriver for MemoryDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.record(DriverCall::Navigate(url.to_string()));
        let delay = self.lock().navigation_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if let Some(reason) = &state.navigation_error {
            return Err(DriverError::Navigation {
                url: url.to_string(),
                reason: reason.clone(),
            });
        }
        state.location = Location::Landing;
        Ok(())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
        self.record(DriverCall::ElementExists(selector.to_string()));
        self.check_session(selector)?;
        Ok(self.lookup(selector).is_some())
    }

    async fn get_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        self.record(DriverCall::GetText(selector.to_string()));
        self.check_session(selector)?;
        Ok(self.lookup(selector))
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        self.record(DriverCall::TypeText(selector.to_string(), text.to_string()));
        self.check_session(selector)?;
        if self.lookup(selector).is_none() {
            return Err(Self::missing(selector));
        }
        self.lock().typed = Some(text.to_string());
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), DriverError> {
        self.record(DriverCall::PressEnter(selector.to_string()));
        self.check_session(selector)?;
        if self.lookup(selector).is_none() {
            return Err(Self::missing(selector));
        }
        let mut state = self.lock();
        if state.typed.is_some() {
            state.location = Location::Results;
        }
        Ok(())
    }

    /// Records the key press without changing the page. `body` is always present.
    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError> {
        self.record(DriverCall::PressKey(selector.to_string(), key.to_string()));
        self.check_session(selector)?;
        if selector != "body" && self.lookup(selector).is_none() {
            return Err(Self::missing(selector));
        }
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.record(DriverCall::Click(selector.to_string()));
        self.check_session(selector)?;
        if self.lookup(selector).is_none() {
            return Err(Self::missing(selector));
        }
        let mut state = self.lock();
        match state.location {
            Location::Landing => state.landing.remove(selector),
            Location::Results => state.results.remove(selector),
            Location::Blank => None,
        };
        Ok(())
    }

    async fn capture_screenshot(&self) -> Result<Screenshot, DriverError> {
        self.record(DriverCall::Screenshot);
        Ok(self.lock().screenshot.clone())
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        self.record(DriverCall::Close);
        Ok(())
    }
}

/// Hands out clones of one `MemoryDriver`, or fails every launch.
#[derive(Debug, Clone)]
pub struct MemoryLauncher {
    driver: Option<MemoryDriver>,
    launches: Arc<AtomicUsize>,
}

impl MemoryLauncher {
    pub fn new(driver: MemoryDriver) -> Self {
        Self {
            driver: Some(driver),
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn unavailable() -> Self {
        Self {
            driver: None,
            launches: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DriverLauncher for MemoryLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        self.launches.fetch_add(1, Ordering::SeqCst);
        match &self.driver {
            Some(driver) => Ok(Box::new(driver.clone())),
            None => Err(DriverError::Launch("no browser available".to_string())),
        }
    }
}
