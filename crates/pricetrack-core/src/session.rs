use crate::config::TrackerConfig;
use crate::driver::{BrowserDriver, DriverError, DriverGuard, DriverLauncher, Screenshot};
use crate::extract::{
    DefaultReason, ExtractionResult, FieldExtractor, FieldSpec, SelectorResolver,
};
use crate::profile::SiteProfile;
use crate::record::ProductRecord;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Clicks spent on one popup selector before moving on.
const MAX_POPUP_CLICKS: usize = 3;

#[derive(Debug, Error)]
pub enum TrackError {
    #[error("could not start a browser session: {0}")]
    Resource(#[source] DriverError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Navigating,
    Searching,
    Extracting,
    Done,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionState::Done | SessionState::Failed)
    }
}

/// Result of one tracking run.
#[derive(Debug, Clone, Serialize)]
pub struct TrackOutcome {
    pub record: ProductRecord,
    pub fields: ExtractionResult,
    pub state: SessionState,
    /// Every state entered, in order, starting with `Idle`.
    pub trail: Vec<SessionState>,
    pub failure: Option<String>,
}

impl TrackOutcome {
    pub fn reached(&self, state: SessionState) -> bool {
        self.trail.contains(&state)
    }
}

struct Progress {
    trail: Vec<SessionState>,
    failure: Option<String>,
}

impl Progress {
    fn new() -> Self {
        Self {
            trail: vec![SessionState::Idle],
            failure: None,
        }
    }

    fn current(&self) -> SessionState {
        self.trail
            .last()
            .copied()
            .unwrap_or(SessionState::Idle)
    }

    fn enter(&mut self, state: SessionState) {
        debug!("Session state {:?} -> {:?}", self.current(), state);
        self.trail.push(state);
    }

    fn fail(&mut self, reason: String) {
        warn!("Tracking failed while {:?}: {}", self.current(), reason);
        self.failure = Some(reason);
        self.trail.push(SessionState::Failed);
    }
}

/// Drives one site from landing page to extracted record.
///
/// The session keeps no state between runs; every `track` call acquires its own
/// driver from the launcher and releases it before returning.
pub struct TrackingSession {
    launcher: Arc<dyn DriverLauncher>,
    profile: SiteProfile,
    config: TrackerConfig,
}

impl TrackingSession {
    pub fn new(
        launcher: Arc<dyn DriverLauncher>,
        profile: SiteProfile,
        config: TrackerConfig,
    ) -> Self {
        Self {
            launcher,
            profile,
            config,
        }
    }

    pub fn profile(&self) -> &SiteProfile {
        &self.profile
    }

    /// Fails only when no browser session can be started.
    pub async fn track(&self, product: &str) -> Result<TrackOutcome, TrackError> {
        let run_id = Uuid::now_v7();
        let span = info_span!("track", site = %self.profile.site, %run_id);
        self.track_inner(product).instrument(span).await
    }

    async fn track_inner(&self, product: &str) -> Result<TrackOutcome, TrackError> {
        info!("Tracking {:?} on {}", product, self.profile.site);

        let driver = self.launcher.launch().await.map_err(TrackError::Resource)?;
        let guard = DriverGuard::new(driver);
        let mut progress = Progress::new();

        let fields = self.drive(&*guard, product, &mut progress).await;
        if fields.session_lost() && progress.current() != SessionState::Failed {
            progress.fail("browser session lost during extraction".to_string());
        } else if !progress.current().is_terminal() {
            progress.enter(SessionState::Done);
        }

        let screenshot = if self.config.screenshots && !fields.session_lost() {
            self.screenshot(&*guard).await
        } else {
            None
        };

        guard.release().await;

        let state = progress.current();
        info!("Tracking on {} finished in state {:?}", self.profile.site, state);

        let record = ProductRecord::from_extraction(
            &self.profile.site,
            product,
            &fields,
            screenshot,
            Utc::now(),
        );
        Ok(TrackOutcome {
            record,
            fields,
            state,
            trail: progress.trail,
            failure: progress.failure,
        })
    }

    async fn drive(
        &self,
        driver: &dyn BrowserDriver,
        product: &str,
        progress: &mut Progress,
    ) -> ExtractionResult {
        let specs = &self.profile.fields;

        progress.enter(SessionState::Navigating);
        let url = self.profile.landing_url.as_str();
        info!("Navigating to {}", url);
        let navigation =
            tokio::time::timeout(self.config.navigation_timeout(), driver.navigate(url)).await;
        let failure = match navigation {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e),
            Err(_) => Some(DriverError::Navigation {
                url: url.to_string(),
                reason: format!("timed out after {:?}", self.config.navigation_timeout()),
            }),
        };
        if let Some(e) = failure {
            return Self::abandon(specs, progress, e);
        }

        tokio::time::sleep(self.config.landing_settle()).await;
        self.dismiss_popups(driver).await;

        progress.enter(SessionState::Searching);
        if let Err(e) = self.search(driver, product).await {
            return Self::abandon(specs, progress, e);
        }

        tokio::time::sleep(self.config.results_settle()).await;

        progress.enter(SessionState::Extracting);
        let extractor = FieldExtractor::new(SelectorResolver::new(self.config.field_timeout()));
        extractor.extract_fields(driver, specs).await
    }

    fn abandon(
        specs: &[FieldSpec],
        progress: &mut Progress,
        error: DriverError,
    ) -> ExtractionResult {
        let fatal = error.is_fatal();
        let reason = if fatal {
            DefaultReason::SessionLost
        } else {
            DefaultReason::Driver {
                error: error.to_string(),
            }
        };
        progress.fail(error.to_string());
        let mut fields = ExtractionResult::defaults(specs, reason);
        fields.session_lost = fatal;
        fields
    }

    async fn search(&self, driver: &dyn BrowserDriver, product: &str) -> Result<(), DriverError> {
        let resolver = SelectorResolver::new(self.config.search_timeout());
        let search_box = resolver
            .locate(driver, &self.profile.search_selectors)
            .await?
            .ok_or_else(|| DriverError::Element {
                selector: self.profile.search_selectors.join(", "),
                reason: "no search box found".to_string(),
            })?;

        info!("Found search box with selector {}", search_box.selector);
        driver.type_text(&search_box.selector, product).await?;
        driver.press_enter(&search_box.selector).await?;
        Ok(())
    }

    /// Clicks every visible close control, then presses Escape for overlays without one.
    async fn dismiss_popups(&self, driver: &dyn BrowserDriver) {
        for selector in &self.profile.popup_selectors {
            for _ in 0..MAX_POPUP_CLICKS {
                match driver.element_exists(selector).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        debug!("Popup check for {} failed: {}", selector, e);
                        if e.is_fatal() {
                            return;
                        }
                        break;
                    }
                }
                if let Err(e) = driver.click(selector).await {
                    debug!("Could not dismiss popup {}: {}", selector, e);
                    if e.is_fatal() {
                        return;
                    }
                    break;
                }
                debug!("Dismissed popup {}", selector);
            }
        }

        if let Err(e) = driver.press_key("body", "Escape").await {
            debug!("Escape on page body failed: {}", e);
        }
    }

    async fn screenshot(&self, driver: &dyn BrowserDriver) -> Option<Screenshot> {
        match driver.capture_screenshot().await {
            Ok(bytes) => Some(bytes),
            Err(e) => {
                warn!("Screenshot of {} failed: {}", self.profile.site, e);
                None
            }
        }
    }
}
