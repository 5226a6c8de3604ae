pub mod chrome;
pub mod memory;

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

/// PNG-encoded screenshot bytes.
pub type Screenshot = Vec<u8>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("element operation on `{selector}` failed: {reason}")]
    Element { selector: String, reason: String },

    #[error("screenshot failed: {0}")]
    Screenshot(String),

    #[error("browser session lost: {0}")]
    SessionLost(String),
}

impl DriverError {
    /// Errors after which no further call on the same session can succeed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DriverError::SessionLost(_) | DriverError::Launch(_))
    }
}

/// The browser capability consumed by the tracker.
///
/// Calls on one driver are issued sequentially by a single tracking run.
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;

    /// Non-blocking existence check.
    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError>;

    /// Text of the first element matching `selector`, `None` if nothing matches.
    async fn get_text(&self, selector: &str) -> Result<Option<String>, DriverError>;

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError>;

    /// Press Enter inside the element matching `selector`.
    async fn press_enter(&self, selector: &str) -> Result<(), DriverError>;

    /// Press a named key (`"Escape"`, `"Tab"`) inside the element matching `selector`.
    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError>;

    async fn click(&self, selector: &str) -> Result<(), DriverError>;

    async fn capture_screenshot(&self) -> Result<Screenshot, DriverError>;

    async fn close(&mut self) -> Result<(), DriverError>;
}

/// Acquires one exclusively owned driver per tracking run.
#[async_trait]
pub trait DriverLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError>;
}

/// A guard that ensures the driver is closed exactly once.
///
/// `release` closes it on the normal path. If the guard is dropped without being
/// released (an early return or a panic), the close runs on a spawned task.
pub struct DriverGuard {
    driver: Option<Box<dyn BrowserDriver>>,
}

impl DriverGuard {
    pub fn new(driver: Box<dyn BrowserDriver>) -> Self {
        Self {
            driver: Some(driver),
        }
    }

    pub async fn release(mut self) {
        if let Some(mut driver) = self.driver.take() {
            if let Err(e) = driver.close().await {
                debug!("Failed to close browser driver: {}", e);
            }
        }
    }
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        let Some(mut driver) = self.driver.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = driver.close().await {
                        debug!("Failed to close browser driver in Drop: {}", e);
                    }
                });
            }
            Err(_) => debug!("No runtime available to close browser driver in Drop"),
        }
    }
}

impl std::ops::Deref for DriverGuard {
    type Target = dyn BrowserDriver;

    fn deref(&self) -> &Self::Target {
        // `driver` is only taken by `release` (which consumes the guard) and `drop`.
        match self.driver.as_deref() {
            Some(driver) => driver,
            None => unreachable!("driver guard used after release"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::MemoryDriver;
    use super::*;

    #[tokio::test]
    async fn test_guard_release_closes_once() {
        let driver = MemoryDriver::new();
        let guard = DriverGuard::new(Box::new(driver.clone()));
        guard.release().await;
        assert_eq!(driver.close_calls(), 1);
    }

    #[tokio::test]
    async fn test_guard_drop_closes_on_spawned_task() {
        let driver = MemoryDriver::new();
        {
            let _guard = DriverGuard::new(Box::new(driver.clone()));
        }
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(driver.close_calls(), 1);
    }

    #[test]
    fn test_fatal_classification() {
        assert!(DriverError::SessionLost("ws closed".into()).is_fatal());
        assert!(!DriverError::Element {
            selector: "#x".into(),
            reason: "stale".into()
        }
        .is_fatal());
    }
}
