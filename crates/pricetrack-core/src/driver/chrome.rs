use super::{BrowserDriver, DriverError, DriverLauncher, Screenshot};
use crate::config::TrackerConfig;
use async_trait::async_trait;
use chromiumoxide::error::CdpError;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::{Browser, BrowserConfig, Element, Page};
use futures::StreamExt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// Launch options for a Chromium session.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub window_size: (u32, u32),
    pub executable: Option<PathBuf>,
    pub proxy_server: Option<String>,
    pub request_timeout: Duration,
}

impl From<&TrackerConfig> for ChromeOptions {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            headless: config.headless,
            window_size: (config.window_width, config.window_height),
            executable: config.chrome_executable.clone(),
            proxy_server: config.proxy_server.clone(),
            request_timeout: config.navigation_timeout(),
        }
    }
}

impl ChromeOptions {
    fn browser_config(&self) -> Result<BrowserConfig, DriverError> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.window_size.0, self.window_size.1)
            .request_timeout(self.request_timeout)
            .no_sandbox()
            .arg("--disable-dev-shm-usage")
            .arg("--disable-notifications");

        if !self.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.executable {
            builder = builder.chrome_executable(path);
        }
        if let Some(proxy) = &self.proxy_server {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder.build().map_err(DriverError::Launch)
    }
}

/// A single Chromium browser with one page, driven over CDP.
pub struct ChromeDriver {
    browser: Browser,
    page: Page,
    handle: JoinHandle<()>,
    closed: bool,
}

impl ChromeDriver {
    pub async fn launch(options: &ChromeOptions) -> Result<Self, DriverError> {
        let (browser, mut handler) = Browser::launch(options.browser_config()?)
            .await
            .map_err(|e| DriverError::Launch(e.to_string()))?;

        let handle = tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    debug!("Browser handler error: {:?}", h);
                    break;
                }
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handle.abort();
                return Err(DriverError::Launch(e.to_string()));
            }
        };

        Ok(Self {
            browser,
            page,
            handle,
            closed: false,
        })
    }

    async fn first_element(&self, selector: &str) -> Result<Option<Element>, DriverError> {
        let elements = self
            .page
            .find_elements(selector)
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(elements.into_iter().next())
    }

    async fn require_element(&self, selector: &str) -> Result<Element, DriverError> {
        self.first_element(selector)
            .await?
            .ok_or_else(|| DriverError::Element {
                selector: selector.to_string(),
                reason: "no matching element".to_string(),
            })
    }
}

fn is_connection_error(e: &CdpError) -> bool {
    matches!(
        e,
        CdpError::Ws(_) | CdpError::ChannelSendError(_) | CdpError::NoResponse
    )
}

fn element_error(selector: &str, e: CdpError) -> DriverError {
    if is_connection_error(&e) {
        DriverError::SessionLost(e.to_string())
    } else {
        DriverError::Element {
            selector: selector.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl BrowserDriver for ChromeDriver {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page.goto(url).await.map_err(|e| {
            if is_connection_error(&e) {
                DriverError::SessionLost(e.to_string())
            } else {
                DriverError::Navigation {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        Ok(())
    }

    async fn element_exists(&self, selector: &str) -> Result<bool, DriverError> {
        Ok(self.first_element(selector).await?.is_some())
    }

    async fn get_text(&self, selector: &str) -> Result<Option<String>, DriverError> {
        match self.first_element(selector).await? {
            Some(element) => element
                .inner_text()
                .await
                .map_err(|e| element_error(selector, e)),
            None => Ok(None),
        }
    }

    async fn type_text(&self, selector: &str, text: &str) -> Result<(), DriverError> {
        let element = self.require_element(selector).await?;
        element
            .click()
            .await
            .map_err(|e| element_error(selector, e))?;
        element
            .type_str(text)
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn press_enter(&self, selector: &str) -> Result<(), DriverError> {
        self.press_key(selector, "Enter").await
    }

    async fn press_key(&self, selector: &str, key: &str) -> Result<(), DriverError> {
        self.require_element(selector)
            .await?
            .press_key(key)
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn click(&self, selector: &str) -> Result<(), DriverError> {
        self.require_element(selector)
            .await?
            .click()
            .await
            .map_err(|e| element_error(selector, e))?;
        Ok(())
    }

    async fn capture_screenshot(&self) -> Result<Screenshot, DriverError> {
        self.page
            .screenshot(ScreenshotParams::builder().build())
            .await
            .map_err(|e| {
                if is_connection_error(&e) {
                    DriverError::SessionLost(e.to_string())
                } else {
                    DriverError::Screenshot(e.to_string())
                }
            })
    }

    async fn close(&mut self) -> Result<(), DriverError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let result = match self.browser.close().await {
            Ok(_) => {
                if let Err(e) = self.browser.wait().await {
                    debug!("Browser process did not exit cleanly: {}", e);
                }
                Ok(())
            }
            Err(e) => Err(DriverError::SessionLost(e.to_string())),
        };
        self.handle.abort();
        result
    }
}

/// Launches a fresh Chromium process for every tracking run.
#[derive(Debug, Clone)]
pub struct ChromeLauncher {
    options: ChromeOptions,
}

impl ChromeLauncher {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl DriverLauncher for ChromeLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserDriver>, DriverError> {
        let driver = ChromeDriver::launch(&self.options).await?;
        Ok(Box::new(driver))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_from_config() {
        let config = TrackerConfig {
            headless: false,
            proxy_server: Some("http://127.0.0.1:8080".to_string()),
            ..TrackerConfig::default()
        };
        let options = ChromeOptions::from(&config);
        assert!(!options.headless);
        assert_eq!(options.window_size, (1920, 1080));
        assert_eq!(options.proxy_server.as_deref(), Some("http://127.0.0.1:8080"));
    }

    #[test]
    fn test_launcher_is_object_safe() {
        let launcher = ChromeLauncher::new(ChromeOptions::from(&TrackerConfig::default()));
        let _launcher_trait: &dyn DriverLauncher = &launcher;
    }
}
