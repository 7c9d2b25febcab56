// * Headless browser sandbox
// * For targets that render the counter client-side: a throwaway Chromium
// * instance per probe, pointed at the profile that holds the login session

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::page::Page;
use futures::StreamExt;
use std::path::PathBuf;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::engine::sandbox::{ProbeSandbox, SandboxError, SandboxPage};

// * Hides the automation flag before any page script runs
const WEBDRIVER_MASK: &str = r#"
(() => {
    Object.defineProperty(navigator, 'webdriver', {
        get: () => undefined,
        configurable: true
    });
    Object.defineProperty(navigator, 'languages', {
        get: () => ['en-GB', 'en'],
        configurable: true
    });
})();
"#;

pub struct BrowserSandbox {
    profile_dir: Option<PathBuf>,
    user_agent: String,
}

impl BrowserSandbox {
    pub fn new(profile_dir: Option<PathBuf>, user_agent: String) -> Self {
        Self {
            profile_dir,
            user_agent,
        }
    }

    fn config(&self) -> Result<BrowserConfig, SandboxError> {
        let mut builder = BrowserConfig::builder()
            .no_sandbox()
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage")
            .arg("--disable-gpu")
            .arg(format!("--user-agent={}", self.user_agent));

        if let Some(dir) = &self.profile_dir {
            builder = builder.user_data_dir(dir);
        }

        builder.build().map_err(SandboxError::Load)
    }
}

#[async_trait]
impl ProbeSandbox for BrowserSandbox {
    async fn open(&self, url: &str) -> Result<Box<dyn SandboxPage>, SandboxError> {
        let (browser, mut handler) = Browser::launch(self.config()?)
            .await
            .map_err(|e| SandboxError::Load(format!("browser launch: {}", e)))?;

        let events = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        // * From here on the page owns the browser, so every failure closes it
        let mut sandbox_page = BrowserPage {
            browser: Some(browser),
            page: None,
            events: Some(events),
        };

        match sandbox_page.navigate(url).await {
            Ok(()) => {
                info!(url = url, "Browser sandbox loaded");
                Ok(Box::new(sandbox_page))
            }
            Err(e) => {
                sandbox_page.close().await;
                Err(e)
            }
        }
    }
}

pub struct BrowserPage {
    browser: Option<Browser>,
    page: Option<Page>,
    events: Option<JoinHandle<()>>,
}

impl BrowserPage {
    async fn navigate(&mut self, url: &str) -> Result<(), SandboxError> {
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| SandboxError::Load("browser already closed".into()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| SandboxError::Load(e.to_string()))?;

        if let Err(e) = page.evaluate_on_new_document(WEBDRIVER_MASK).await {
            warn!(error = %e, "Webdriver mask injection failed");
        }

        page.goto(url)
            .await
            .map_err(|e| SandboxError::Load(format!("navigation: {}", e)))?;

        self.page = Some(page);
        Ok(())
    }
}

#[async_trait]
impl SandboxPage for BrowserPage {
    async fn snapshot(&mut self) -> Result<String, SandboxError> {
        let page = self
            .page
            .as_ref()
            .ok_or_else(|| SandboxError::Snapshot("page already closed".into()))?;
        page.content()
            .await
            .map_err(|e| SandboxError::Snapshot(e.to_string()))
    }

    fn is_settled(&self) -> bool {
        false
    }

    async fn close(&mut self) {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        if let Some(mut browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                debug!(error = %e, "Browser close request failed");
            }
            let _ = browser.wait().await;
        }
        if let Some(events) = self.events.take() {
            events.abort();
        }
        debug!("Browser sandbox closed");
    }
}

impl Drop for BrowserPage {
    fn drop(&mut self) {
        // * Can't await here; the browser's own Drop kills the child process
        if let Some(events) = self.events.take() {
            events.abort();
        }
    }
}
