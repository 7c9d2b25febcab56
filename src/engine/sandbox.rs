// * Isolated probe contexts
// * Each probe opens a fresh page that shares nothing with the user's live
// * session state and is torn down when the probe ends

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::settings::{ProbeMode, ProbeSettings};
use crate::network::client::{HttpClient, ReqwestHttpClient};
use crate::network::errors::NetworkError;
use crate::network::identity::BrowserIdentity;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Sandbox failed to load: {0}")]
    Load(String),

    #[error("Sandbox snapshot failed: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Network(#[from] NetworkError),
}

/// Factory for disposable probe pages
#[async_trait]
pub trait ProbeSandbox: Send + Sync {
    async fn open(&self, url: &str) -> Result<Box<dyn SandboxPage>, SandboxError>;
}

/// One loaded page inside a sandbox
#[async_trait]
pub trait SandboxPage: Send {
    /// Current document markup
    async fn snapshot(&mut self) -> Result<String, SandboxError>;

    /// True once later snapshots can no longer differ from the last one
    fn is_settled(&self) -> bool;

    /// Releases the page and everything backing it
    async fn close(&mut self);
}

/// Fetch-and-parse sandbox: one GET with a client built for this probe alone,
/// so no cookie jar or connection is shared between probes
pub struct HttpSandbox {
    identity: BrowserIdentity,
    timeout: Duration,
}

impl HttpSandbox {
    pub fn new(identity: BrowserIdentity, timeout: Duration) -> Self {
        Self { identity, timeout }
    }
}

#[async_trait]
impl ProbeSandbox for HttpSandbox {
    async fn open(&self, url: &str) -> Result<Box<dyn SandboxPage>, SandboxError> {
        url::Url::parse(url).map_err(|_| NetworkError::InvalidUrl(url.to_string()))?;
        let client = ReqwestHttpClient::new(&self.identity, self.timeout)?;
        let response = client.get(url).await?;

        // * 4xx pages still render a document worth classifying (login walls)
        if response.status >= 500 {
            return Err(SandboxError::Load(format!("HTTP {}", response.status)));
        }

        tracing::debug!(status = response.status, bytes = response.body.len(), "Sandbox page fetched");
        Ok(Box::new(StaticPage {
            body: Some(response.body),
        }))
    }
}

/// A document that cannot change after it was fetched
#[derive(Debug)]
pub struct StaticPage {
    body: Option<String>,
}

impl StaticPage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: Some(body.into()),
        }
    }
}

#[async_trait]
impl SandboxPage for StaticPage {
    async fn snapshot(&mut self) -> Result<String, SandboxError> {
        self.body
            .clone()
            .ok_or_else(|| SandboxError::Snapshot("page already closed".into()))
    }

    fn is_settled(&self) -> bool {
        true
    }

    async fn close(&mut self) {
        self.body = None;
    }
}

/// Builds the sandbox the probe settings ask for
pub fn sandbox_from_settings(settings: &ProbeSettings) -> Result<Arc<dyn ProbeSandbox>, SandboxError> {
    let identity = BrowserIdentity::new(settings.user_agent.as_deref(), settings.cookie.as_deref());
    // * The request itself must finish inside the inner polling window
    let timeout = Duration::from_secs(settings.inner_timeout_secs.max(1));

    Ok(match settings.mode {
        ProbeMode::Http => Arc::new(HttpSandbox::new(identity, timeout)),
        ProbeMode::Browser => Arc::new(crate::engine::browser::BrowserSandbox::new(
            settings.browser_profile_dir.clone(),
            identity.user_agent,
        )),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_page_is_settled_and_closes() {
        let mut page = StaticPage::new("<p>1</p>");
        assert!(page.is_settled());
        assert_eq!(page.snapshot().await.unwrap(), "<p>1</p>");
        page.close().await;
        assert!(matches!(page.snapshot().await, Err(SandboxError::Snapshot(_))));
    }

    #[tokio::test]
    async fn test_unreachable_target_is_load_error() {
        let sandbox = HttpSandbox::new(BrowserIdentity::default(), Duration::from_secs(2));
        let err = sandbox.open("http://127.0.0.1:1/").await.err().unwrap();
        assert!(matches!(err, SandboxError::Network(_)));
    }

    #[tokio::test]
    async fn test_malformed_target_is_rejected_before_fetch() {
        let sandbox = HttpSandbox::new(BrowserIdentity::default(), Duration::from_secs(2));
        let err = sandbox.open("not a url").await.err().unwrap();
        assert!(matches!(err, SandboxError::Network(NetworkError::InvalidUrl(_))));
    }

    #[test]
    fn test_sandbox_from_default_settings() {
        assert!(sandbox_from_settings(&ProbeSettings::default()).is_ok());
    }
}
