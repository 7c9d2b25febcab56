use crate::network::errors::NetworkError;
use crate::network::identity::BrowserIdentity;
use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;

// * Status and body of a completed request, whatever the status.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

// * Seam between the monitor and the wire; mocked in tests.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait HttpClient: Send + Sync {
    // * GET a page, following redirects.
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError>;

    // * POST a JSON document as text/plain (the collector rejects preflighted JSON).
    async fn post_text(&self, url: &str, body: String) -> Result<HttpResponse, NetworkError>;
}

// * Production client on reqwest.
pub struct ReqwestHttpClient {
    inner: Client,
}

impl ReqwestHttpClient {
    // * Builds a client carrying the given identity as default headers.
    // * Every instance has its own cookie jar.
    pub fn new(identity: &BrowserIdentity, timeout: Duration) -> Result<Self, NetworkError> {
        let client = Client::builder()
            .default_headers(identity.headers()?)
            .cookie_store(true)
            .timeout(timeout)
            .build()?;

        Ok(Self { inner: client })
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn get(&self, url: &str) -> Result<HttpResponse, NetworkError> {
        tracing::debug!(url = url, "GET");
        let resp = self.inner.get(url).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        tracing::debug!(url = url, status = status, bytes = body.len(), "GET complete");
        Ok(HttpResponse { status, body })
    }

    async fn post_text(&self, url: &str, body: String) -> Result<HttpResponse, NetworkError> {
        let resp = self
            .inner
            .post(url)
            .header(
                CONTENT_TYPE,
                HeaderValue::from_static("text/plain;charset=UTF-8"),
            )
            .body(body)
            .send()
            .await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(HttpResponse { status, body })
    }
}
