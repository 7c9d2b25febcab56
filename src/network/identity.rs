use crate::network::errors::NetworkError;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, COOKIE, USER_AGENT};

// * Desktop Chrome UA used when none is configured
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.6099.109 Safari/537.36";

// * BrowserIdentity makes a sandbox fetch look like the page the user has open:
// * same browser identity, same session cookie.
#[derive(Debug, Clone)]
pub struct BrowserIdentity {
    pub user_agent: String,
    pub accept_language: String,
    pub cookie: Option<String>,
}

impl Default for BrowserIdentity {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            accept_language: "en-GB,en;q=0.9".to_string(),
            cookie: None,
        }
    }
}

impl BrowserIdentity {
    // * Builds an identity from optional overrides, keeping defaults for the rest
    pub fn new(user_agent: Option<&str>, cookie: Option<&str>) -> Self {
        let mut identity = Self::default();
        if let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) {
            identity.user_agent = ua.to_string();
        }
        identity.cookie = cookie
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        identity
    }

    // * Renders the identity as default request headers.
    pub fn headers(&self) -> Result<HeaderMap, NetworkError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&self.user_agent)
                .map_err(|_| NetworkError::InvalidHeader("User-Agent"))?,
        );
        headers.insert(
            ACCEPT_LANGUAGE,
            HeaderValue::from_str(&self.accept_language)
                .map_err(|_| NetworkError::InvalidHeader("Accept-Language"))?,
        );
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml;q=0.9,*/*;q=0.8"),
        );
        if let Some(cookie) = &self.cookie {
            let mut value =
                HeaderValue::from_str(cookie).map_err(|_| NetworkError::InvalidHeader("Cookie"))?;
            value.set_sensitive(true);
            headers.insert(COOKIE, value);
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_identity_headers() {
        let headers = BrowserIdentity::default().headers().unwrap();
        assert!(headers
            .get(USER_AGENT)
            .unwrap()
            .to_str()
            .unwrap()
            .contains("Chrome/120"));
        assert!(headers.get(COOKIE).is_none());
    }

    #[test]
    fn test_overrides_and_blank_cookie() {
        let identity = BrowserIdentity::new(Some("probe/1.0"), Some("   "));
        assert_eq!(identity.user_agent, "probe/1.0");
        assert!(identity.cookie.is_none());
    }

    #[test]
    fn test_cookie_header_is_sensitive() {
        let identity = BrowserIdentity::new(None, Some("session=abc"));
        let headers = identity.headers().unwrap();
        let cookie = headers.get(COOKIE).unwrap();
        assert_eq!(cookie, "session=abc");
        assert!(cookie.is_sensitive());
    }

    #[test]
    fn test_invalid_header_is_an_error() {
        let identity = BrowserIdentity::new(Some("bad\nagent"), None);
        assert!(matches!(
            identity.headers(),
            Err(NetworkError::InvalidHeader("User-Agent"))
        ));
    }
}
