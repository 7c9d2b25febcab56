// * Logged-out detection
// * Heuristic by nature, so the predicate is pluggable: a CSS selector for
// * sites with a stable login link, a regex over the raw markup otherwise

use regex::Regex;
use scraper::{Html, Selector};

use crate::config::settings::LoginIndicator;
use crate::refinery::signal::ExtractError;

/// Decides whether a fetched document shows the "not authenticated" state
pub trait AuthIndicator: Send + Sync {
    fn is_logged_out(&self, raw_html: &str, document: &Html) -> bool;

    /// Short description for logs
    fn describe(&self) -> String;
}

/// Logged out when the selector matches any element
#[derive(Debug, Clone)]
pub struct SelectorIndicator {
    source: String,
    selector: Selector,
}

impl SelectorIndicator {
    pub fn new(selector: &str) -> Result<Self, ExtractError> {
        let parsed = Selector::parse(selector).map_err(|e| ExtractError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: selector.to_string(),
            selector: parsed,
        })
    }
}

impl AuthIndicator for SelectorIndicator {
    fn is_logged_out(&self, _raw_html: &str, document: &Html) -> bool {
        document.select(&self.selector).next().is_some()
    }

    fn describe(&self) -> String {
        format!("selector {}", self.source)
    }
}

/// Logged out when the pattern matches the raw markup
#[derive(Debug, Clone)]
pub struct PatternIndicator {
    pattern: Regex,
}

impl PatternIndicator {
    pub fn new(pattern: &str) -> Result<Self, ExtractError> {
        let pattern = Regex::new(pattern).map_err(|e| ExtractError::Pattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { pattern })
    }
}

impl AuthIndicator for PatternIndicator {
    fn is_logged_out(&self, raw_html: &str, _document: &Html) -> bool {
        self.pattern.is_match(raw_html)
    }

    fn describe(&self) -> String {
        format!("pattern {}", self.pattern.as_str())
    }
}

/// Builds the configured indicator
pub fn indicator_from_config(
    indicator: &LoginIndicator,
) -> Result<Box<dyn AuthIndicator>, ExtractError> {
    Ok(match indicator {
        LoginIndicator::Selector(s) => Box::new(SelectorIndicator::new(s)?),
        LoginIndicator::Pattern(p) => Box::new(PatternIndicator::new(p)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LOGGED_OUT: &str = r#"<html><body><a id="login-link" href="/login">Log in</a></body></html>"#;
    const LOGGED_IN: &str = r#"<html><body><a href="/logout">Sign out</a></body></html>"#;

    fn check(indicator: &dyn AuthIndicator, raw: &str) -> bool {
        indicator.is_logged_out(raw, &Html::parse_document(raw))
    }

    #[test]
    fn test_selector_indicator() {
        let indicator = SelectorIndicator::new("#login-link").unwrap();
        assert!(check(&indicator, LOGGED_OUT));
        assert!(!check(&indicator, LOGGED_IN));
    }

    #[test]
    fn test_pattern_indicator_is_case_insensitive_when_asked() {
        let indicator = PatternIndicator::new(r"(?i)log\s*in").unwrap();
        assert!(check(&indicator, LOGGED_OUT));
        assert!(!check(&indicator, LOGGED_IN));
    }

    #[test]
    fn test_invalid_selector_is_rejected() {
        assert!(matches!(
            SelectorIndicator::new("a[[["),
            Err(ExtractError::Selector { .. })
        ));
    }

    #[test]
    fn test_invalid_pattern_is_rejected() {
        assert!(matches!(
            PatternIndicator::new("(unclosed"),
            Err(ExtractError::Pattern { .. })
        ));
    }

    #[test]
    fn test_indicator_from_config() {
        let indicator =
            indicator_from_config(&LoginIndicator::Pattern("Sign in".into())).unwrap();
        assert_eq!(indicator.describe(), "pattern Sign in");
    }
}
