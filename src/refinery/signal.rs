// * Signal extraction
// * Reads the unread counter out of a page snapshot and, when it is absent,
// * asks the auth indicator whether the session has ended

use scraper::{Html, Selector};
use thiserror::Error;

use crate::config::settings::ProbeSettings;
use crate::refinery::auth::{indicator_from_config, AuthIndicator};

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Invalid CSS selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    #[error("Invalid login pattern '{pattern}': {reason}")]
    Pattern { pattern: String, reason: String },
}

/// What one snapshot says about the signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Element present and its text starts with a number
    Found(u64),
    /// Element present but its text is not a count
    Unparseable(String),
    /// Element absent
    Missing { logged_out: bool },
}

pub struct SignalExtractor {
    selector: Selector,
    auth: Box<dyn AuthIndicator>,
}

impl SignalExtractor {
    pub fn new(selector: &str, auth: Box<dyn AuthIndicator>) -> Result<Self, ExtractError> {
        let parsed = Selector::parse(selector).map_err(|e| ExtractError::Selector {
            selector: selector.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            selector: parsed,
            auth,
        })
    }

    pub fn from_settings(settings: &ProbeSettings) -> Result<Self, ExtractError> {
        Self::new(
            &settings.signal_selector,
            indicator_from_config(&settings.login_indicator)?,
        )
    }

    pub fn auth_indicator(&self) -> &dyn AuthIndicator {
        self.auth.as_ref()
    }

    pub fn extract(&self, raw_html: &str) -> Extraction {
        let document = Html::parse_document(raw_html);

        match document.select(&self.selector).next() {
            Some(element) => {
                let text: String = element.text().collect();
                match parse_count(&text) {
                    Some(count) => Extraction::Found(count),
                    None => Extraction::Unparseable(text.trim().to_string()),
                }
            }
            None => Extraction::Missing {
                logged_out: self.auth.is_logged_out(raw_html, &document),
            },
        }
    }
}

/// Leading decimal digits after optional whitespace; `"5 new"` is 5, `"new"` is None
pub fn parse_count(text: &str) -> Option<u64> {
    let trimmed = text.trim_start();
    let end = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    trimmed[..end].parse().ok()
}
