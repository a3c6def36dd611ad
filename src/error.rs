use thiserror::Error;

use crate::model::SectionKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("timed out fetching {url}")]
    Timeout { url: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("network error fetching {url}: {message}")]
    Network { url: String, message: String },
}

impl FetchError {
    /// Timeouts, connection failures, 5xx and 429 are worth another attempt.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Timeout { .. } | FetchError::Network { .. } => true,
            FetchError::Status { status, .. } => *status >= 500 || *status == 429,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        let url = e.url().map(|u| u.to_string()).unwrap_or_default();
        if e.is_timeout() {
            FetchError::Timeout { url }
        } else if let Some(status) = e.status() {
            FetchError::Status {
                url,
                status: status.as_u16(),
            }
        } else {
            FetchError::Network {
                url,
                message: e.to_string(),
            }
        }
    }
}

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("listing page could not be fetched: {0}")]
    Fetch(#[from] FetchError),

    #[error("no company identifiers found on {pages} listing page(s)")]
    NoIdentifiers { pages: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{section} section: {reason}")]
pub struct ExtractionError {
    pub section: SectionKind,
    pub reason: String,
}

impl ExtractionError {
    pub fn new(section: SectionKind, reason: impl Into<String>) -> Self {
        ExtractionError {
            section,
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored value is invalid: {0}")]
    Corrupt(String),
}
