//! Typed catalog errors enabling retry classification.

use thiserror::Error;

/// Errors surfaced by the remote catalog client.
///
/// `is_retryable()` distinguishes transient failures (connection resets,
/// rate limits, server errors) from permanent ones (API rejections,
/// malformed responses) so the per-item retry loop can abort early.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("HTTP error while {context}: {source}")]
    Http {
        source: reqwest::Error,
        context: String,
    },

    #[error("HTTP error {status} for {url}")]
    HttpStatus { status: u16, url: String },

    /// The API answered but reported a failure (`stat != "ok"`).
    #[error("API request failed: error {code}: {message}")]
    Api { code: i64, message: String },

    /// A listing or pagination request failed; the affected scope must be
    /// treated as incomplete for this run.
    #[error("listing of {scope} failed: {source}")]
    Listing {
        scope: String,
        #[source]
        source: Box<CatalogError>,
    },

    /// The response shape did not match expectations.
    #[error("unexpected response while {0}")]
    Decode(String),
}

impl CatalogError {
    /// Whether this error is transient and worth retrying within the run.
    pub fn is_retryable(&self) -> bool {
        match self {
            CatalogError::Http { .. } => true,
            CatalogError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            CatalogError::Api { .. } => false,
            CatalogError::Listing { source, .. } => source.is_retryable(),
            CatalogError::Decode(_) => false,
        }
    }

    pub(crate) fn listing(scope: impl Into<String>, source: CatalogError) -> Self {
        CatalogError::Listing {
            scope: scope.into(),
            source: Box::new(source),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_5xx_retryable() {
        let e = CatalogError::HttpStatus {
            status: 503,
            url: "x".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn http_429_retryable() {
        let e = CatalogError::HttpStatus {
            status: 429,
            url: "x".into(),
        };
        assert!(e.is_retryable());
    }

    #[test]
    fn http_404_not_retryable() {
        let e = CatalogError::HttpStatus {
            status: 404,
            url: "x".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn api_error_not_retryable() {
        let e = CatalogError::Api {
            code: 100,
            message: "Invalid API Key".into(),
        };
        assert!(!e.is_retryable());
    }

    #[test]
    fn listing_inherits_retryability() {
        let inner = CatalogError::HttpStatus {
            status: 500,
            url: "x".into(),
        };
        assert!(CatalogError::listing("photostream", inner).is_retryable());

        let inner = CatalogError::Decode("parsing photos".into());
        assert!(!CatalogError::listing("photostream", inner).is_retryable());
    }
}
