//! Provider abstraction for the external text-classification service
//!
//! Defines the `Provider` trait that decouples the dispatch pool from the
//! concrete service client. A provider performs exactly one call per
//! invocation on behalf of one `ResourceIdentity`; retry, rate limiting and
//! failover live in the pool. `GeminiProvider` is the production
//! implementation; tests substitute scripted providers.
//!
//! Failure handling is split in two:
//! - `ProviderError` describes what happened on the wire
//! - `classify` maps it onto the recovery policy (`FailureClass`)

pub mod classify;
pub mod gemini;
pub mod identity;
pub mod response;

pub use classify::{FailureClass, classify, classify_message, classify_status};
pub use gemini::{GeminiProvider, TierModel};
pub use identity::{ResourceIdentity, ServiceTier};
pub use response::{MalformedOutput, clean_response_text, parse_structured};

use std::future::Future;
use std::pin::Pin;

/// Errors from a single call to the classification service.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The service answered with a non-success HTTP status.
    #[error("upstream returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("connection failed: {0}")]
    Connection(String),

    /// Success status, but the response envelope carried no usable text.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("internal provider error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Short label for logs and metric labels.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Upstream { .. } => "upstream",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Connection(_) => "connection",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Internal(_) => "internal",
        }
    }
}

pub type Result<T> = std::result::Result<T, ProviderError>;

/// A classification service reachable under several resource identities.
///
/// Uses `Pin<Box<dyn Future>>` return types so the pool can hold an
/// `Arc<dyn Provider>`.
pub trait Provider: Send + Sync {
    /// Identifier for logging (e.g. "gemini").
    fn id(&self) -> &str;

    /// Send one prompt using the credential and model of `identity`.
    ///
    /// Returns the raw text produced by the service. Parsing that text into
    /// a structured result is the caller's job.
    fn generate<'a>(
        &'a self,
        identity: ResourceIdentity,
        prompt: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kind_labels() {
        let upstream = ProviderError::Upstream {
            status: 429,
            body: "quota".into(),
        };
        assert_eq!(upstream.kind(), "upstream");
        assert_eq!(ProviderError::Timeout("t".into()).kind(), "timeout");
        assert_eq!(ProviderError::Connection("c".into()).kind(), "connection");
        assert_eq!(
            ProviderError::InvalidResponse("r".into()).kind(),
            "invalid_response"
        );
        assert_eq!(ProviderError::Internal("i".into()).kind(), "internal");
    }

    #[test]
    fn upstream_error_display_includes_status_and_body() {
        let err = ProviderError::Upstream {
            status: 503,
            body: "model overloaded".into(),
        };
        assert_eq!(err.to_string(), "upstream returned 503: model overloaded");
    }
}
