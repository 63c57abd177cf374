//! Failure classification for classification-service calls
//!
//! Maps a `ProviderError` onto the recovery policy the worker applies:
//! quota failures retire the identity and hand the job back to the queue,
//! transient failures are retried in place with backoff, and anything else
//! consumes the job as an error.

use crate::ProviderError;

/// Recovery policy for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Identity is out of budget; requeue the job and retire the identity.
    QuotaExceeded,
    /// Retry on the same identity after a backoff.
    Transient,
    /// Not recoverable by repetition; consume the job as an error.
    Unclassified,
}

impl FailureClass {
    pub fn label(&self) -> &'static str {
        match self {
            FailureClass::QuotaExceeded => "quota_exceeded",
            FailureClass::Transient => "transient",
            FailureClass::Unclassified => "unclassified",
        }
    }
}

/// Markers the service uses for per-key quota and rate-limit rejections.
const QUOTA_PATTERNS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "ratelimit",
    "quota",
    "resource exhausted",
    "resource_exhausted",
    "too many requests",
];

/// Markers for failures that tend to clear on their own.
const TRANSIENT_PATTERNS: &[&str] = &[
    "timeout",
    "timed out",
    "deadline exceeded",
    "deadline_exceeded",
    "unavailable",
    "temporarily",
    "overloaded",
    "connection reset",
    "connection refused",
    "try again",
];

/// Classify a free-form error message by its markers.
///
/// Quota markers win over transient ones: "quota exceeded, try again later"
/// must retire the identity rather than retry it. Returns `None` when no
/// marker matches.
pub fn classify_message(message: &str) -> Option<FailureClass> {
    let lower = message.to_lowercase();
    if QUOTA_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FailureClass::QuotaExceeded);
    }
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        return Some(FailureClass::Transient);
    }
    None
}

/// Classify an HTTP error response by status and body.
///
/// 429 is always quota. 408 and the gateway-style 5xx codes are transient.
/// Other statuses fall back to the body markers, then to `Unclassified`.
pub fn classify_status(status: u16, body: &str) -> FailureClass {
    match status {
        429 => FailureClass::QuotaExceeded,
        408 | 500 | 502 | 503 | 504 => {
            // A 503 carrying a quota marker is still a quota rejection.
            match classify_message(body) {
                Some(FailureClass::QuotaExceeded) => FailureClass::QuotaExceeded,
                _ => FailureClass::Transient,
            }
        }
        _ => classify_message(body).unwrap_or(FailureClass::Unclassified),
    }
}

/// Classify any provider error.
pub fn classify(error: &ProviderError) -> FailureClass {
    match error {
        ProviderError::Upstream { status, body } => classify_status(*status, body),
        ProviderError::Timeout(_) | ProviderError::Connection(_) => FailureClass::Transient,
        ProviderError::InvalidResponse(msg) | ProviderError::Internal(msg) => {
            classify_message(msg).unwrap_or(FailureClass::Unclassified)
        }
    }
}
