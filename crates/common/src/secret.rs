//! Redacting wrapper for API keys and other credentials

use std::fmt;
use zeroize::Zeroize;

/// Sensitive value, redacted in Debug/Display and zeroed on drop.
pub struct Secret<T: Zeroize>(T);

/// A service API key as loaded from the environment or a key file.
pub type ApiKey = Secret<String>;

impl<T: Zeroize> Secret<T> {
    pub fn new(value: T) -> Self {
        Self(value)
    }

    /// Expose the inner value. Only the HTTP layer should need this.
    pub fn expose(&self) -> &T {
        &self.0
    }
}

impl Secret<String> {
    /// Short non-sensitive prefix for log lines, e.g. `AIza…`.
    ///
    /// Keys shorter than eight characters are fully masked.
    pub fn preview(&self) -> String {
        if self.0.chars().count() < 8 {
            return "…".to_string();
        }
        let head: String = self.0.chars().take(4).collect();
        format!("{head}…")
    }
}

impl<T: Zeroize> fmt::Debug for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> fmt::Display for Secret<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T: Zeroize> Drop for Secret<T> {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl<T: Zeroize + Clone> Clone for Secret<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}
