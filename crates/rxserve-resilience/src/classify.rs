//! Backend error currency and transient classification.

use rxserve_core::FailureKind;
use std::collections::HashSet;

/// Error reported by an outbound adapter (store or remote cache).
///
/// Adapters tag every error with a category name; the classifier decides
/// whether the category is worth retrying. Categories are an open set so
/// new adapters can introduce their own without touching this crate.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{category}: {message}")]
pub struct BackendError {
    /// Adapter-assigned category, e.g. `"connection"`.
    pub category: String,
    /// Human-readable detail.
    pub message: String,
}

impl BackendError {
    pub fn new(category: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category: category.into(),
            message: message.into(),
        }
    }

    /// A connection-class error (always transient under the defaults).
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new("connection", message)
    }

    /// The operation ran past its budget inside the backend or executor.
    pub fn execution_timeout(message: impl Into<String>) -> Self {
        Self::new("execution-timeout", message)
    }

    /// The backend shed load.
    pub fn server_busy(message: impl Into<String>) -> Self {
        Self::new("server-busy", message)
    }
}

/// Category table deciding which backend errors are transient.
#[derive(Debug, Clone)]
pub struct TransientClassifier {
    categories: HashSet<String>,
}

impl TransientClassifier {
    /// Classifier over an explicit category set.
    pub fn with_categories<I, S>(categories: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            categories: categories.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_transient(&self, error: &BackendError) -> bool {
        self.categories.contains(&error.category)
    }

    /// Maps an exhausted or unretryable backend error onto the failure
    /// taxonomy.
    pub fn classify(&self, error: &BackendError) -> FailureKind {
        if self.is_transient(error) {
            FailureKind::Transient(error.to_string())
        } else {
            FailureKind::PermanentBackend(error.to_string())
        }
    }
}

impl Default for TransientClassifier {
    fn default() -> Self {
        Self::with_categories(["connection", "execution-timeout", "server-busy"])
    }
}
