//! Failure classification.
//!
//! The circuit breaker and the retry policy both need to decide whether an
//! error "counts". A business error such as `NotFound` says nothing about
//! the health of a dependency, so by default only infrastructure-shaped
//! categories count.

use std::collections::HashSet;

use nimbus_core::{ErrorCategory, NimbusError};

/// Decides whether an error counts as a failure.
pub trait FailureClassifier: Send + Sync {
    /// Returns true if `error` counts.
    fn is_failure(&self, error: &NimbusError) -> bool;
}

impl<F> FailureClassifier for F
where
    F: Fn(&NimbusError) -> bool + Send + Sync,
{
    fn is_failure(&self, error: &NimbusError) -> bool {
        self(error)
    }
}

/// Counts errors whose category is in a fixed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoryClassifier {
    categories: HashSet<ErrorCategory>,
}

impl CategoryClassifier {
    /// Creates a classifier from a set of categories.
    pub fn new(categories: impl IntoIterator<Item = ErrorCategory>) -> Self {
        Self {
            categories: categories.into_iter().collect(),
        }
    }

    /// Categories that trip a circuit breaker by default.
    #[must_use]
    pub fn breaker_default() -> Self {
        Self::new([
            ErrorCategory::Timeout,
            ErrorCategory::Internal,
            ErrorCategory::External,
        ])
    }

    /// Categories retried by default.
    #[must_use]
    pub fn retry_default() -> Self {
        Self::new([ErrorCategory::Timeout, ErrorCategory::External])
    }

    /// Returns true if the category is counted.
    #[must_use]
    pub fn contains(&self, category: ErrorCategory) -> bool {
        self.categories.contains(&category)
    }
}

impl FailureClassifier for CategoryClassifier {
    fn is_failure(&self, error: &NimbusError) -> bool {
        self.contains(error.category())
    }
}
