//! Ordered source-pattern routing for event triggers.
//!
//! Queue, bucket, schedule and bus-event routes are addressed by a source
//! identifier rather than a path. Patterns are tried in registration order
//! and the first match wins; there is no specificity ranking, so register
//! narrower patterns before broader ones.

use regex::Regex;

use crate::error::RouteError;

/// A matcher for source identifiers.
#[derive(Debug, Clone)]
pub enum SourcePattern {
    /// Matches the identifier exactly.
    Exact(String),
    /// Matches identifiers starting with the prefix.
    Prefix(String),
    /// Shell-style glob: `*` matches any run of characters, `?` one character.
    Glob {
        /// The glob as written.
        pattern: String,
        /// Anchored regex compiled from the glob.
        regex: Regex,
    },
}

impl SourcePattern {
    /// Creates an exact pattern.
    #[must_use]
    pub fn exact(source: impl Into<String>) -> Self {
        Self::Exact(source.into())
    }

    /// Creates a prefix pattern.
    #[must_use]
    pub fn prefix(prefix: impl Into<String>) -> Self {
        Self::Prefix(prefix.into())
    }

    /// Compiles a glob pattern.
    pub fn glob(pattern: impl Into<String>) -> Result<Self, RouteError> {
        let pattern = pattern.into();
        let mut expr = String::with_capacity(pattern.len() + 8);
        expr.push('^');
        for c in pattern.chars() {
            match c {
                '*' => expr.push_str(".*"),
                '?' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = Regex::new(&expr).map_err(|e| RouteError::InvalidPattern {
            pattern: pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::Glob { pattern, regex })
    }

    /// Parses the textual form used in configuration.
    ///
    /// `prefix:orders-` builds a prefix pattern, `glob:orders-*` or any text
    /// containing `*` or `?` builds a glob, and anything else is exact.
    pub fn parse(text: &str) -> Result<Self, RouteError> {
        if let Some(prefix) = text.strip_prefix("prefix:") {
            Ok(Self::prefix(prefix))
        } else if let Some(glob) = text.strip_prefix("glob:") {
            Self::glob(glob)
        } else if let Some(exact) = text.strip_prefix("exact:") {
            Ok(Self::exact(exact))
        } else if text.contains(['*', '?']) {
            Self::glob(text)
        } else {
            Ok(Self::exact(text))
        }
    }

    /// Returns true if `source` matches.
    #[must_use]
    pub fn matches(&self, source: &str) -> bool {
        match self {
            Self::Exact(s) => s == source,
            Self::Prefix(p) => source.starts_with(p.as_str()),
            Self::Glob { regex, .. } => regex.is_match(source),
        }
    }

    /// Returns a canonical textual form, used for duplicate detection and logs.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Exact(s) => format!("exact:{s}"),
            Self::Prefix(p) => format!("prefix:{p}"),
            Self::Glob { pattern, .. } => format!("glob:{pattern}"),
        }
    }
}

impl PartialEq for SourcePattern {
    fn eq(&self, other: &Self) -> bool {
        self.describe() == other.describe()
    }
}

impl Eq for SourcePattern {}

/// First-registered-wins router over source identifiers.
///
/// # Example
///
/// ```rust
/// use nimbus_router::{SourcePattern, SourceRouter};
///
/// let mut router = SourceRouter::new();
/// router.insert(SourcePattern::exact("orders-dlq"), "dead_letters").unwrap();
/// router.insert(SourcePattern::glob("orders-*").unwrap(), "orders").unwrap();
///
/// assert_eq!(router.resolve("orders-dlq"), Some(&"dead_letters"));
/// assert_eq!(router.resolve("orders-eu"), Some(&"orders"));
/// assert_eq!(router.resolve("billing"), None);
/// ```
#[derive(Debug, Clone)]
pub struct SourceRouter<T> {
    entries: Vec<(SourcePattern, T)>,
}

impl<T> Default for SourceRouter<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> SourceRouter<T> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a pattern. Identical patterns are rejected since the later
    /// one could never match.
    pub fn insert(&mut self, pattern: SourcePattern, value: T) -> Result<(), RouteError> {
        if self.entries.iter().any(|(p, _)| *p == pattern) {
            return Err(RouteError::DuplicatePattern {
                pattern: pattern.describe(),
            });
        }
        self.entries.push((pattern, value));
        Ok(())
    }

    /// Returns the value of the first pattern matching `source`.
    #[must_use]
    pub fn resolve(&self, source: &str) -> Option<&T> {
        self.entries
            .iter()
            .find(|(p, _)| p.matches(source))
            .map(|(_, v)| v)
    }

    /// Iterates patterns in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &SourcePattern> {
        self.entries.iter().map(|(p, _)| p)
    }

    /// Returns the number of patterns.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no pattern is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
