//! Method-based dispatch for a single template.
//!
//! A [`MethodTable`] maps request methods to endpoint values. Methods are
//! free-form upper-case tokens so the same table serves HTTP verbs and
//! socket event types (`CONNECT`, `MESSAGE`, ...). The token `*` accepts any
//! method that has no explicit binding.

/// Method token that matches every method.
pub const ANY_METHOD: &str = "*";

/// Maps methods to values for one path template.
///
/// # Example
///
/// ```rust
/// use nimbus_router::MethodTable;
///
/// let mut table = MethodTable::new();
/// table.insert("get", "list").unwrap();
/// table.insert("POST", "create").unwrap();
///
/// assert_eq!(table.get("GET"), Some(&"list"));
/// assert_eq!(table.get("DELETE"), None);
/// assert_eq!(table.methods().collect::<Vec<_>>(), vec!["GET", "POST"]);
/// ```
#[derive(Debug, Clone)]
pub struct MethodTable<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for MethodTable<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> MethodTable<T> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `method` to `value`.
    ///
    /// Returns the value back if the method is already bound, so the caller
    /// can report the duplicate.
    pub fn insert(&mut self, method: &str, value: T) -> Result<(), T> {
        let method = normalize_method(method);
        if self.entries.iter().any(|(m, _)| *m == method) {
            return Err(value);
        }
        self.entries.push((method, value));
        Ok(())
    }

    /// Returns the value bound to `method`, falling back to the `*` binding.
    #[must_use]
    pub fn get(&self, method: &str) -> Option<&T> {
        let method = normalize_method(method);
        self.entries
            .iter()
            .find(|(m, _)| *m == method)
            .or_else(|| self.entries.iter().find(|(m, _)| m == ANY_METHOD))
            .map(|(_, v)| v)
    }

    /// Iterates bound methods in registration order.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(m, _)| m.as_str())
    }

    /// Returns the number of bound methods.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no method is bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Upper-cases a method token, leaving `*` untouched.
pub(crate) fn normalize_method(method: &str) -> String {
    method.trim().to_ascii_uppercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_methods_are_case_insensitive() {
        let mut table = MethodTable::new();
        table.insert("get", 1).unwrap();
        assert_eq!(table.get("GET"), Some(&1));
        assert_eq!(table.get("Get"), Some(&1));
    }

    #[test]
    fn test_duplicate_method_returns_value() {
        let mut table = MethodTable::new();
        table.insert("GET", 1).unwrap();
        assert_eq!(table.insert("get", 2), Err(2));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_any_method_is_fallback() {
        let mut table = MethodTable::new();
        table.insert(ANY_METHOD, "any").unwrap();
        table.insert("DELETE", "delete").unwrap();

        assert_eq!(table.get("DELETE"), Some(&"delete"));
        assert_eq!(table.get("PATCH"), Some(&"any"));
    }

    #[test]
    fn test_socket_event_types() {
        let mut table = MethodTable::new();
        table.insert("CONNECT", "on_connect").unwrap();
        table.insert("MESSAGE", "on_message").unwrap();

        assert_eq!(table.get("MESSAGE"), Some(&"on_message"));
        assert_eq!(table.get("DISCONNECT"), None);
    }
}
