//! Path-template router.
//!
//! This module provides [`Router`], the primary interface for registering
//! path templates and resolving request paths against them.

use std::ops::ControlFlow;

use crate::error::{LookupError, RouteError};
use crate::node::Node;
use crate::params::Params;
use crate::RouteMatch;

/// A radix tree router over path templates.
///
/// Each template carries a [`MethodTable`](crate::MethodTable) of values of
/// type `T`; the dispatcher stores route indices, tests typically store
/// plain strings.
///
/// # Example
///
/// ```rust
/// use nimbus_router::Router;
///
/// let mut router = Router::new();
/// router.insert("/users", "GET", "listUsers").unwrap();
/// router.insert("/users/{id}", "GET", "getUser").unwrap();
///
/// let found = router.lookup("GET", "/users/42").unwrap();
/// assert_eq!(*found.value, "getUser");
/// assert_eq!(found.params.get("id"), Some("42"));
/// ```
///
/// # Route Priority
///
/// At every depth the router prefers, in order:
///
/// 1. **Static segments** (e.g., `/users/me`)
/// 2. **Parameter segments** (e.g., `/users/{id}`)
/// 3. **Catch-all segments** (e.g., `/files/*path`)
///
/// Because the walk is depth-first with that ordering, the template with
/// the longest static prefix wins, and ties are broken by the most specific
/// segment at the first point of difference. The result depends only on
/// the set of templates, never on registration order.
#[derive(Debug, Clone)]
pub struct Router<T> {
    root: Node<T>,
    route_count: usize,
}

impl<T> Default for Router<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Router<T> {
    /// Creates an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: Node::root(),
            route_count: 0,
        }
    }

    /// Registers `value` for `method` on `template`.
    ///
    /// Use [`ANY_METHOD`](crate::ANY_METHOD) to accept every method.
    pub fn insert(&mut self, template: &str, method: &str, value: T) -> Result<(), RouteError> {
        self.root.insert(template, method, value)?;
        self.route_count += 1;
        Ok(())
    }

    /// Resolves `method` and `path` to a value and its parameters.
    ///
    /// Templates are tried in priority order; the first one whose method
    /// table accepts `method` wins. If templates match the path but none
    /// accepts the method, the union of their methods is reported.
    pub fn lookup(&self, method: &str, path: &str) -> Result<RouteMatch<'_, T>, LookupError> {
        let segments = split_path(path);
        let mut found = None;
        let mut allowed: Vec<String> = Vec::new();

        let _ = self
            .root
            .visit(&segments, &mut Vec::new(), &mut |endpoint, values| {
                if let Some(value) = endpoint.methods.get(method) {
                    found = Some(RouteMatch {
                        template: endpoint.template.as_str(),
                        value,
                        params: collect_params(&endpoint.param_names, values),
                    });
                    return ControlFlow::Break(());
                }
                for m in endpoint.methods.methods() {
                    if !allowed.iter().any(|a| a == m) {
                        allowed.push(m.to_string());
                    }
                }
                ControlFlow::Continue(())
            });

        match found {
            Some(route_match) => Ok(route_match),
            None if allowed.is_empty() => Err(LookupError::NotFound),
            None => Err(LookupError::MethodNotAllowed { allowed }),
        }
    }

    /// Returns the methods accepted by every template matching `path`.
    ///
    /// Useful for answering `OPTIONS` or building a 405 response.
    #[must_use]
    pub fn allowed_methods(&self, path: &str) -> Vec<String> {
        let segments = split_path(path);
        let mut allowed: Vec<String> = Vec::new();
        let _ = self
            .root
            .visit(&segments, &mut Vec::new(), &mut |endpoint, _| {
                for m in endpoint.methods.methods() {
                    if !allowed.iter().any(|a| a == m) {
                        allowed.push(m.to_string());
                    }
                }
                ControlFlow::Continue(())
            });
        allowed
    }

    /// Returns the number of registered (template, method) pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.route_count
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.route_count == 0
    }
}

fn split_path(path: &str) -> Vec<&str> {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn collect_params(names: &[String], values: &[String]) -> Params {
    names
        .iter()
        .zip(values)
        .map(|(n, v)| (n.as_str(), v.as_str()))
        .collect()
}
