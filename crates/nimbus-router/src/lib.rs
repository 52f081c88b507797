//! Routing primitives for Nimbus.
//!
//! Two routers live here, one per addressing style:
//!
//! - [`Router`]: a radix tree over path templates, used for request/response
//!   and socket triggers. Supports named segments (`/users/{id}`), trailing
//!   catch-alls (`/files/*path`) and per-method values.
//! - [`SourceRouter`]: an ordered list of [`SourcePattern`]s for event
//!   triggers (queues, buckets, schedules, bus events). First match wins.
//!
//! Both are generic over the stored value so the dispatch layer can keep
//! route indices while tests use plain strings.
//!
//! # Example
//!
//! ```rust
//! use nimbus_router::Router;
//!
//! let mut router = Router::new();
//! router.insert("/users", "GET", "listUsers").unwrap();
//! router.insert("/users/{id}", "GET", "getUser").unwrap();
//! router.insert("/files/*path", "GET", "serveFile").unwrap();
//!
//! let found = router.lookup("GET", "/files/images/logo.png").unwrap();
//! assert_eq!(*found.value, "serveFile");
//! assert_eq!(found.params.get("path"), Some("images/logo.png"));
//! ```
//!
//! # Architecture
//!
//! ```text
//!                    (root)
//!                      │
//!              ┌───────┴───────┐
//!              │               │
//!            "users"        "files"
//!              │               │
//!        ┌─────┴─────┐       *path
//!        │           │
//!     [GET]        {id}
//!                    │
//!                 [GET]
//! ```

#![doc(html_root_url = "https://docs.rs/nimbus-router/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod error;
mod method_table;
mod node;
mod params;
mod router;
mod source;

pub use error::{LookupError, RouteError};
pub use method_table::{MethodTable, ANY_METHOD};
pub use params::Params;
pub use router::Router;
pub use source::{SourcePattern, SourceRouter};

/// A successful path lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch<'a, T> {
    /// The template that matched, as registered.
    pub template: &'a str,
    /// The value bound to the template and method.
    pub value: &'a T,
    /// Captured parameters.
    pub params: Params,
}
