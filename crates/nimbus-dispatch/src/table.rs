//! The route table.
//!
//! Routes are registered on a [`RouteTableBuilder`] and then sealed into an
//! immutable [`RouteTable`]. Sealing builds each route's pipeline once, so
//! resolving an invocation is a read-only lookup that can be shared across
//! tasks without locking.
//!
//! Path-addressable kinds (request/response and socket frames) resolve
//! through a radix [`Router`]; the other kinds resolve through an ordered
//! [`SourceRouter`], first registered match wins.
//!
//! # Example
//!
//! ```
//! use nimbus_core::{handler_fn, NormalizedEnvelope, Response, TriggerKind};
//! use nimbus_dispatch::{Route, RouteTableBuilder};
//! use nimbus_middleware::Pipeline;
//! use nimbus_router::SourcePattern;
//!
//! let mut builder = RouteTableBuilder::new();
//! builder
//!     .register(Route::http(
//!         "getUser",
//!         "GET",
//!         "/users/{id}",
//!         handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) })),
//!     ))
//!     .unwrap();
//! builder
//!     .register(Route::source(
//!         "orders",
//!         TriggerKind::BatchMessage,
//!         SourcePattern::prefix("orders-"),
//!         handler_fn(|_ctx| Box::pin(async { Ok(Response::ok()) })),
//!     ))
//!     .unwrap();
//! let table = builder.seal(&Pipeline::empty());
//!
//! let envelope = NormalizedEnvelope::builder(TriggerKind::RequestResponse)
//!     .method("GET")
//!     .path("/users/42")
//!     .build()
//!     .unwrap();
//! let resolved = table.resolve(&envelope).unwrap();
//! assert_eq!(resolved.route.id(), "getUser");
//! assert_eq!(resolved.params.get("id"), Some("42"));
//! ```

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use nimbus_core::{Handler, NimbusError, NormalizedEnvelope, Params, SharedHandler, TriggerKind};
use nimbus_middleware::{BoxedMiddleware, Middleware, OverrideMode, Pipeline};
use nimbus_router::{LookupError, Router, SourcePattern, SourceRouter, ANY_METHOD};

use crate::error::BuildError;

/// Route key socket frames fall back to when no route matches theirs.
pub const SOCKET_DEFAULT_ROUTE: &str = "$default";

/// How a route is addressed.
#[derive(Debug, Clone)]
pub enum Matcher {
    /// A path template and the method it accepts (`*` for any).
    Template {
        /// Path template, e.g. `/users/{id}`.
        template: String,
        /// Accepted method.
        method: String,
    },
    /// A source identifier pattern.
    Source(SourcePattern),
}

impl Matcher {
    fn expected_for(kind: TriggerKind) -> &'static str {
        if kind.is_path_addressable() {
            "path template"
        } else {
            "source pattern"
        }
    }

    fn fits(&self, kind: TriggerKind) -> bool {
        matches!(self, Self::Template { .. }) == kind.is_path_addressable()
    }
}

impl fmt::Display for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Template { template, method } => write!(f, "{method} {template}"),
            Self::Source(pattern) => f.write_str(&pattern.describe()),
        }
    }
}

/// A handler bound to a trigger kind and matcher.
#[derive(Clone)]
pub struct Route {
    id: String,
    kind: TriggerKind,
    matcher: Matcher,
    handler: SharedHandler,
    middleware: Vec<BoxedMiddleware>,
    override_mode: OverrideMode,
}

impl Route {
    /// Creates a route from its parts.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        kind: TriggerKind,
        matcher: Matcher,
        handler: SharedHandler,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            matcher,
            handler,
            middleware: Vec::new(),
            override_mode: OverrideMode::Append,
        }
    }

    /// A request/response route.
    #[must_use]
    pub fn http(
        id: impl Into<String>,
        method: impl Into<String>,
        template: impl Into<String>,
        handler: impl Handler,
    ) -> Self {
        Self::new(
            id,
            TriggerKind::RequestResponse,
            Matcher::Template {
                template: template.into(),
                method: method.into(),
            },
            Arc::new(handler),
        )
    }

    /// A socket route for a route key such as `$connect` or `sendMessage`.
    ///
    /// The route accepts every socket event type.
    #[must_use]
    pub fn socket(id: impl Into<String>, route_key: &str, handler: impl Handler) -> Self {
        let template = if route_key.starts_with('/') {
            route_key.to_string()
        } else {
            format!("/{route_key}")
        };
        Self::new(
            id,
            TriggerKind::SocketFrame,
            Matcher::Template {
                template,
                method: ANY_METHOD.to_string(),
            },
            Arc::new(handler),
        )
    }

    /// An event route addressed by source identifier.
    #[must_use]
    pub fn source(
        id: impl Into<String>,
        kind: TriggerKind,
        pattern: SourcePattern,
        handler: impl Handler,
    ) -> Self {
        Self::new(id, kind, Matcher::Source(pattern), Arc::new(handler))
    }

    /// Adds route-specific middleware. Stages run in the order added.
    #[must_use]
    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    /// Adds shared route-specific middleware.
    #[must_use]
    pub fn with_shared_middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Sets how the route's middleware combines with the global pipeline.
    #[must_use]
    pub fn with_override_mode(mut self, mode: OverrideMode) -> Self {
        self.override_mode = mode;
        self
    }

    /// Returns the route id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns the trigger kind.
    #[must_use]
    pub const fn kind(&self) -> TriggerKind {
        self.kind
    }

    /// Returns the matcher.
    #[must_use]
    pub const fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// Returns the handler.
    #[must_use]
    pub fn handler(&self) -> &dyn Handler {
        self.handler.as_ref()
    }

    /// Returns the override mode.
    #[must_use]
    pub const fn override_mode(&self) -> OverrideMode {
        self.override_mode
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("matcher", &self.matcher)
            .field("middleware", &self.middleware.len())
            .field("override_mode", &self.override_mode)
            .finish_non_exhaustive()
    }
}

/// Collects routes before sealing.
#[derive(Default)]
pub struct RouteTableBuilder {
    routes: Vec<Route>,
    ids: HashSet<String>,
    paths: HashMap<TriggerKind, Router<usize>>,
    sources: HashMap<TriggerKind, SourceRouter<usize>>,
}

impl RouteTableBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route.
    ///
    /// # Errors
    ///
    /// - [`BuildError::DuplicateRouteId`] if the id is taken
    /// - [`BuildError::KindMismatch`] if a path kind gets a source pattern
    ///   or the reverse
    /// - [`BuildError::Route`] for invalid templates, duplicate
    ///   template/method pairs and duplicate source patterns
    pub fn register(&mut self, route: Route) -> Result<(), BuildError> {
        if self.ids.contains(&route.id) {
            return Err(BuildError::DuplicateRouteId(route.id));
        }
        if !route.matcher.fits(route.kind) {
            return Err(BuildError::KindMismatch {
                id: route.id,
                kind: route.kind,
                expected: Matcher::expected_for(route.kind),
            });
        }

        let index = self.routes.len();
        match &route.matcher {
            Matcher::Template { template, method } => self
                .paths
                .entry(route.kind)
                .or_default()
                .insert(template, method, index),
            Matcher::Source(pattern) => self
                .sources
                .entry(route.kind)
                .or_default()
                .insert(pattern.clone(), index),
        }
        .map_err(|e| BuildError::route(&route.id, e))?;

        self.ids.insert(route.id.clone());
        self.routes.push(route);
        Ok(())
    }

    /// Returns the number of registered routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if no routes are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Freezes the table, building every route's pipeline from `global`.
    #[must_use]
    pub fn seal(self, global: &Pipeline) -> RouteTable {
        let routes = self
            .routes
            .into_iter()
            .map(|route| {
                let pipeline = global.with_overrides(&route.middleware, route.override_mode);
                SealedRoute { route, pipeline }
            })
            .collect();
        RouteTable {
            routes,
            paths: self.paths,
            sources: self.sources,
        }
    }
}

impl fmt::Debug for RouteTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteTableBuilder")
            .field("routes", &self.routes)
            .finish_non_exhaustive()
    }
}

struct SealedRoute {
    route: Route,
    pipeline: Pipeline,
}

/// An immutable, resolvable set of routes.
pub struct RouteTable {
    routes: Vec<SealedRoute>,
    paths: HashMap<TriggerKind, Router<usize>>,
    sources: HashMap<TriggerKind, SourceRouter<usize>>,
}

/// A route resolved for one envelope.
#[derive(Debug)]
pub struct ResolvedRoute<'a> {
    /// The matched route.
    pub route: &'a Route,
    /// The route's sealed pipeline.
    pub pipeline: &'a Pipeline,
    /// Captured path parameters. Empty for source routes.
    pub params: Params,
}

impl RouteTable {
    /// Resolves the route for `envelope`.
    ///
    /// Socket frames whose route key has no route fall back to the
    /// `$default` route when one is registered.
    ///
    /// # Errors
    ///
    /// Returns `RouteNotFound` when nothing matches and `MethodNotAllowed`
    /// when templates match the path but none accepts the method.
    pub fn resolve(&self, envelope: &NormalizedEnvelope) -> Result<ResolvedRoute<'_>, NimbusError> {
        let kind = envelope.kind();
        let path = envelope.path();

        if kind.is_path_addressable() {
            let router = self
                .paths
                .get(&kind)
                .ok_or_else(|| NimbusError::route_not_found(kind, path))?;
            let found = match router.lookup(envelope.method(), path) {
                Err(LookupError::NotFound) if kind == TriggerKind::SocketFrame => router
                    .lookup(envelope.method(), &format!("/{SOCKET_DEFAULT_ROUTE}"))
                    .map_err(|_| LookupError::NotFound),
                other => other,
            };
            return match found {
                Ok(found) => Ok(self.resolved(*found.value, found.params)),
                Err(LookupError::NotFound) => Err(NimbusError::route_not_found(kind, path)),
                Err(LookupError::MethodNotAllowed { allowed }) => Err(
                    NimbusError::method_not_allowed(path, envelope.method(), allowed),
                ),
            };
        }

        self.sources
            .get(&kind)
            .and_then(|router| router.resolve(path))
            .map(|index| self.resolved(*index, Params::new()))
            .ok_or_else(|| NimbusError::route_not_found(kind, path))
    }

    fn resolved(&self, index: usize, params: Params) -> ResolvedRoute<'_> {
        let sealed = &self.routes[index];
        ResolvedRoute {
            route: &sealed.route,
            pipeline: &sealed.pipeline,
            params,
        }
    }

    /// Looks a route up by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&Route> {
        self.routes
            .iter()
            .map(|sealed| &sealed.route)
            .find(|route| route.id == id)
    }

    /// Iterates routes in registration order.
    pub fn routes(&self) -> impl Iterator<Item = &Route> {
        self.routes.iter().map(|sealed| &sealed.route)
    }

    /// Returns the number of routes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl fmt::Debug for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.routes()).finish()
    }
}
