//! The declarative module tree.
//!
//! A [`Module`] is a composable scope: a path prefix plus an ordered chain
//! of links. Links are middleware, stores, validators, nested modules,
//! groups and terminal routes. The tree is pure data: building it runs no
//! handler. It is consumed by the tree compiler, which flattens it into
//! the per-method endpoint tables.

use crate::context::Context;
use crate::dispatch::Next;
use crate::facet::{Facet, FacetSet};
use crate::payload::{Payload, Reply};
use crate::sse::SseStream;
use crate::ws::WsHandler;
use http::Method;
use serde_json::{Map, Value};
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Middleware: receives the context and a continuation for the rest of the
/// chain. Returning a payload short-circuits; not running the continuation
/// skips everything below.
pub type MiddlewareFn = Arc<dyn for<'a> Fn(&'a mut Context, Next) -> BoxFuture<'a, Option<Payload>> + Send + Sync>;

/// Store: yields key/value state merged into the request store, or an
/// error payload which stops the chain.
pub type StoreFn = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Map<String, Value>, Payload>> + Send + Sync>;

/// Terminal route handler.
pub type RouteFn = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Reply> + Send + Sync>;

/// Terminal stream producer (server-sent events).
pub type StreamFn = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, SseStream> + Send + Sync>;

/// Terminal WebSocket handler factory: returns the lifecycle callbacks
/// bound to the upgraded socket.
pub type WsFn = Arc<dyn for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Box<dyn WsHandler>> + Send + Sync>;

/// Group body builder, invoked once during compilation.
pub type GroupFn = Box<dyn FnOnce(Module) -> Module + Send>;

#[derive(Clone)]
pub struct Middleware {
    pub(crate) func: MiddlewareFn,
    pub(crate) uses: Option<FacetSet>,
}

#[derive(Clone)]
pub struct Store {
    pub(crate) func: StoreFn,
    pub(crate) uses: Option<FacetSet>,
}

/// A validator link: facet→schema pairs checked in declaration order.
#[derive(Debug, Clone)]
pub struct Validator {
    pub(crate) request: Vec<(Facet, Value)>,
}

/// The facet→schema map accepted by [`Module::validator`] and route
/// options. Declaration order is preserved and is the execution order.
#[derive(Debug, Clone, Default)]
pub struct ValidatorRequest {
    entries: Vec<(Facet, Value)>,
}

impl ValidatorRequest {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn body(mut self, schema: Value) -> Self {
        self.entries.push((Facet::Body, schema));
        self
    }

    #[must_use]
    pub fn cookies(mut self, schema: Value) -> Self {
        self.entries.push((Facet::Cookies, schema));
        self
    }

    #[must_use]
    pub fn headers(mut self, schema: Value) -> Self {
        self.entries.push((Facet::Headers, schema));
        self
    }

    #[must_use]
    pub fn params(mut self, schema: Value) -> Self {
        self.entries.push((Facet::Params, schema));
        self
    }

    #[must_use]
    pub fn query(mut self, schema: Value) -> Self {
        self.entries.push((Facet::Query, schema));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl From<ValidatorRequest> for Validator {
    fn from(request: ValidatorRequest) -> Self {
        Validator { request: request.entries }
    }
}

/// A route's HTTP method. WebSocket routes are filed under GET by the
/// compiler since upgrade negotiation rides on a GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethod {
    Http(Method),
    Ws,
}

#[derive(Clone)]
pub(crate) enum Handler {
    Plain(RouteFn),
    Stream(StreamFn),
    Ws(WsFn),
}

/// A terminal route: method, path template, handler and optional
/// route-local validator (appended last to the endpoint chain).
#[derive(Clone)]
pub struct Route {
    pub method: RouteMethod,
    pub path: String,
    pub(crate) handler: Handler,
    pub(crate) validator: Option<Validator>,
    pub(crate) uses: Option<FacetSet>,
}

impl Route {
    /// Whether the handler is a stream producer (generator semantics).
    pub fn is_stream(&self) -> bool {
        matches!(self.handler, Handler::Stream(_))
    }
}

/// Options for [`Module::route_with`].
#[derive(Default)]
pub struct RouteOptions {
    pub validator: Option<ValidatorRequest>,
    pub uses: Option<FacetSet>,
}

pub struct Group {
    pub(crate) prefix: String,
    pub(crate) build: GroupFn,
}

/// One node in a module's chain.
pub enum Link {
    Group(Group),
    Middleware(Middleware),
    Store(Store),
    Validator(Validator),
    Module(Module),
    Route(Route),
}

/// A composable scope: path prefix plus ordered chain of links.
pub struct Module {
    pub(crate) prefix: String,
    pub(crate) chain: Vec<Link>,
}

/// Creates a module with no prefix.
pub fn module() -> Module {
    Module::new("")
}

fn normalize_prefix(prefix: impl Into<String>) -> String {
    let prefix = prefix.into();
    debug_assert!(
        prefix.is_empty() || prefix.starts_with('/'),
        "module prefixes must begin with '/', got {prefix:?}"
    );
    // "/" carries no path contribution
    if prefix == "/" { String::new() } else { prefix }
}

impl Module {
    pub fn new(prefix: impl Into<String>) -> Self {
        Module { prefix: normalize_prefix(prefix), chain: Vec::new() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn middleware<F>(self, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next) -> BoxFuture<'a, Option<Payload>> + Send + Sync + 'static,
    {
        self.push_middleware(func, None)
    }

    /// Middleware with an explicit facet declaration. Undeclared middleware
    /// makes the endpoint parse every facet.
    pub fn middleware_using<F>(self, uses: FacetSet, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next) -> BoxFuture<'a, Option<Payload>> + Send + Sync + 'static,
    {
        self.push_middleware(func, Some(uses))
    }

    fn push_middleware<F>(mut self, func: F, uses: Option<FacetSet>) -> Self
    where
        F: for<'a> Fn(&'a mut Context, Next) -> BoxFuture<'a, Option<Payload>> + Send + Sync + 'static,
    {
        self.chain.push(Link::Middleware(Middleware { func: Arc::new(func), uses }));
        self
    }

    pub fn store<F>(self, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Map<String, Value>, Payload>> + Send + Sync + 'static,
    {
        self.push_store(func, None)
    }

    pub fn store_using<F>(self, uses: FacetSet, func: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Map<String, Value>, Payload>> + Send + Sync + 'static,
    {
        self.push_store(func, Some(uses))
    }

    fn push_store<F>(mut self, func: F, uses: Option<FacetSet>) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Result<Map<String, Value>, Payload>> + Send + Sync + 'static,
    {
        self.chain.push(Link::Store(Store { func: Arc::new(func), uses }));
        self
    }

    /// A validator applying to every route registered after it in scope.
    pub fn validator(mut self, request: ValidatorRequest) -> Self {
        self.chain.push(Link::Validator(request.into()));
        self
    }

    pub fn route<F>(self, method: Method, path: &str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Reply> + Send + Sync + 'static,
    {
        self.route_with(method, path, handler, RouteOptions::default())
    }

    pub fn route_with<F>(mut self, method: Method, path: &str, handler: F, options: RouteOptions) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Reply> + Send + Sync + 'static,
    {
        self.chain.push(Link::Route(Route {
            method: RouteMethod::Http(method),
            path: path.to_owned(),
            handler: Handler::Plain(Arc::new(handler)),
            validator: options.validator.map(Validator::from),
            uses: options.uses,
        }));
        self
    }

    /// A GET route whose handler produces a server-sent-event stream.
    pub fn stream<F>(self, path: &str, producer: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, SseStream> + Send + Sync + 'static,
    {
        self.stream_with(path, producer, RouteOptions::default())
    }

    pub fn stream_with<F>(mut self, path: &str, producer: F, options: RouteOptions) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, SseStream> + Send + Sync + 'static,
    {
        self.chain.push(Link::Route(Route {
            method: RouteMethod::Http(Method::GET),
            path: path.to_owned(),
            handler: Handler::Stream(Arc::new(producer)),
            validator: options.validator.map(Validator::from),
            uses: options.uses,
        }));
        self
    }

    /// A WebSocket route; the handler returns lifecycle callbacks for the
    /// upgraded socket.
    pub fn ws<F>(mut self, path: &str, handler: F) -> Self
    where
        F: for<'a> Fn(&'a mut Context) -> BoxFuture<'a, Box<dyn WsHandler>> + Send + Sync + 'static,
    {
        self.chain.push(Link::Route(Route {
            method: RouteMethod::Ws,
            path: path.to_owned(),
            handler: Handler::Ws(Arc::new(handler)),
            validator: None,
            uses: None,
        }));
        self
    }

    /// A nested scope. The builder runs at compile time on a synthesized
    /// module that already carries the surrounding prefix and chain.
    pub fn group<F>(mut self, prefix: &str, build: F) -> Self
    where
        F: FnOnce(Module) -> Module + Send + 'static,
    {
        self.chain.push(Link::Group(Group { prefix: normalize_prefix(prefix), build: Box::new(build) }));
        self
    }

    /// Splices another module into this one's chain at this position.
    pub fn extends(mut self, other: Module) -> Self {
        self.chain.push(Link::Module(other));
        self
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module").field("prefix", &self.prefix).field("links", &self.chain.len()).finish()
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Link::Group(_) => "Group",
            Link::Middleware(_) => "Middleware",
            Link::Store(_) => "Store",
            Link::Validator(_) => "Validator",
            Link::Module(_) => "Module",
            Link::Route(_) => "Route",
        };
        f.write_str(name)
    }
}

impl fmt::Debug for Middleware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Middleware").field("uses", &self.uses).finish()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store").field("uses", &self.uses).finish()
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group").field("prefix", &self.prefix).finish()
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route").field("method", &self.method).field("path", &self.path).finish()
    }
}

impl fmt::Debug for RouteOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOptions").field("uses", &self.uses).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payload::success;
    use serde_json::json;

    fn noop(_ctx: &mut Context) -> BoxFuture<'_, Reply> {
        Box::pin(async move { Reply::Payload(success(json!(null))) })
    }

    fn empty_store(_ctx: &mut Context) -> BoxFuture<'_, Result<Map<String, Value>, Payload>> {
        Box::pin(async move { Ok(Map::new()) })
    }

    fn never_ws(_ctx: &mut Context) -> BoxFuture<'_, Box<dyn WsHandler>> {
        Box::pin(async move { unreachable!("not invoked in this test") })
    }

    #[test]
    fn root_prefix_is_normalized_away() {
        assert_eq!(Module::new("/").prefix(), "");
        assert_eq!(module().prefix(), "");
        assert_eq!(Module::new("/api").prefix(), "/api");
    }

    #[test]
    fn builder_preserves_declaration_order() {
        let m = module()
            .store(empty_store)
            .validator(ValidatorRequest::new().body(json!({"type": "object"})))
            .route(Method::GET, "/a", noop);

        assert_eq!(m.chain.len(), 3);
        assert!(matches!(m.chain[0], Link::Store(_)));
        assert!(matches!(m.chain[1], Link::Validator(_)));
        assert!(matches!(m.chain[2], Link::Route(_)));
    }

    #[test]
    fn ws_routes_carry_the_ws_method() {
        let m = module().ws("/live", never_ws);

        let Link::Route(route) = &m.chain[0] else { panic!("expected a route") };
        assert_eq!(route.method, RouteMethod::Ws);
    }
}
