//! The tree compiler.
//!
//! Flattens a [`Module`] tree into per-method endpoint tables. Each endpoint
//! carries the fully composed path, its compiled pattern, the flattened
//! chain in execution order and the facet-usage set. Compilation walks the
//! tree with an explicit stack so that groups are deferred without
//! recursion, while nested modules are spliced in place.

use crate::facet::{Facet, FacetSet};
use crate::module::{Link, Middleware, Module, Route, RouteMethod, Store, Validator};
use crate::pattern::{MethodMatcher, PathPattern};
use http::Method;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// A flattened chain node. Groups, modules and routes are resolved away
/// during compilation; only the links that run per request remain.
#[derive(Debug, Clone)]
pub(crate) enum ChainLink {
    Middleware(Middleware),
    Store(Store),
    Validator(Validator),
}

impl From<ChainLink> for Link {
    fn from(link: ChainLink) -> Self {
        match link {
            ChainLink::Middleware(middleware) => Link::Middleware(middleware),
            ChainLink::Store(store) => Link::Store(store),
            ChainLink::Validator(validator) => Link::Validator(validator),
        }
    }
}

/// A read-only description of one flattened chain link.
///
/// After-plugins inspect the compiled tables through this view, e.g. a
/// documentation generator walking every endpoint's validator schemas.
#[derive(Debug, Clone, Copy)]
pub enum LinkInfo<'a> {
    Middleware { uses: Option<FacetSet> },
    Store { uses: Option<FacetSet> },
    Validator { request: &'a [(Facet, Value)] },
}

/// One compiled route: path, pattern, chain and usage set.
pub struct Endpoint {
    pub(crate) path: String,
    pub(crate) pattern: PathPattern,
    pub(crate) chain: Vec<ChainLink>,
    pub(crate) route: Route,
    pub(crate) uses: FacetSet,
}

impl Endpoint {
    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn uses(&self) -> FacetSet {
        self.uses
    }

    pub fn is_stream(&self) -> bool {
        self.route.is_stream()
    }

    /// The flattened chain in execution order, as read-only link
    /// descriptors.
    pub fn chain(&self) -> impl Iterator<Item = LinkInfo<'_>> {
        self.chain.iter().map(|link| match link {
            ChainLink::Middleware(middleware) => LinkInfo::Middleware { uses: middleware.uses },
            ChainLink::Store(store) => LinkInfo::Store { uses: store.uses },
            ChainLink::Validator(validator) => LinkInfo::Validator { request: &validator.request },
        })
    }

    /// Every `(facet, schema)` pair validated along the chain, route-level
    /// validators included, in execution order.
    pub fn validators(&self) -> impl Iterator<Item = (Facet, &Value)> {
        self.chain
            .iter()
            .filter_map(|link| match link {
                ChainLink::Validator(validator) => Some(validator.request.as_slice()),
                _ => None,
            })
            .flatten()
            .map(|(facet, schema)| (*facet, schema))
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("path", &self.path)
            .field("chain", &self.chain.len())
            .field("uses", &self.uses)
            .finish()
    }
}

/// All endpoints of one HTTP method plus the alternation that picks among
/// them.
#[derive(Debug)]
pub struct MethodTable {
    endpoints: Vec<Arc<Endpoint>>,
    matcher: MethodMatcher,
}

impl MethodTable {
    /// Endpoints in match-precedence order: the route declared last comes
    /// first.
    pub fn endpoints(&self) -> &[Arc<Endpoint>] {
        &self.endpoints
    }

    pub fn find(&self, path: &str) -> Option<Arc<Endpoint>> {
        let index = self.matcher.find(path)?;
        self.endpoints.get(index).cloned()
    }
}

#[derive(Error, Debug)]
pub enum CompileError {
    #[error("invalid path template {path:?}: {source}")]
    Pattern {
        path: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to build the {method} matcher: {source}")]
    Matcher {
        method: Method,
        #[source]
        source: regex::Error,
    },
}

struct Frame {
    module: Module,
    chain: Vec<ChainLink>,
    path: String,
}

/// Flattens the module tree into per-method tables.
///
/// Each bucket is reversed before the matcher is built, so on overlapping
/// templates the route registered last takes precedence.
pub fn compile(root: Module) -> Result<HashMap<Method, MethodTable>, CompileError> {
    let mut buckets: HashMap<Method, Vec<Endpoint>> = HashMap::new();

    let mut stack = vec![Frame { module: root, chain: Vec::new(), path: String::new() }];

    while let Some(frame) = stack.pop() {
        step(&mut stack, &mut buckets, frame.module, &frame.chain, &frame.path)?;
    }

    let mut tables = HashMap::with_capacity(buckets.len());

    for (method, mut endpoints) in buckets {
        endpoints.reverse();

        let templates: Vec<&str> = endpoints.iter().map(|endpoint| endpoint.path.as_str()).collect();
        let matcher = MethodMatcher::build(&templates)
            .map_err(|source| CompileError::Matcher { method: method.clone(), source })?;

        tables.insert(method, MethodTable { endpoints: endpoints.into_iter().map(Arc::new).collect(), matcher });
    }

    Ok(tables)
}

/// Processes one module: accumulates its local chain, defers groups onto
/// the stack, splices nested modules in place and emits endpoints for
/// routes. Returns the local chain and path so a parent can splice them.
fn step(
    stack: &mut Vec<Frame>,
    buckets: &mut HashMap<Method, Vec<Endpoint>>,
    module: Module,
    previous_chain: &[ChainLink],
    previous_path: &str,
) -> Result<(Vec<ChainLink>, String), CompileError> {
    let mut chain: Vec<ChainLink> = Vec::new();
    let mut path = module.prefix;

    for link in module.chain {
        match link {
            Link::Group(group) => {
                // The group body builds on a module that already carries
                // the surrounding path and chain; inherited state must not
                // be applied a second time when the frame is popped.
                let seed = Module {
                    prefix: format!("{previous_path}{path}{}", group.prefix),
                    chain: previous_chain.iter().cloned().chain(chain.iter().cloned()).map(Link::from).collect(),
                };

                stack.push(Frame { module: (group.build)(seed), chain: Vec::new(), path: String::new() });
            }
            Link::Middleware(middleware) => chain.push(ChainLink::Middleware(middleware)),
            Link::Store(store) => chain.push(ChainLink::Store(store)),
            Link::Validator(validator) => chain.push(ChainLink::Validator(validator)),
            Link::Module(nested) => {
                let merged: Vec<ChainLink> =
                    previous_chain.iter().cloned().chain(chain.iter().cloned()).collect();

                let (spliced_chain, spliced_path) =
                    step(stack, buckets, nested, &merged, &format!("{previous_path}{path}"))?;

                chain.extend(spliced_chain);

                if !spliced_path.is_empty() {
                    path.push_str(&spliced_path);
                }
            }
            Link::Route(route) => {
                let mut merged: Vec<ChainLink> =
                    previous_chain.iter().cloned().chain(chain.iter().cloned()).collect();

                let uses = usage_of(&merged, &route);

                if let Some(validator) = &route.validator {
                    merged.push(ChainLink::Validator(validator.clone()));
                }

                let mut full_path = format!(
                    "{previous_path}{path}{}",
                    if route.path == "/" { "" } else { route.path.as_str() }
                );
                if full_path.is_empty() {
                    full_path.push('/');
                }

                let pattern = PathPattern::compile(&full_path)
                    .map_err(|source| CompileError::Pattern { path: full_path.clone(), source })?;

                let method = match &route.method {
                    RouteMethod::Http(method) => method.clone(),
                    // Upgrade negotiation arrives as a GET request.
                    RouteMethod::Ws => Method::GET,
                };

                buckets
                    .entry(method)
                    .or_default()
                    .push(Endpoint { path: full_path, pattern, chain: merged, route, uses });
            }
        }
    }

    Ok((chain, path))
}

/// The facets an endpoint must parse before its chain runs.
///
/// Links with an explicit declaration contribute exactly that set; an
/// undeclared middleware or store degrades to the full set. Validators read
/// whatever the rest of the chain already loads and contribute nothing
/// themselves. The route's own declaration is only consulted while the set
/// is still incomplete.
fn usage_of(chain: &[ChainLink], route: &Route) -> FacetSet {
    let mut uses = FacetSet::EMPTY;

    for link in chain {
        if uses.is_full() {
            break;
        }

        match link {
            ChainLink::Middleware(middleware) => {
                uses = uses.union(middleware.uses.unwrap_or_else(FacetSet::full));
            }
            ChainLink::Store(store) => {
                uses = uses.union(store.uses.unwrap_or_else(FacetSet::full));
            }
            ChainLink::Validator(_) => {}
        }
    }

    if !uses.is_full() {
        uses = uses.union(route.uses.unwrap_or_else(FacetSet::full));
    }

    uses
}
