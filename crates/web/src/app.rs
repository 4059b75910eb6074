//! The compiled application.
//!
//! [`app`] wraps a module tree in a builder; [`AppBuilder::compile`] runs
//! the registered plugins, flattens the tree into per-method tables and
//! yields an [`App`]. The app's [`fetch`](App::fetch) entry point is the
//! whole per-request pipeline: endpoint lookup, facet parsing, chain
//! execution, WebSocket handoff and response normalization.

use crate::body::{OptionReqBody, ReqBody, ResponseBody};
use crate::compile::{CompileError, MethodTable, compile};
use crate::context::{Context, Memory};
use crate::dispatch::run_chain;
use crate::module::Module;
use crate::response::process_response;
use crate::validator::{SchemaBackend, VALIDATOR_KEY, ValidatorHandle};
use crate::ws;
use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http::{HeaderValue, Method, Request, Response, StatusCode};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs before compilation; may rewrite the module tree and seed memory.
pub type BeforePlugin = Box<dyn FnOnce(&mut Module, &mut Memory) + Send>;

/// Runs after compilation with a view of the finished tables.
pub type AfterPlugin = Box<dyn FnOnce(&HashMap<Method, MethodTable>, &mut Memory) + Send>;

/// Starts building an application from a module tree.
pub fn app(module: Module) -> AppBuilder {
    AppBuilder { module, memory: Memory::new(), before: Vec::new(), after: Vec::new() }
}

pub struct AppBuilder {
    module: Module,
    memory: Memory,
    before: Vec<BeforePlugin>,
    after: Vec<AfterPlugin>,
}

impl AppBuilder {
    pub fn plugin_before(mut self, plugin: impl FnOnce(&mut Module, &mut Memory) + Send + 'static) -> Self {
        self.before.push(Box::new(plugin));
        self
    }

    pub fn plugin_after(
        mut self,
        plugin: impl FnOnce(&HashMap<Method, MethodTable>, &mut Memory) + Send + 'static,
    ) -> Self {
        self.after.push(Box::new(plugin));
        self
    }

    /// Replaces the bundled JSON Schema backend.
    pub fn validator(mut self, backend: ValidatorHandle) -> Self {
        self.memory.insert(VALIDATOR_KEY, backend);
        self
    }

    /// Seeds one app-memory entry, readable from every context.
    pub fn memory<T: Any + Send + Sync>(mut self, key: impl Into<String>, value: T) -> Self {
        self.memory.insert(key, value);
        self
    }

    pub fn compile(self) -> Result<App, CompileError> {
        let mut module = self.module;
        let mut memory = self.memory;

        for plugin in self.before {
            plugin(&mut module, &mut memory);
        }

        if !memory.contains(VALIDATOR_KEY) {
            memory.insert(VALIDATOR_KEY, Arc::new(SchemaBackend) as ValidatorHandle);
        }

        let tables = compile(module)?;

        for plugin in self.after {
            plugin(&tables, &mut memory);
        }

        let endpoints: usize = tables.values().map(|table| table.endpoints().len()).sum();
        info!(methods = tables.len(), endpoints, "compiled application");

        Ok(App { tables: Arc::new(tables), memory: Arc::new(memory) })
    }
}

/// The immutable, shareable compiled application.
#[derive(Clone)]
pub struct App {
    tables: Arc<HashMap<Method, MethodTable>>,
    memory: Arc<Memory>,
}

impl App {
    pub fn table(&self, method: &Method) -> Option<&MethodTable> {
        self.tables.get(method)
    }

    pub fn tables(&self) -> &HashMap<Method, MethodTable> {
        &self.tables
    }

    /// Handles one request end to end.
    pub async fn fetch(&self, mut request: Request<ReqBody>) -> Response<ResponseBody> {
        let method = request.method().clone();
        let path = request.uri().path().to_owned();

        let Some(endpoint) = self.tables.get(&method).and_then(|table| table.find(&path)) else {
            return status_only(StatusCode::NOT_FOUND);
        };

        // Taken out before the parts are frozen; only consumed if the
        // chain asks for a WebSocket handoff.
        let on_upgrade = request.extensions_mut().remove::<hyper::upgrade::OnUpgrade>();

        let (parts, body) = request.into_parts();
        let mut ctx = Context::new(endpoint.clone(), self.memory.clone(), parts, OptionReqBody::from(body));

        if let Err(error) = ctx.load_request().await {
            debug!(path, "failed to parse request: {error}");
            return status_only(StatusCode::BAD_REQUEST);
        }

        run_chain(&mut ctx, endpoint, 0).await;

        if let Some(handler) = ctx.upgrade.take() {
            return upgrade_response(&ctx, on_upgrade, handler);
        }

        process_response(ctx.response)
    }
}

impl std::fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppBuilder")
            .field("before", &self.before.len())
            .field("after", &self.after.len())
            .finish()
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App").field("methods", &self.tables.len()).finish()
    }
}

fn status_only(status: StatusCode) -> Response<ResponseBody> {
    let mut response = Response::new(ResponseBody::empty());
    *response.status_mut() = status;
    response
}

/// Finishes the handshake: 101 with the accept key, and a task that drives
/// the socket once the transport hands it over.
fn upgrade_response(
    ctx: &Context,
    on_upgrade: Option<hyper::upgrade::OnUpgrade>,
    handler: Box<dyn ws::WsHandler>,
) -> Response<ResponseBody> {
    let Some(on_upgrade) = on_upgrade else {
        debug!("websocket route hit without an upgradable connection");
        return status_only(StatusCode::BAD_REQUEST);
    };

    let Some(key) = ctx.request.raw.headers.get(SEC_WEBSOCKET_KEY).and_then(|value| value.to_str().ok())
    else {
        return status_only(StatusCode::BAD_REQUEST);
    };

    let Ok(accept) = HeaderValue::from_str(&ws::accept_key(key)) else {
        return status_only(StatusCode::BAD_REQUEST);
    };

    tokio::spawn(async move {
        match on_upgrade.await {
            Ok(upgraded) => ws::drive(upgraded, handler).await,
            Err(error) => debug!("websocket upgrade failed: {error}"),
        }
    });

    let mut response = status_only(StatusCode::SWITCHING_PROTOCOLS);
    let headers = response.headers_mut();
    headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
    headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::{BoxFuture, module};
    use crate::payload::{Reply, success};
    use serde_json::json;

    fn noop(_ctx: &mut Context) -> BoxFuture<'_, Reply> {
        Box::pin(async move { Reply::Payload(success(json!(null))) })
    }

    #[test]
    fn compile_installs_the_default_validator_backend() {
        let app = app(module().route(Method::GET, "/", noop)).compile().unwrap();
        assert!(app.memory.get::<ValidatorHandle>(VALIDATOR_KEY).is_some());
    }

    #[test]
    fn plugins_run_around_compilation() {
        let app = app(module())
            .plugin_before(|module_ref, memory| {
                let tree = std::mem::replace(module_ref, module());
                *module_ref = tree.route(Method::GET, "/injected", noop);
                memory.insert("seeded", true);
            })
            .plugin_after(|tables, memory| {
                let count: usize = tables.values().map(|table| table.endpoints().len()).sum();
                memory.insert("endpoints", count);
            })
            .compile()
            .unwrap();

        assert_eq!(app.memory.get::<bool>("seeded"), Some(&true));
        assert_eq!(app.memory.get::<usize>("endpoints"), Some(&1));
        assert!(app.table(&Method::GET).unwrap().find("/injected").is_some());
    }
}
