//! The chain executor.
//!
//! Runs `chain[index..]` against a context, stopping as soon as response
//! content is set. Middleware receives a [`Next`] continuation and decides
//! whether the rest of the chain runs at all; code after the continuation
//! call executes on the way back out of the onion.

use crate::compile::{ChainLink, Endpoint};
use crate::context::{Context, ResponseContent};
use crate::facet::Facet;
use crate::module::{BoxFuture, Handler, Validator};
use crate::payload::{Reply, error};
use crate::validator::{VALIDATOR_KEY, ValidatorHandle};
use http::StatusCode;
use serde_json::{Value, json};
use std::sync::Arc;

/// The continuation handed to middleware: resumes the chain at the next
/// link. Dropping it without calling [`Next::run`] short-circuits.
pub struct Next {
    endpoint: Arc<Endpoint>,
    index: usize,
}

impl Next {
    pub fn run(self, ctx: &mut Context) -> BoxFuture<'_, ()> {
        run_chain(ctx, self.endpoint, self.index)
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next").field("index", &self.index).finish()
    }
}

/// Executes the endpoint's chain from `index`, then the terminal handler.
pub(crate) fn run_chain(ctx: &mut Context, endpoint: Arc<Endpoint>, index: usize) -> BoxFuture<'_, ()> {
    Box::pin(async move {
        for i in index..endpoint.chain.len() {
            if ctx.response.content.is_some() {
                return;
            }

            match &endpoint.chain[i] {
                ChainLink::Middleware(middleware) => {
                    let func = middleware.func.clone();
                    let next = Next { endpoint: endpoint.clone(), index: i + 1 };

                    if let Some(payload) = func(ctx, next).await {
                        ctx.response.content = Some(ResponseContent::Payload(payload));
                    }

                    // The continuation is the only path deeper into the
                    // chain; a middleware that never calls it stops here.
                    return;
                }
                ChainLink::Store(store) => {
                    let func = store.func.clone();

                    match func(ctx).await {
                        Ok(values) => {
                            for (key, value) in values {
                                ctx.store.insert(key, value);
                            }
                        }
                        Err(payload) => {
                            ctx.response.content = Some(ResponseContent::Payload(payload));
                        }
                    }
                }
                ChainLink::Validator(validator) => {
                    let validator = validator.clone();
                    run_validator(ctx, &validator).await;
                }
            }
        }

        if ctx.response.content.is_some() {
            return;
        }

        match &endpoint.route.handler {
            Handler::Stream(producer) => {
                let func = producer.clone();
                let stream = func(ctx).await;
                ctx.response.content = Some(ResponseContent::Stream(stream));
            }
            Handler::Ws(factory) => {
                let func = factory.clone();
                ctx.upgrade = Some(func(ctx).await);
            }
            Handler::Plain(handler) => {
                let func = handler.clone();
                ctx.response.content = Some(match func(ctx).await {
                    Reply::Payload(payload) => ResponseContent::Payload(payload),
                    Reply::Native(response) => ResponseContent::Native(response),
                });
            }
        }
    })
}

/// Validates each declared facet and aggregates failures into one 422
/// payload. A facet that failed more than once concatenates its issues.
async fn run_validator(ctx: &mut Context, validator: &Validator) {
    let Some(backend) = ctx.memory.get::<ValidatorHandle>(VALIDATOR_KEY).cloned() else {
        tracing::warn!("no validator backend registered, skipping validation");
        return;
    };

    let mut aggregate: Vec<(Facet, Vec<Value>)> = Vec::new();

    for (facet, schema) in &validator.request {
        let value = ctx.request.facet(*facet).cloned().unwrap_or(Value::Null);
        let validated = backend.validate(schema, value, *facet).await;

        if validated.success {
            ctx.request.set_facet(*facet, validated.content);
            continue;
        }

        let issues = match validated.content {
            Value::Array(items) => items,
            single => vec![single],
        };

        match aggregate.iter_mut().find(|(failed, _)| failed == facet) {
            Some((_, details)) => details.extend(issues),
            None => aggregate.push((*facet, issues)),
        }
    }

    if aggregate.is_empty() {
        return;
    }

    let details: Vec<Value> = aggregate
        .into_iter()
        .map(|(facet, details)| json!({ "type": facet.as_str(), "details": details }))
        .collect();

    ctx.response.content = Some(ResponseContent::Payload(
        error(Value::Array(details)).status(StatusCode::UNPROCESSABLE_ENTITY),
    ));
}
