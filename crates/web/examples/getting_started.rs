use http::{Method, StatusCode};
use serde_json::{Value, json};
use trellis_web::{
    BoxFuture, Context, Facet, Next, Payload, Reply, RouteOptions, Server, ValidatorRequest, app, module, success,
};

// curl -v http://127.0.0.1:8080/hello/world
fn hello(ctx: &mut Context) -> BoxFuture<'_, Reply> {
    Box::pin(async move {
        let name = ctx.request.param("name").and_then(|value| value.as_str()).unwrap_or("stranger");
        Reply::Payload(Payload::text(format!("hello {name}\r\n")))
    })
}

// curl -v -H 'Content-Type: application/json' -d '{"age":30}' http://127.0.0.1:8080/users
// curl -v -H 'Content-Type: application/json' -d '{"age":"x"}' http://127.0.0.1:8080/users
fn create_user(ctx: &mut Context) -> BoxFuture<'_, Reply> {
    Box::pin(async move {
        let body = ctx.request.facet(Facet::Body).cloned().unwrap_or(Value::Null);
        Reply::Payload(success(body).status(StatusCode::CREATED))
    })
}

fn request_logger(ctx: &mut Context, next: Next) -> BoxFuture<'_, Option<Payload>> {
    Box::pin(async move {
        let started = std::time::Instant::now();
        let path = ctx.request.path.clone();

        next.run(ctx).await;

        tracing::info!("{path} handled in {:?}", started.elapsed());
        None
    })
}

#[tokio::main]
async fn main() {
    let tree = module().middleware(request_logger).route(Method::GET, "/hello/:name", hello).route_with(
        Method::POST,
        "/users",
        create_user,
        RouteOptions {
            validator: Some(ValidatorRequest::new().body(json!({
                "type": "object",
                "properties": { "age": { "type": "integer" } },
                "required": ["age"],
            }))),
            uses: None,
        },
    );

    let app = app(tree).compile().expect("route tree compiles");

    Server::builder().address("127.0.0.1:8080").app(app).build().unwrap().start().await;
}
