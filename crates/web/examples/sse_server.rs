use serde_json::json;
use std::time::Duration;
use trellis_web::sse::{SseEvent, SseItem, SseStream};
use trellis_web::{BoxFuture, Context, Server, app, module};

// curl -N http://127.0.0.1:8080/events
fn clock(_ctx: &mut Context) -> BoxFuture<'_, SseStream> {
    Box::pin(async move {
        let ticks = futures::stream::unfold(0u64, |tick| async move {
            tokio::time::sleep(Duration::from_secs(1)).await;

            let event = SseEvent::new(json!({"tick": tick})).id(tick.to_string()).event("tick");
            Some((SseItem::Event(event), tick + 1))
        });

        Box::pin(ticks) as SseStream
    })
}

#[tokio::main]
async fn main() {
    let app = app(module().stream("/events", clock)).compile().expect("route tree compiles");

    Server::builder().address("127.0.0.1:8080").app(app).build().unwrap().start().await;
}
