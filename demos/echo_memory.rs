//! Two peers over an in-memory link calling each other.
//!
//! Run with `cargo run --example echo_memory --features logging`.

use peer_rpc::{memory, CorrelatorBuilder, HandlerTable, RequestContext, Result, RpcError};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize)]
struct AddResponse {
    sum: i64,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    #[cfg(feature = "logging")]
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let (left, right) = memory::pair();

    let server_handlers = HandlerTable::new()
        .register_sync("say", |_ctx: RequestContext, (m,): (String,)| {
            println!("message from client: {m}");
            Ok(())
        })
        .register("echo", |_ctx: RequestContext, (m,): (String,)| async move { Ok(m) })
        .register("add", |_ctx: RequestContext, (a, b): (i64, i64)| async move {
            a.checked_add(b)
                .map(|sum| AddResponse { sum })
                .ok_or_else(|| RpcError::handler("overflow"))
        });

    let client_handlers = HandlerTable::new()
        .register_sync("test", |_ctx: RequestContext, (m,): (String,)| {
            println!("message from server: {m}");
            Ok(())
        });

    let server = CorrelatorBuilder::new(right.transport)
        .handlers(server_handlers)
        .build()?;
    let client = CorrelatorBuilder::new(left.transport)
        .handlers(client_handlers)
        .request_timeout(Duration::from_secs(2))
        .build()?;

    let _server_loop = server.serve(right.inbox);
    let _client_loop = client.serve(left.inbox);

    server.call::<_, ()>("test", ("hello",)).await?;
    client.call::<_, ()>("say", ("say message",)).await?;

    let echoed: String = client.call("echo", ("echo message",)).await?;
    println!("echo result: {echoed}");

    let resp: AddResponse = client.call("add", (20, 3)).await?;
    println!("20 + 3 = {}", resp.sum);

    match client.call::<_, ()>("missingMethod", ()).await {
        Err(err) => println!("expected failure: {err}"),
        Ok(()) => println!("unexpected success"),
    }

    client.shutdown();
    server.shutdown();
    Ok(())
}
