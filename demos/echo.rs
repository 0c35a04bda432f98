//! Echo server and client in one process.
//!
//! This example demonstrates:
//! - Building a server with typed method handlers
//! - Serving TCP connections
//! - Issuing synchronous and asynchronous calls from one client
//!
//! # Running
//!
//! ```text
//! RUST_LOG=seqwire=debug cargo run --example echo
//! ```

use std::time::Duration;

use seqwire::{Client, RequestContext, RpcError, Server};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

/// Input structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoInput {
    message: String,
}

/// Output structure for the echo method.
#[derive(Serialize, Deserialize, Debug)]
struct EchoOutput {
    echo: String,
    seq: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let server = Server::builder()
        .handle("Echo.Say", |input: EchoInput, ctx: RequestContext| async move {
            Ok(EchoOutput {
                echo: input.message,
                seq: ctx.seq(),
            })
        })
        .handle("Echo.Slow", |ms: u64, _ctx| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        })
        .handle("Echo.Fail", |reason: String, _ctx| async move {
            Err::<(), _>(RpcError::application(reason))
        })
        .handle_timeout(Duration::from_secs(5))
        .build()?;

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!("Serving on {}", addr);
    tokio::spawn(async move { server.serve(listener).await });

    let client = Client::builder()
        .call_timeout(Duration::from_secs(2))
        .dial(addr)
        .await?;

    let reply: EchoOutput = client
        .call(
            "Echo.Say",
            &EchoInput {
                message: "hello".to_string(),
            },
        )
        .await?;
    tracing::info!("Echo.Say -> {:?}", reply);

    // slower calls finish last, whatever order they were sent in
    let (done, mut completed) = mpsc::channel(3);
    for ms in [300u64, 200, 100] {
        client.go("Echo.Slow", &ms, done.clone()).await;
    }
    for _ in 0..3 {
        if let Some(call) = completed.recv().await {
            let seq = call.seq;
            tracing::info!("Echo.Slow seq {} -> {:?}", seq, call.reply::<u64>());
        }
    }

    if let Err(e) = client.call::<_, ()>("Echo.Fail", "on purpose").await {
        tracing::info!("Echo.Fail -> {}", e);
    }

    client.close().await?;
    Ok(())
}
