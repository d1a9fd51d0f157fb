//! Client command implementation.

use crate::adapters::rpc::{qualified_method, RpcClient, SERVICE_NAME};
use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Args;

/// Issue one RPC call and print the JSON reply.
#[derive(Args, Debug)]
pub struct ClientArgs {
    /// Server address.
    #[arg(long, default_value = "127.0.0.1:18419")]
    pub addr: String,

    /// Method name, with or without the `Bitmap.` prefix (e.g. `AddMany`).
    pub method: String,

    /// JSON payload (e.g. `{"name":"a","values":[1,2]}` or `"a"`).
    pub payload: String,
}

fn full_method(method: &str) -> String {
    if method.starts_with(SERVICE_NAME) && method[SERVICE_NAME.len()..].starts_with('.') {
        method.to_string()
    } else {
        qualified_method(method)
    }
}

/// Run the client command.
pub async fn run_client(args: ClientArgs) -> Result<()> {
    // Catch typos locally instead of round-tripping an INVALID DATA frame.
    serde_json::from_str::<serde_json::Value>(&args.payload)
        .context("payload is not valid JSON")?;

    let mut client = RpcClient::connect(args.addr.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", args.addr))?;
    let reply = client
        .call_raw(&full_method(&args.method), Bytes::from(args.payload.into_bytes()))
        .await?;

    println!("{}", String::from_utf8_lossy(&reply));
    Ok(())
}
