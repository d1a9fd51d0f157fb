//! Binary RPC adapter.
//!
//! Clients open a TCP connection to the shared endpoint and exchange
//! length-prefixed frames whose first byte is [`RPC_MAGIC`]; that byte is
//! what the multiplexer keys on. Calls are named `Bitmap.<Method>` and
//! carry a JSON payload whose shape depends on the method.
//!
//! - [`codec`] - frame header and request/response encoding
//! - [`service`] - per-connection server loop and call dispatch
//! - [`client`] - typed client

pub mod client;
pub mod codec;
pub mod service;

pub use client::RpcClient;
pub use codec::{FrameHeader, MessageType, RpcRequest, RpcResponse, RpcStatus};
pub use service::RpcServer;

use serde::{Deserialize, Serialize};

/// First byte of every frame.
pub const RPC_MAGIC: u8 = 0x08;

/// Frame format version.
pub const RPC_VERSION: u8 = 1;

/// Fixed header size in bytes.
pub const HEADER_SIZE: usize = 16;

/// Largest accepted frame body.
pub const MAX_BODY_LEN: usize = 16 * 1024 * 1024;

/// Service name prefixed to every method.
pub const SERVICE_NAME: &str = "Bitmap";

/// Payload for `Add`, `Remove` and `Exists`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapValueRequest {
    pub name: String,
    pub value: u32,
}

/// Payload for `AddMany`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapValuesRequest {
    pub name: String,
    pub values: Vec<u32>,
}

/// Payload for `InterStore` and `UnionStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapStoreRequest {
    pub destination: String,
    pub names: Vec<String>,
}

/// Payload for `Xor` and `Diff`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapPairRequest {
    pub name1: String,
    pub name2: String,
}

/// Payload for `XorStore` and `DiffStore`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BitmapDstAndPairRequest {
    pub destination: String,
    pub name1: String,
    pub name2: String,
}

/// Fully qualified method name, e.g. `Bitmap.Add`.
pub fn qualified_method(method: &str) -> String {
    format!("{}.{}", SERVICE_NAME, method)
}
