//! Binary RPC server.
//!
//! Accepts classified connections from the multiplexer and serves each one
//! on its own task. Frames on a connection are answered in order; the
//! response echoes the request's sequence number.

use super::codec::{RpcRequest, RpcResponse};
use super::{
    BitmapDstAndPairRequest, BitmapPairRequest, BitmapStoreRequest, BitmapValueRequest,
    BitmapValuesRequest, SERVICE_NAME,
};
use crate::adapters::{AdapterState, DecodeResult, Reply, Translator};
use crate::core::error::{AdapterErrorMapping, BasaltError, BasaltResult, RpcErrorMapping};
use crate::net::MuxListener;
use crate::replica::{OpKind, Operation};
use bytes::BytesMut;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::watch;

/// RPC server counters.
#[derive(Debug, Default)]
pub struct RpcMetrics {
    /// Connections served.
    pub connections_total: AtomicU64,
    /// Connections currently open.
    pub connections_active: AtomicU64,
    /// Calls answered.
    pub calls: AtomicU64,
    /// Calls answered with an error frame.
    pub errors: AtomicU64,
    /// Connections closed on an undecodable frame.
    pub protocol_errors: AtomicU64,
}

/// Binary RPC server.
pub struct RpcServer {
    translator: Arc<Translator>,
    state: RwLock<AdapterState>,
    metrics: RpcMetrics,
}

impl RpcServer {
    /// Create a server over a shared translator.
    pub fn new(translator: Arc<Translator>) -> Self {
        Self {
            translator,
            state: RwLock::new(AdapterState::Created),
            metrics: RpcMetrics::default(),
        }
    }

    /// Current state.
    pub fn state(&self) -> AdapterState {
        *self.state.read()
    }

    /// Counters.
    pub fn metrics(&self) -> &RpcMetrics {
        &self.metrics
    }

    /// Serve connections from `listener` until shutdown.
    pub async fn serve(
        self: Arc<Self>,
        mut listener: MuxListener,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> BasaltResult<()> {
        *self.state.write() = AdapterState::Running;
        tracing::info!(addr = %listener.local_addr(), "rpc server accepting");

        loop {
            tokio::select! {
                conn = listener.accept() => {
                    let Some(stream) = conn else {
                        break;
                    };
                    let remote = stream.get_ref().remote_addr;
                    let conn_id = stream.get_ref().id;
                    tracing::debug!(conn = %conn_id, remote = %remote, "rpc connection");
                    tokio::spawn(Arc::clone(&self).handle_connection(stream, shutdown_rx.clone()));
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        *self.state.write() = AdapterState::Stopped;
        tracing::info!("rpc server stopped");
        Ok(())
    }

    /// Serve one connection until the peer closes it, a frame fails to
    /// decode, or shutdown is signalled.
    pub async fn handle_connection<S>(self: Arc<Self>, mut stream: S, mut shutdown_rx: watch::Receiver<bool>)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        self.metrics.connections_total.fetch_add(1, Ordering::Relaxed);
        self.metrics.connections_active.fetch_add(1, Ordering::Relaxed);

        let mut buffer = BytesMut::with_capacity(4096);
        let mut out = BytesMut::with_capacity(4096);

        'conn: loop {
            tokio::select! {
                result = stream.read_buf(&mut buffer) => {
                    match result {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {}
                    }

                    loop {
                        match RpcRequest::decode(&mut buffer) {
                            DecodeResult::Complete(request) => {
                                let response = self.call(request).await;
                                out.clear();
                                response.encode(&mut out);
                                if stream.write_all(&out).await.is_err() {
                                    break 'conn;
                                }
                            }
                            DecodeResult::Incomplete => break,
                            DecodeResult::Invalid(e) => {
                                // Framing is lost; answer once and close.
                                self.metrics.protocol_errors.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(error = %e, "invalid rpc frame");
                                out.clear();
                                RpcResponse::error(0, format!("protocol error: {}", e))
                                    .encode(&mut out);
                                let _ = stream.write_all(&out).await;
                                break 'conn;
                            }
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }

        let _ = stream.shutdown().await;
        self.metrics.connections_active.fetch_sub(1, Ordering::Relaxed);
    }

    /// Answer one request.
    pub async fn call(&self, request: RpcRequest) -> RpcResponse {
        self.metrics.calls.fetch_add(1, Ordering::Relaxed);
        match self.dispatch(&request.method, &request.payload).await {
            Ok(payload) => RpcResponse::ok(request.seq, payload),
            Err(e) => {
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(method = %request.method, error = %e, "rpc call failed");
                RpcResponse::error(request.seq, RpcErrorMapping::map_error(&e))
            }
        }
    }

    /// Resolve a method, parse its payload and run the command.
    ///
    /// Writes answer `true`; reads answer their typed result.
    pub async fn dispatch(&self, method: &str, payload: &[u8]) -> BasaltResult<Vec<u8>> {
        let kind = method
            .strip_prefix(SERVICE_NAME)
            .and_then(|m| m.strip_prefix('.'))
            .and_then(OpKind::from_method)
            .ok_or_else(|| BasaltError::unsupported(format!("unknown method {}", method)))?;

        let command = parse_payload(kind, payload)?.into_command()?;
        let reply = self.translator.execute(&command).await?;

        let encoded = match reply {
            Reply::Done => serde_json::to_vec(&true),
            Reply::Result(result) => serde_json::to_vec(&result),
        };
        encoded.map_err(|e| BasaltError::internal(format!("encode reply: {}", e)))
    }
}

fn json<T: DeserializeOwned>(kind: OpKind, payload: &[u8]) -> BasaltResult<T> {
    serde_json::from_slice(payload)
        .map_err(|e| BasaltError::invalid_data(format!("{} payload: {}", kind.method(), e)))
}

/// Build the untyped operation for `kind` from its JSON payload.
fn parse_payload(kind: OpKind, payload: &[u8]) -> BasaltResult<Operation> {
    let (targets, values) = match kind {
        OpKind::Add | OpKind::Remove | OpKind::Exists => {
            let req: BitmapValueRequest = json(kind, payload)?;
            (vec![req.name], vec![req.value])
        }
        OpKind::AddMany => {
            let req: BitmapValuesRequest = json(kind, payload)?;
            (vec![req.name], req.values)
        }
        OpKind::Drop | OpKind::Clear | OpKind::Card => {
            let name: String = json(kind, payload)?;
            (vec![name], Vec::new())
        }
        OpKind::Inter | OpKind::Union => {
            let names: Vec<String> = json(kind, payload)?;
            (names, Vec::new())
        }
        OpKind::InterStore | OpKind::UnionStore => {
            let req: BitmapStoreRequest = json(kind, payload)?;
            let mut targets = Vec::with_capacity(req.names.len() + 1);
            targets.push(req.destination);
            targets.extend(req.names);
            (targets, Vec::new())
        }
        OpKind::Xor | OpKind::Diff => {
            let req: BitmapPairRequest = json(kind, payload)?;
            (vec![req.name1, req.name2], Vec::new())
        }
        OpKind::XorStore | OpKind::DiffStore => {
            let req: BitmapDstAndPairRequest = json(kind, payload)?;
            (vec![req.destination, req.name1, req.name2], Vec::new())
        }
    };
    Ok(Operation::new(kind, targets, values))
}
