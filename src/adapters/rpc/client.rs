//! Typed binary RPC client.

use super::codec::{RpcRequest, RpcResponse};
use super::{
    qualified_method, BitmapDstAndPairRequest, BitmapPairRequest, BitmapStoreRequest,
    BitmapValueRequest, BitmapValuesRequest,
};
use crate::adapters::DecodeResult;
use crate::core::error::{BasaltError, BasaltResult};
use crate::replica::OpKind;
use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Client for one connection. Calls are issued one at a time.
#[derive(Debug)]
pub struct RpcClient<S = TcpStream> {
    stream: S,
    buffer: BytesMut,
    next_seq: u64,
}

impl RpcClient<TcpStream> {
    /// Connect to a server.
    pub async fn connect(addr: impl ToSocketAddrs) -> BasaltResult<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| BasaltError::internal(format!("connect failed: {}", e)))?;
        let _ = stream.set_nodelay(true);
        Ok(Self::new(stream))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> RpcClient<S> {
    /// Wrap an established stream.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: BytesMut::with_capacity(4096),
            next_seq: 1,
        }
    }

    /// Send raw payload bytes to a fully qualified method and return the
    /// raw reply body.
    pub async fn call_raw(&mut self, method: &str, payload: Bytes) -> BasaltResult<Bytes> {
        let seq = self.next_seq;
        self.next_seq += 1;

        let mut out = BytesMut::new();
        RpcRequest::new(seq, method, payload)
            .encode(&mut out)
            .map_err(BasaltError::invalid_data)?;
        self.stream
            .write_all(&out)
            .await
            .map_err(|e| BasaltError::internal(format!("write failed: {}", e)))?;

        let response = self.read_response().await?;
        if response.seq != seq {
            return Err(BasaltError::internal(format!(
                "response sequence {} does not match request {}",
                response.seq, seq
            )));
        }
        if response.is_error() {
            return Err(BasaltError::Remote {
                message: response.error_message(),
            });
        }
        Ok(response.body)
    }

    async fn read_response(&mut self) -> BasaltResult<RpcResponse> {
        loop {
            match RpcResponse::decode(&mut self.buffer) {
                DecodeResult::Complete(response) => return Ok(response),
                DecodeResult::Invalid(e) => {
                    return Err(BasaltError::internal(format!("invalid response: {}", e)))
                }
                DecodeResult::Incomplete => {}
            }
            let n = self
                .stream
                .read_buf(&mut self.buffer)
                .await
                .map_err(|e| BasaltError::internal(format!("read failed: {}", e)))?;
            if n == 0 {
                return Err(BasaltError::internal("connection closed by server"));
            }
        }
    }

    /// Call `kind` with a serializable payload and decode the JSON reply.
    pub async fn call<P, R>(&mut self, kind: OpKind, payload: &P) -> BasaltResult<R>
    where
        P: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let body = serde_json::to_vec(payload)
            .map_err(|e| BasaltError::internal(format!("encode payload: {}", e)))?;
        let reply = self
            .call_raw(&qualified_method(kind.method()), Bytes::from(body))
            .await?;
        serde_json::from_slice(&reply)
            .map_err(|e| BasaltError::internal(format!("decode reply: {}", e)))
    }

    pub async fn add(&mut self, name: &str, value: u32) -> BasaltResult<bool> {
        self.call(OpKind::Add, &value_request(name, value)).await
    }

    pub async fn add_many(&mut self, name: &str, values: &[u32]) -> BasaltResult<bool> {
        let req = BitmapValuesRequest {
            name: name.to_string(),
            values: values.to_vec(),
        };
        self.call(OpKind::AddMany, &req).await
    }

    pub async fn remove(&mut self, name: &str, value: u32) -> BasaltResult<bool> {
        self.call(OpKind::Remove, &value_request(name, value)).await
    }

    pub async fn remove_bitmap(&mut self, name: &str) -> BasaltResult<bool> {
        self.call(OpKind::Drop, name).await
    }

    pub async fn clear_bitmap(&mut self, name: &str) -> BasaltResult<bool> {
        self.call(OpKind::Clear, name).await
    }

    pub async fn exists(&mut self, name: &str, value: u32) -> BasaltResult<bool> {
        self.call(OpKind::Exists, &value_request(name, value)).await
    }

    pub async fn card(&mut self, name: &str) -> BasaltResult<u64> {
        self.call(OpKind::Card, name).await
    }

    pub async fn inter(&mut self, names: &[&str]) -> BasaltResult<Vec<u32>> {
        self.call(OpKind::Inter, names).await
    }

    pub async fn inter_store(&mut self, destination: &str, names: &[&str]) -> BasaltResult<bool> {
        self.call(OpKind::InterStore, &store_request(destination, names))
            .await
    }

    pub async fn union(&mut self, names: &[&str]) -> BasaltResult<Vec<u32>> {
        self.call(OpKind::Union, names).await
    }

    pub async fn union_store(&mut self, destination: &str, names: &[&str]) -> BasaltResult<bool> {
        self.call(OpKind::UnionStore, &store_request(destination, names))
            .await
    }

    pub async fn xor(&mut self, name1: &str, name2: &str) -> BasaltResult<Vec<u32>> {
        self.call(OpKind::Xor, &pair_request(name1, name2)).await
    }

    pub async fn xor_store(
        &mut self,
        destination: &str,
        name1: &str,
        name2: &str,
    ) -> BasaltResult<bool> {
        self.call(OpKind::XorStore, &dst_pair_request(destination, name1, name2))
            .await
    }

    pub async fn diff(&mut self, name1: &str, name2: &str) -> BasaltResult<Vec<u32>> {
        self.call(OpKind::Diff, &pair_request(name1, name2)).await
    }

    pub async fn diff_store(
        &mut self,
        destination: &str,
        name1: &str,
        name2: &str,
    ) -> BasaltResult<bool> {
        self.call(OpKind::DiffStore, &dst_pair_request(destination, name1, name2))
            .await
    }
}

fn value_request(name: &str, value: u32) -> BitmapValueRequest {
    BitmapValueRequest {
        name: name.to_string(),
        value,
    }
}

fn store_request(destination: &str, names: &[&str]) -> BitmapStoreRequest {
    BitmapStoreRequest {
        destination: destination.to_string(),
        names: names.iter().map(|n| n.to_string()).collect(),
    }
}

fn pair_request(name1: &str, name2: &str) -> BitmapPairRequest {
    BitmapPairRequest {
        name1: name1.to_string(),
        name2: name2.to_string(),
    }
}

fn dst_pair_request(destination: &str, name1: &str, name2: &str) -> BitmapDstAndPairRequest {
    BitmapDstAndPairRequest {
        destination: destination.to_string(),
        name1: name1.to_string(),
        name2: name2.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::rpc::RpcServer;
    use crate::adapters::Translator;
    use crate::core::error::UNKNOWN_METHOD;
    use crate::replica::{LocalCluster, LocalClusterConfig};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    fn spawn_pair() -> (RpcClient<tokio::io::DuplexStream>, watch::Sender<bool>) {
        let cluster = Arc::new(LocalCluster::new(LocalClusterConfig::default()));
        let translator = Translator::new(Arc::new(cluster.handle(1)), Duration::from_secs(1));
        let server = Arc::new(RpcServer::new(Arc::new(translator)));
        let (client, conn) = tokio::io::duplex(4096);
        let (tx, rx) = watch::channel(false);
        tokio::spawn(server.handle_connection(conn, rx));
        (RpcClient::new(client), tx)
    }

    #[tokio::test]
    async fn test_typed_calls() {
        let (mut client, _tx) = spawn_pair();

        assert!(client.add_many("a", &[1, 2, 3]).await.unwrap());
        assert!(client.add_many("b", &[2, 3, 4]).await.unwrap());
        assert_eq!(client.inter(&["a", "b"]).await.unwrap(), vec![2, 3]);
        assert_eq!(client.xor("a", "b").await.unwrap(), vec![1, 4]);
        assert!(client.diff_store("d", "a", "b").await.unwrap());
        assert_eq!(client.card("d").await.unwrap(), 1);
        assert!(client.exists("d", 1).await.unwrap());
        assert!(client.remove_bitmap("d").await.unwrap());
        assert_eq!(client.card("d").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_remote_error() {
        let (mut client, _tx) = spawn_pair();
        let err = client
            .call_raw("Bitmap.Nope", Bytes::from_static(b"\"a\""))
            .await
            .unwrap_err();
        match err {
            BasaltError::Remote { message } => assert_eq!(message, UNKNOWN_METHOD),
            other => panic!("unexpected: {:?}", other),
        }

        // The connection stays usable after an error frame.
        assert!(client.add("a", 1).await.unwrap());
    }
}
