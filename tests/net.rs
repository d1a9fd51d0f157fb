//! Networking integration tests.
//!
//! Runs a full node on an ephemeral port and talks to the shared endpoint
//! with both protocols.

mod common;

use basalt::adapters::rpc::RpcClient;
use basalt::core::error::{BasaltError, HTTP_SUCCESS, INVALID_DATA, UNKNOWN_METHOD};
use basalt::core::runtime::Runtime;
use bytes::Bytes;
use common::{
    assert_ok, create_config_with_data_dir, http_request, load_config, start_runtime, temp_test_dir,
};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn endpoint(runtime: &Runtime) -> SocketAddr {
    runtime.local_addr().expect("runtime is listening")
}

// ============================================================================
// RPC over the shared endpoint
// ============================================================================

#[tokio::test]
async fn rpc_client_end_to_end() {
    let dir = temp_test_dir();
    let mut runtime = start_runtime(dir.path()).await;
    let addr = endpoint(&runtime);

    let mut client = assert_ok(RpcClient::connect(addr).await);
    assert!(assert_ok(client.add_many("A", &[1, 2, 3]).await));
    assert!(assert_ok(client.add_many("B", &[2, 3, 4]).await));
    assert!(assert_ok(client.add("A", 9).await));

    assert!(assert_ok(client.exists("A", 9).await));
    assert_eq!(assert_ok(client.card("A").await), 4);
    assert_eq!(assert_ok(client.inter(&["A", "B"]).await), vec![2, 3]);
    assert_eq!(assert_ok(client.union(&["A", "B"]).await), vec![1, 2, 3, 4, 9]);
    assert_eq!(assert_ok(client.xor("A", "B").await), vec![1, 4, 9]);
    assert_eq!(assert_ok(client.diff("A", "B").await), vec![1, 9]);

    assert!(assert_ok(client.diff_store("D", "A", "B").await));
    assert_eq!(assert_ok(client.card("D").await), 2);
    assert!(assert_ok(client.remove_bitmap("D").await));
    assert_eq!(assert_ok(client.card("D").await), 0);

    assert_ok(runtime.stop().await);
}

#[tokio::test]
async fn rpc_unknown_method_keeps_connection() {
    let dir = temp_test_dir();
    let mut runtime = start_runtime(dir.path()).await;

    let mut client = assert_ok(RpcClient::connect(endpoint(&runtime)).await);
    let err = client
        .call_raw("Bitmap.Frobnicate", Bytes::from_static(b"{}"))
        .await
        .expect_err("unknown method should fail");
    assert!(
        matches!(&err, BasaltError::Remote { message } if message == UNKNOWN_METHOD),
        "{:?}",
        err
    );

    let err = client
        .call_raw("Bitmap.Add", Bytes::from_static(b"[1"))
        .await
        .expect_err("bad payload should fail");
    assert!(matches!(&err, BasaltError::Remote { message } if message.starts_with(INVALID_DATA)));

    // Same connection still serves.
    assert!(assert_ok(client.add("s", 1).await));

    assert_ok(runtime.stop().await);
}

// ============================================================================
// HTTP over the shared endpoint
// ============================================================================

#[tokio::test]
async fn http_end_to_end() {
    let dir = temp_test_dir();
    let mut runtime = start_runtime(dir.path()).await;
    let addr = endpoint(&runtime);

    assert_eq!(
        http_request(addr, "POST", "/addmany/A/3,1,2").await,
        (200, HTTP_SUCCESS.to_string())
    );
    assert_eq!(http_request(addr, "GET", "/card/A").await, (200, "3".to_string()));
    assert_eq!(
        http_request(addr, "GET", "/union/A,B").await,
        (200, "1,2,3".to_string())
    );
    assert_eq!(
        http_request(addr, "POST", "/add/A/x").await,
        (200, INVALID_DATA.to_string())
    );

    let (status, _) = http_request(addr, "GET", "/missing").await;
    assert_eq!(status, 404);

    assert_ok(runtime.stop().await);
}

#[tokio::test]
async fn both_protocols_share_state() {
    let dir = temp_test_dir();
    let mut runtime = start_runtime(dir.path()).await;
    let addr = endpoint(&runtime);

    let mut client = assert_ok(RpcClient::connect(addr).await);
    assert!(assert_ok(client.add_many("shared", &[10, 20]).await));

    assert_eq!(
        http_request(addr, "GET", "/exists/shared/20").await,
        (200, "true".to_string())
    );
    assert_eq!(
        http_request(addr, "POST", "/remove/shared/10").await,
        (200, HTTP_SUCCESS.to_string())
    );
    assert_eq!(assert_ok(client.card("shared").await), 1);

    let metrics = runtime.mux_metrics().expect("multiplexer running");
    assert_eq!(metrics.classified("rpc"), 1);
    assert_eq!(metrics.classified("http"), 2);

    assert_ok(runtime.stop().await);
}

// ============================================================================
// Classification failures
// ============================================================================

#[tokio::test]
async fn unrecognised_connection_is_closed() {
    let dir = temp_test_dir();
    let mut runtime = start_runtime(dir.path()).await;
    let addr = endpoint(&runtime);

    let mut garbage = TcpStream::connect(addr).await.expect("connect");
    garbage
        .write_all(b"\x00\x01\x02 not a protocol\r\n")
        .await
        .expect("write");
    let mut buf = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), garbage.read_to_end(&mut buf))
        .await
        .expect("server should close the connection");
    // Closed without a reply; a reset counts as closed.
    assert!(read.map_or(true, |n| n == 0));
    assert!(buf.is_empty());

    // Other connections are unaffected.
    assert_eq!(http_request(addr, "GET", "/card/A").await, (200, "0".to_string()));
    let mut client = assert_ok(RpcClient::connect(addr).await);
    assert_eq!(assert_ok(client.card("A").await), 0);

    let metrics = runtime.mux_metrics().expect("multiplexer running");
    assert_eq!(metrics.dropped(), 1);

    assert_ok(runtime.stop().await);
}

async fn assert_closed_by_server(stream: &mut TcpStream, within: Duration) {
    let mut buf = Vec::new();
    let read = tokio::time::timeout(within, stream.read_to_end(&mut buf))
        .await
        .expect("server should close the connection");
    assert!(read.map_or(true, |n| n == 0));
    assert!(buf.is_empty());
}

#[tokio::test]
async fn stalled_classification_does_not_block_other_connections() {
    let dir = temp_test_dir();
    let file = create_config_with_data_dir(dir.path());
    let mut config = load_config(&file);
    config.multiplexer.classify_timeout_ms = 3000;
    let mut runtime = Runtime::new(config).expect("runtime");
    runtime.start().await.expect("start");
    let addr = endpoint(&runtime);

    // One peer never speaks, the other stops after a byte that could
    // still begin a request line.
    let mut silent = TcpStream::connect(addr).await.expect("connect");
    let mut partial = TcpStream::connect(addr).await.expect("connect");
    partial.write_all(b"G").await.expect("write");

    assert_eq!(
        http_request(addr, "POST", "/add/s/1").await,
        (200, HTTP_SUCCESS.to_string())
    );
    let mut client = assert_ok(RpcClient::connect(addr).await);
    assert_eq!(assert_ok(client.card("s").await), 1);

    // Both stalled peers are still waiting on classification.
    let mut byte = [0u8; 1];
    assert!(tokio::time::timeout(Duration::from_millis(50), silent.read(&mut byte))
        .await
        .is_err());
    assert!(tokio::time::timeout(Duration::from_millis(50), partial.read(&mut byte))
        .await
        .is_err());

    assert_closed_by_server(&mut silent, Duration::from_secs(10)).await;
    assert_closed_by_server(&mut partial, Duration::from_secs(10)).await;

    let metrics = runtime.mux_metrics().expect("multiplexer running");
    assert_eq!(metrics.timeouts.load(Ordering::Relaxed), 2);
    assert_eq!(metrics.classified("http"), 1);
    assert_eq!(metrics.classified("rpc"), 1);

    assert_ok(runtime.stop().await);
}

// ============================================================================
// Restart
// ============================================================================

#[tokio::test]
async fn state_survives_restart() {
    let dir = temp_test_dir();

    let mut runtime = start_runtime(dir.path()).await;
    let mut client = assert_ok(RpcClient::connect(endpoint(&runtime)).await);
    assert!(assert_ok(client.add_many("kept", &[1, 2, 3]).await));
    drop(client);
    assert_ok(runtime.stop().await);
    assert!(runtime.snapshot_path().exists());

    let mut runtime = start_runtime(dir.path()).await;
    let addr = endpoint(&runtime);
    assert_eq!(http_request(addr, "GET", "/card/kept").await, (200, "3".to_string()));

    let cluster = runtime.cluster().expect("cluster running");
    let status = assert_ok(cluster.status().await);
    assert_eq!(status[0].applied_index, 1);

    assert_ok(runtime.stop().await);
}
