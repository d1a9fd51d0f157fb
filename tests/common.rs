//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use basalt::adapters::Translator;
use basalt::core::config::Config;
use basalt::core::runtime::Runtime;
use basalt::replica::{
    BitmapStateMachine, LocalCluster, LocalClusterConfig, OpKind, Operation,
    ReplicatedStateMachine,
};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Create a config file whose data directory is `data_dir` and whose
/// endpoint binds an ephemeral loopback port.
pub fn create_config_with_data_dir(data_dir: &Path) -> NamedTempFile {
    let config_content = format!(
        r#"
[server]
bind = "127.0.0.1:0"
request_timeout_ms = 1000

[paths]
data_dir = "{}"
"#,
        data_dir.display()
    );

    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(config_content.as_bytes())
        .expect("Failed to write config");
    file
}

/// Load a config from a temp file.
pub fn load_config(file: &NamedTempFile) -> Config {
    Config::from_file(file.path()).expect("Failed to load config")
}

/// Create a temporary directory for test data.
pub fn temp_test_dir() -> tempfile::TempDir {
    tempfile::tempdir().expect("Failed to create temp directory")
}

/// Start a full runtime on an ephemeral port.
pub async fn start_runtime(data_dir: &Path) -> Runtime {
    let file = create_config_with_data_dir(data_dir);
    let mut runtime = Runtime::new(load_config(&file)).expect("Failed to create runtime");
    runtime.start().await.expect("Failed to start runtime");
    runtime
}

/// Translator over a fresh in-process group.
pub fn local_translator(replicas: u64) -> (Arc<LocalCluster>, Arc<Translator>) {
    let cluster = Arc::new(LocalCluster::new(LocalClusterConfig {
        replicas,
        ..Default::default()
    }));
    let translator = Translator::new(Arc::new(cluster.handle(1)), Duration::from_secs(1));
    (cluster, Arc::new(translator))
}

/// Encode a wire record.
pub fn encode(kind: OpKind, targets: &[&str], values: &[u32]) -> Vec<u8> {
    Operation::new(
        kind,
        targets.iter().map(|s| s.to_string()).collect(),
        values.to_vec(),
    )
    .encode()
    .expect("Failed to encode operation")
}

/// State machine holding `A = {1,2,3}` and `B = {2,3,4}`.
pub fn create_ab_state_machine() -> BitmapStateMachine {
    let mut sm = BitmapStateMachine::default();
    sm.apply(&encode(OpKind::AddMany, &["A"], &[1, 2, 3]))
        .expect("Failed to populate A");
    sm.apply(&encode(OpKind::AddMany, &["B"], &[2, 3, 4]))
        .expect("Failed to populate B");
    sm
}

/// Send a raw HTTP/1.1 request and return the status code and body.
pub async fn http_request(addr: SocketAddr, method: &str, path: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(addr).await.expect("Failed to connect");
    let request = format!(
        "{} {} HTTP/1.1\r\nHost: localhost\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        method, path
    );
    stream
        .write_all(request.as_bytes())
        .await
        .expect("Failed to send request");

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .await
        .expect("Failed to read response");

    let mut headers = [httparse::EMPTY_HEADER; 32];
    let mut response = httparse::Response::new(&mut headers);
    let header_len = match response.parse(&raw).expect("Invalid HTTP response") {
        httparse::Status::Complete(n) => n,
        httparse::Status::Partial => panic!("Truncated HTTP response"),
    };
    let status = response.code.expect("Missing status code");
    let body = String::from_utf8_lossy(&raw[header_len..]).into_owned();
    (status, body)
}

/// Assert that a result is Ok and return the value.
#[track_caller]
pub fn assert_ok<T, E: std::fmt::Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(v) => v,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that a result is Err.
#[track_caller]
pub fn assert_err<T: std::fmt::Debug, E>(result: Result<T, E>) -> E {
    match result {
        Ok(v) => panic!("Expected Err, got Ok: {:?}", v),
        Err(e) => e,
    }
}
