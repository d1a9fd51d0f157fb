//! Core infrastructure tests.

mod common;

use basalt::core::config::{Config, ConfigOverrides};
use basalt::core::error::{
    AdapterErrorMapping, BasaltError, HttpErrorMapping, RpcErrorMapping, HTTP_SUCCESS,
    INVALID_DATA, OPERATION_ERROR, UNKNOWN_METHOD,
};
use basalt::core::runtime::{ComponentHealth, Runtime};
use common::{create_config_with_data_dir, http_request, load_config, temp_test_dir};
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

// ============================================================================
// Config tests
// ============================================================================

#[test]
fn parse_full_config() {
    let config_content = r#"
[server]
bind = "127.0.0.1:9000"
request_timeout_ms = 250

[multiplexer]
max_lookahead_bytes = 4096
classify_timeout_ms = 1000
handoff_backlog = 16
max_connections = 64

[replication]
node_id = 2
replicas = 3
snapshot_entries = 100
compaction_overhead = 10

[paths]
data_dir = "/var/lib/basalt"

[telemetry]
log_level = "debug"
"#;

    let mut file = NamedTempFile::new().unwrap();
    file.write_all(config_content.as_bytes()).unwrap();

    let config = Config::from_file(file.path()).unwrap();
    assert_eq!(config.bind_addr().unwrap().port(), 9000);
    assert_eq!(config.server.request_timeout(), Duration::from_millis(250));
    assert_eq!(config.multiplexer.handoff_backlog, 16);
    assert_eq!(config.replication.replicas, 3);
    assert_eq!(
        config.paths.snapshot_path(config.replication.node_id),
        std::path::PathBuf::from("/var/lib/basalt/node-2/snapshot.bin")
    );
    assert_eq!(config.telemetry.log_level, "debug");
}

#[test]
fn parse_partial_config_fills_defaults() {
    let config = Config::from_toml("[server]\nbind = \"127.0.0.1:0\"\n").unwrap();
    assert_eq!(config.replication.node_id, 1);
    assert_eq!(config.replication.replicas, 1);
    assert_eq!(config.multiplexer.max_lookahead_bytes, 8 * 1024);
    assert_eq!(config.paths.data_dir, "data");
}

#[test]
fn validate_rejects_bad_values() {
    let cases = [
        "[server]\nrequest_timeout_ms = 0\n",
        "[multiplexer]\nmax_lookahead_bytes = 4\n",
        "[multiplexer]\nhandoff_backlog = 0\n",
        "[replication]\nreplicas = 0\n",
        "[replication]\nnode_id = 0\n",
        "[telemetry]\nlog_level = \"loud\"\n",
    ];
    for case in cases {
        assert!(Config::from_toml(case).is_err(), "accepted: {}", case);
    }
}

#[test]
fn unparseable_config_is_rejected() {
    assert!(Config::from_toml("[server\nbind = 1").is_err());

    let missing = temp_test_dir().path().join("absent.toml");
    let err = Config::from_file(&missing).unwrap_err();
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn overrides_take_precedence() {
    let dir = temp_test_dir();
    let file = create_config_with_data_dir(dir.path());
    let mut config = load_config(&file);

    config.apply_overrides(&ConfigOverrides {
        bind: Some("127.0.0.1:7777".into()),
        replicas: Some(5),
        node_id: Some(4),
        ..Default::default()
    });
    assert!(config.validate().is_ok());
    assert_eq!(config.bind_addr().unwrap().port(), 7777);
    assert_eq!(config.replication.node_id, 4);

    config.apply_overrides(&ConfigOverrides {
        node_id: Some(9),
        ..Default::default()
    });
    assert!(config.validate().is_err());
}

// ============================================================================
// Error tests
// ============================================================================

#[test]
fn error_classification() {
    let request_errors = [
        BasaltError::malformed("bad"),
        BasaltError::unsupported("nope"),
        BasaltError::invalid_data("abc"),
    ];
    for e in &request_errors {
        assert!(e.is_request_error(), "{:?}", e);
        assert!(!e.is_gateway_failure(), "{:?}", e);
        assert!(!e.is_retriable(), "{:?}", e);
    }

    let gateway_errors = [
        BasaltError::Timeout { elapsed_ms: 10 },
        BasaltError::NotLeader {
            replica: 2,
            leader: 1,
        },
        BasaltError::ClusterUnavailable { online: 1, total: 3 },
    ];
    for e in &gateway_errors {
        assert!(e.is_gateway_failure(), "{:?}", e);
        assert!(e.is_retriable(), "{:?}", e);
    }

    assert!(!BasaltError::snapshot_decode("eof").is_retriable());
    assert!(BasaltError::internal("x").is_gateway_failure());
}

#[test]
fn http_error_vocabulary() {
    assert_eq!(
        HttpErrorMapping::map_error(&BasaltError::invalid_data("abc")),
        INVALID_DATA
    );
    assert_eq!(
        HttpErrorMapping::map_error(&BasaltError::malformed("count")),
        INVALID_DATA
    );
    assert_eq!(
        HttpErrorMapping::map_error(&BasaltError::NotLeader {
            replica: 2,
            leader: 1
        }),
        OPERATION_ERROR
    );
    assert_eq!(
        HttpErrorMapping::map_error(&BasaltError::Timeout { elapsed_ms: 3000 }),
        OPERATION_ERROR
    );
}

#[test]
fn rpc_error_vocabulary() {
    assert_eq!(
        RpcErrorMapping::map_error(&BasaltError::unsupported("Bitmap.Nope")),
        UNKNOWN_METHOD
    );
    let message = RpcErrorMapping::map_error(&BasaltError::invalid_data("not json"));
    assert!(message.starts_with(INVALID_DATA));
    assert!(message.contains("not json"));

    let message = RpcErrorMapping::map_error(&BasaltError::ClusterUnavailable {
        online: 1,
        total: 3,
    });
    assert!(message.starts_with(OPERATION_ERROR));
}

// ============================================================================
// Runtime tests
// ============================================================================

#[tokio::test]
async fn runtime_lifecycle_health() {
    let dir = temp_test_dir();
    let file = create_config_with_data_dir(dir.path());
    let mut runtime = Runtime::new(load_config(&file)).unwrap();

    assert!(!runtime.is_ready());
    assert!(runtime.local_addr().is_none());

    runtime.start().await.unwrap();
    assert!(runtime.is_running());
    assert!(runtime.is_ready());
    assert_eq!(runtime.health().listeners, ComponentHealth::Healthy);
    assert_ne!(runtime.local_addr().unwrap().port(), 0);

    runtime.shutdown();
    runtime.stop().await.unwrap();
    assert!(!runtime.is_running());
    assert_eq!(runtime.health().storage, ComponentHealth::Stopped);
}

#[tokio::test]
async fn runtime_rejects_corrupt_snapshot() {
    let dir = temp_test_dir();
    let file = create_config_with_data_dir(dir.path());
    let config = load_config(&file);

    let path = config.paths.snapshot_path(config.replication.node_id);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"definitely not a snapshot").unwrap();

    let mut runtime = Runtime::new(config).unwrap();
    assert!(runtime.start().await.is_err());
    assert_eq!(runtime.health().storage, ComponentHealth::Failed);
}

#[tokio::test]
async fn runtime_fronting_non_first_replica_accepts_writes() {
    let dir = temp_test_dir();
    let file = create_config_with_data_dir(dir.path());
    let mut config = load_config(&file);
    config.apply_overrides(&ConfigOverrides {
        replicas: Some(3),
        node_id: Some(2),
        ..Default::default()
    });

    let mut runtime = Runtime::new(config).unwrap();
    runtime.start().await.unwrap();
    let addr = runtime.local_addr().unwrap();

    assert_eq!(
        http_request(addr, "POST", "/add/a/1").await,
        (200, HTTP_SUCCESS.to_string())
    );
    assert_eq!(http_request(addr, "GET", "/card/a").await, (200, "1".to_string()));

    let cluster = runtime.cluster().unwrap();
    assert_eq!(cluster.leader().await, 2);

    runtime.stop().await.unwrap();
    assert!(runtime.snapshot_path().ends_with("node-2/snapshot.bin"));
}
