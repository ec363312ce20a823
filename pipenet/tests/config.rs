use std::io::Write;

use pipenet::{ConfigError, PipeOptions, TcpOptions, TransportConfig, TransportKind};

#[test]
fn test_empty_object_gives_defaults() {
    let config = TransportConfig::from_json_str("{}").unwrap();
    assert_eq!(config, TransportConfig::default());
    assert_eq!(config.kind, TransportKind::Memory);
    assert_eq!(config.accept_backlog, TransportConfig::DEFAULT_ACCEPT_BACKLOG);
    assert_eq!(config.pipe, PipeOptions::default());
    assert!(config.tcp.nodelay);
}

#[test]
fn test_partial_sections_keep_other_defaults() {
    let config = TransportConfig::from_json_str(
        r#"{
            "kind": "tcp",
            "accept_backlog": 4,
            "pipe": { "max_buffer_size": 2097152 },
            "tcp": { "nodelay": false, "recv_buffer_size": 65536 }
        }"#,
    )
    .unwrap();

    assert_eq!(config.kind, TransportKind::Tcp);
    assert_eq!(config.accept_backlog, 4);
    assert_eq!(config.pipe.max_buffer_size, 2_097_152);
    assert_eq!(
        config.pipe.pause_writer_threshold,
        PipeOptions::default().pause_writer_threshold
    );
    assert_eq!(
        config.tcp,
        TcpOptions {
            nodelay: false,
            recv_buffer_size: Some(65536),
            send_buffer_size: None,
        }
    );
}

#[test]
fn test_inconsistent_thresholds_are_rejected() {
    let err = TransportConfig::from_json_str(
        r#"{ "pipe": { "pause_writer_threshold": 10, "resume_writer_threshold": 20 } }"#,
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");
}

#[test]
fn test_zero_backlog_is_rejected() {
    let err = TransportConfig::from_json_str(r#"{ "accept_backlog": 0 }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)), "{err:?}");
}

#[test]
fn test_unknown_fields_and_kinds_are_rejected() {
    let err = TransportConfig::from_json_str(r#"{ "backlog": 3 }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)), "{err:?}");

    let err = TransportConfig::from_json_str(r#"{ "kind": "carrier-pigeon" }"#).unwrap_err();
    assert!(matches!(err, ConfigError::Json(_)), "{err:?}");
}

#[test]
fn test_from_path() {
    let path = std::env::temp_dir().join(format!("pipenet-config-{}.json", std::process::id()));
    {
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(br#"{ "accept_backlog": 9 }"#).unwrap();
    }
    let config = TransportConfig::from_path(&path).unwrap();
    std::fs::remove_file(&path).unwrap();
    assert_eq!(config.accept_backlog, 9);

    let err = TransportConfig::from_path(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io(_)), "{err:?}");
}
