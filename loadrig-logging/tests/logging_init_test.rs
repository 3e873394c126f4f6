use loadrig_logging::{init_logging, LogFormat, LogLevel, LogTarget, LoggingConfig, Rotation};

#[test]
fn test_file_target_receives_json_events() {
    let dir = tempfile::tempdir().unwrap();
    let config = LoggingConfig {
        level: LogLevel::Info,
        format: LogFormat::Json,
        targets: vec![LogTarget::File {
            directory: dir.path().display().to_string(),
            file_prefix: "loadrig.log".to_string(),
            rotation: Rotation::Never,
            level: None,
        }],
        include_location: false,
    };

    let guard = init_logging(&config).unwrap();
    assert_eq!(guard.file_targets(), 1);

    tracing::info!(phase = "NORMAL", "run started");
    tracing::debug!("filtered out at info");
    drop(guard);

    let content = std::fs::read_to_string(dir.path().join("loadrig.log")).unwrap();
    let line = content.lines().next().unwrap();
    let event: serde_json::Value = serde_json::from_str(line).unwrap();
    assert_eq!(event["fields"]["message"], "run started");
    assert_eq!(event["fields"]["phase"], "NORMAL");
    assert!(!content.contains("filtered out"));

    // A second initialization is a no-op rather than a panic
    assert!(init_logging(&LoggingConfig::default()).is_ok());
}
