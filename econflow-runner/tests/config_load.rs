//! Configuration file loading and pipeline construction from it.

use econflow_core::collect::{FixedClock, ScriptedTransport};
use econflow_core::domain::{Bounds, SourceId};
use econflow_core::store::WriteMode;
use econflow_runner::{ConfigError, Pipeline, PipelineConfig};
use chrono::{TimeZone, Utc};
use std::sync::Arc;

#[test]
fn file_config_drives_pipeline_construction() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("econflow.toml");
    let root = dir.path().join("lake");
    std::fs::write(
        &path,
        format!(
            r#"
            [store]
            root = "{}"
            write_mode = "strict"

            [pipeline]
            max_workers = 3
            window = 4

            [[bounds]]
            source = "ibge"
            code = "inpc"
            min = -1.0
            max = 3.0
            "#,
            root.display()
        ),
    )
    .unwrap();

    let config = PipelineConfig::from_file(&path).unwrap();
    assert_eq!(config.store.root, root);

    let pipeline = Pipeline::from_config(
        &config,
        Arc::new(ScriptedTransport::new()),
        Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap())),
    )
    .unwrap();
    assert_eq!(pipeline.options().write_mode, WriteMode::Strict);
    assert_eq!(pipeline.options().max_workers, 3);
    assert_eq!(pipeline.options().aggregate.window, 4);

    let ibge = pipeline.registry().get(SourceId::Ibge).unwrap();
    assert_eq!(ibge.catalog().get("inpc").unwrap().bounds, Bounds::new(-1.0, 3.0));
}

#[test]
fn missing_file_is_a_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = PipelineConfig::from_file(&dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[pipeline]\nmax_workers = \"lots\"").unwrap();
    assert!(matches!(
        PipelineConfig::from_file(&path),
        Err(ConfigError::Parse(_))
    ));
}
