//! Unit tests for configuration module
//!
//! Tests configuration parsing, validation and edge cases in
//! configuration handling.

use super::*;
use anyhow::Result;
use drm::buffer::DrmFourcc;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_default_configuration_is_valid() {
    let config = BridgeConfig::default();

    assert!(config.validate().is_ok());
    assert_eq!(config.transport.mode, TransportMode::CrossProcess);
    assert_eq!(config.host.shm_bytes_per_pixel, 4);
    assert!(config.host.supports_dmabuf);
    assert_eq!(config.logging.level, "info");
    assert!(config.display.outputs.is_empty());
}

#[test]
fn test_configuration_from_file() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("wlbridge.toml");

    let test_config = r#"
[transport]
mode = "in-process"

[host]
shm_bytes_per_pixel = 4
supports_dmabuf = false

[[host.formats]]
fourcc = "AR24"
modifiers = [0]

[[host.formats]]
fourcc = "NV12"
modifiers = [0, 72057594037927935]

[display]
forced_device_scale_factor = 1.5

[[display.outputs]]
id = 1
scale_factor = 1
primary = true

[[display.outputs]]
id = 2
scale_factor = 2
device_scale_factor = 2.0

[logging]
level = "debug"
"#;
    fs::write(&file_path, test_config)?;

    let config = BridgeConfig::load(&file_path)?;

    assert_eq!(config.transport.mode, TransportMode::InProcess);
    assert!(!config.host.supports_dmabuf);
    assert_eq!(config.display.forced_device_scale_factor, Some(1.5));
    assert_eq!(config.display.outputs.len(), 2);
    assert_eq!(config.display.outputs[0].device_scale_factor, 1.0);
    assert!(config.display.outputs[0].primary);
    assert_eq!(config.logging.level, "debug");

    let table = config.host.format_table();
    assert_eq!(table.len(), 2);
    assert_eq!(table.get(&(DrmFourcc::Argb8888 as u32)), Some(&vec![0]));
    assert_eq!(table.get(&(DrmFourcc::Nv12 as u32)).map(Vec::len), Some(2));

    Ok(())
}

#[test]
fn test_partial_configuration_uses_defaults() -> Result<()> {
    let config: BridgeConfig = toml::from_str(
        r#"
[host]
supports_dmabuf = false
"#,
    )?;

    assert_eq!(config.host.shm_bytes_per_pixel, 4);
    assert_eq!(config.transport.mode, TransportMode::CrossProcess);
    assert_eq!(config.host.format_table(), crate::formats::default_formats());
    Ok(())
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let mut config = BridgeConfig::default();
    config.host.shm_bytes_per_pixel = 0;
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.host.formats.push(FormatConfig {
        fourcc: "TOOLONG".to_string(),
        modifiers: vec![0],
    });
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.host.formats.push(FormatConfig {
        fourcc: "AR24".to_string(),
        modifiers: Vec::new(),
    });
    assert!(config.validate().is_err());

    let mut config = BridgeConfig::default();
    config.display.forced_device_scale_factor = Some(0.0);
    assert!(config.validate().is_err());

    let output = OutputConfig {
        id: 1,
        scale_factor: 1,
        device_scale_factor: 1.0,
        primary: true,
    };
    let mut config = BridgeConfig::default();
    config.display.outputs = vec![output.clone(), output.clone()];
    assert!(config.validate().is_err(), "duplicate ids");

    let mut config = BridgeConfig::default();
    config.display.outputs = vec![
        output.clone(),
        OutputConfig {
            id: 2,
            ..output.clone()
        },
    ];
    assert!(config.validate().is_err(), "two primaries");

    let mut config = BridgeConfig::default();
    config.display.outputs = vec![OutputConfig {
        scale_factor: 0,
        ..output
    }];
    assert!(config.validate().is_err());
}

#[test]
fn test_unknown_transport_mode_fails_to_parse() {
    let parsed: std::result::Result<BridgeConfig, _> = toml::from_str(
        r#"
[transport]
mode = "carrier-pigeon"
"#,
    );
    assert!(parsed.is_err());
    assert!("carrier-pigeon".parse::<TransportMode>().is_err());
    assert_eq!(
        "in-process".parse::<TransportMode>().ok(),
        Some(TransportMode::InProcess)
    );
}

#[test]
fn test_missing_file_reports_path() {
    let err = BridgeConfig::load("/nonexistent/wlbridge.toml").unwrap_err();
    assert!(err.to_string().contains("/nonexistent/wlbridge.toml"));
}

#[test]
fn test_save_and_reload() -> Result<()> {
    let dir = tempdir()?;
    let file_path = dir.path().join("saved.toml");

    let mut config = BridgeConfig::default();
    config.transport.mode = TransportMode::InProcess;
    config.host = HostConfig::with_formats(&crate::formats::default_formats());
    config.save(&file_path)?;

    let loaded = BridgeConfig::load(&file_path)?;
    assert_eq!(loaded, config);
    assert_eq!(loaded.host.format_table(), crate::formats::default_formats());
    Ok(())
}
