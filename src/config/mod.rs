//! Configuration management for wlbridge
//!
//! This module handles loading, parsing, and validating configuration
//! from TOML files: which transport carries buffer requests, what the
//! host accepts from the producer, the outputs windows are scaled for, and
//! the default log filter.

use crate::formats::{fourcc_from_str, fourcc_to_string, BufferFormatsWithModifiers};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Main configuration struct containing all wlbridge settings
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct BridgeConfig {
    /// How producer requests reach the host
    #[serde(default)]
    pub transport: TransportConfig,

    /// What the host accepts from the producer
    #[serde(default)]
    pub host: HostConfig,

    /// Outputs and scale factors used for window buffer scale
    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which strategy connects the producer to the host
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum TransportMode {
    /// Direct calls, no thread hop
    InProcess,
    /// Message passing between the producer's commit context and the host service
    #[default]
    CrossProcess,
}

impl std::str::FromStr for TransportMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in-process" => Ok(TransportMode::InProcess),
            "cross-process" => Ok(TransportMode::CrossProcess),
            other => anyhow::bail!("Unknown transport mode: {}", other),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TransportConfig {
    #[serde(default)]
    pub mode: TransportMode,
}

/// Limits the host applies to producer buffers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HostConfig {
    /// Bytes per pixel used to check shm lengths (4 for 32-bit RGBA)
    #[serde(default = "HostConfig::default_shm_bytes_per_pixel")]
    pub shm_bytes_per_pixel: u32,

    /// Accept dmabuf-backed buffers when the compositor supports them
    #[serde(default = "HostConfig::default_supports_dmabuf")]
    pub supports_dmabuf: bool,

    /// Formats offered to the producer. Empty means the built-in table.
    #[serde(default)]
    pub formats: Vec<FormatConfig>,
}

/// One advertised pixel format
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatConfig {
    /// Four character DRM code, e.g. "AR24"
    pub fourcc: String,

    /// Accepted DRM format modifiers
    #[serde(default)]
    pub modifiers: Vec<u64>,
}

/// Output layout used to derive buffer scale and UI scale
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct DisplayConfig {
    /// Overrides every output's device scale factor when set
    #[serde(default)]
    pub forced_device_scale_factor: Option<f32>,

    /// Empty means a single 1x primary output
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutputConfig {
    pub id: u32,

    /// Integer buffer scale of the output
    #[serde(default = "OutputConfig::default_scale_factor")]
    pub scale_factor: i32,

    /// UI scale of the output
    #[serde(default = "OutputConfig::default_device_scale_factor")]
    pub device_scale_factor: f32,

    #[serde(default)]
    pub primary: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default log filter, overridden by RUST_LOG
    #[serde(default = "LoggingConfig::default_level")]
    pub level: String,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            shm_bytes_per_pixel: Self::default_shm_bytes_per_pixel(),
            supports_dmabuf: Self::default_supports_dmabuf(),
            formats: Vec::new(),
        }
    }
}

impl HostConfig {
    fn default_shm_bytes_per_pixel() -> u32 {
        4
    }

    fn default_supports_dmabuf() -> bool {
        true
    }

    /// The configured formats keyed by fourcc code. Unparseable codes are
    /// skipped here; [`BridgeConfig::validate`] rejects them.
    pub fn format_table(&self) -> BufferFormatsWithModifiers {
        if self.formats.is_empty() {
            return crate::formats::default_formats();
        }
        self.formats
            .iter()
            .filter_map(|format| {
                let code = fourcc_from_str(&format.fourcc)?;
                Some((code, format.modifiers.clone()))
            })
            .collect()
    }

    /// Builds a config advertising exactly `table`.
    pub fn with_formats(table: &BufferFormatsWithModifiers) -> Self {
        Self {
            formats: table
                .iter()
                .map(|(code, modifiers)| FormatConfig {
                    fourcc: fourcc_to_string(*code),
                    modifiers: modifiers.clone(),
                })
                .collect(),
            ..Self::default()
        }
    }
}

impl OutputConfig {
    fn default_scale_factor() -> i32 {
        1
    }

    fn default_device_scale_factor() -> f32 {
        1.0
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Self::default_level(),
        }
    }
}

impl LoggingConfig {
    fn default_level() -> String {
        "info".to_string()
    }
}

impl BridgeConfig {
    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        // Expand ~ to home directory
        let expanded_path = if path.to_string_lossy().starts_with('~') {
            let home = std::env::var("HOME").context("Failed to get HOME environment variable")?;
            Path::new(&home).join(path.strip_prefix("~").unwrap_or(path))
        } else {
            path.to_path_buf()
        };

        let contents = fs::read_to_string(&expanded_path)
            .with_context(|| format!("Failed to read config file: {}", expanded_path.display()))?;

        let config: BridgeConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", expanded_path.display()))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if !(1..=16).contains(&self.host.shm_bytes_per_pixel) {
            anyhow::bail!(
                "Invalid shm_bytes_per_pixel: {} (must be between 1 and 16)",
                self.host.shm_bytes_per_pixel
            );
        }

        for format in &self.host.formats {
            if fourcc_from_str(&format.fourcc).is_none() {
                anyhow::bail!("Invalid fourcc code: {:?}", format.fourcc);
            }
            if format.modifiers.is_empty() {
                anyhow::bail!("Format {} lists no modifiers", format.fourcc);
            }
        }

        if let Some(forced) = self.display.forced_device_scale_factor {
            if forced <= 0.0 {
                anyhow::bail!("Invalid forced_device_scale_factor: must be positive");
            }
        }

        let mut seen = std::collections::HashSet::new();
        for output in &self.display.outputs {
            if !seen.insert(output.id) {
                anyhow::bail!("Duplicate output id: {}", output.id);
            }
            if output.scale_factor < 1 {
                anyhow::bail!("Invalid scale_factor for output {}", output.id);
            }
            if output.device_scale_factor <= 0.0 {
                anyhow::bail!("Invalid device_scale_factor for output {}", output.id);
            }
        }
        if self.display.outputs.iter().filter(|o| o.primary).count() > 1 {
            anyhow::bail!("More than one primary output configured");
        }

        Ok(())
    }

    /// Save configuration to a TOML file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self).context("Failed to serialize configuration")?;

        fs::write(path, contents).context("Failed to write configuration file")?;

        Ok(())
    }
}

#[cfg(test)]
mod tests;

#[cfg(test)]
mod property_tests;
