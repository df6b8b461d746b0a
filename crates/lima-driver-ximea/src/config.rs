//! Plugin configuration using Figment
//!
//! Loaded from, in increasing priority:
//! 1. a TOML file
//! 2. environment variables prefixed with `LIMA_XIMEA_`
//!    (`LIMA_XIMEA_TIMEOUT_MS=500` overrides `timeout_ms`)
//!
//! # Example
//! ```no_run
//! use lima_driver_ximea::XimeaConfig;
//!
//! let config = XimeaConfig::load("ximea.toml")?;
//! println!("camera {}", config.camera_id);
//! # Ok::<(), anyhow::Error>(())
//! ```

use crate::components::acquisition::LatencyPolicy;
use anyhow::Context;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use lima_core::HwError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "LIMA_XIMEA_";

/// GPI ports a trigger can be routed through.
pub const GPI_PORT_RANGE: std::ops::RangeInclusive<u32> = 1..=12;

/// Camera session configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct XimeaConfig {
    /// xiAPI device index
    #[serde(default)]
    pub camera_id: u32,
    /// GPI port used for external triggers (1-12)
    #[serde(default = "default_trigger_gpi_port")]
    pub trigger_gpi_port: u32,
    /// Base `xiGetImage` timeout; the exposure time is added per frame
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    /// User set loaded at open (`user_set_selector`)
    #[serde(default)]
    pub startup_mode: i32,
    /// Frame buffers to allocate when the plugin owns its buffer
    #[serde(default = "default_nb_buffers")]
    pub nb_buffers: usize,
    /// When the latency time is applied
    #[serde(default)]
    pub latency_policy: LatencyPolicy,
}

fn default_trigger_gpi_port() -> u32 {
    1
}

fn default_timeout_ms() -> u32 {
    1000
}

fn default_nb_buffers() -> usize {
    16
}

impl Default for XimeaConfig {
    fn default() -> Self {
        Self::new(0)
    }
}

impl XimeaConfig {
    /// Defaults for camera `camera_id`.
    #[must_use]
    pub fn new(camera_id: u32) -> Self {
        Self {
            camera_id,
            trigger_gpi_port: default_trigger_gpi_port(),
            timeout_ms: default_timeout_ms(),
            startup_mode: 0,
            nb_buffers: default_nb_buffers(),
            latency_policy: LatencyPolicy::default(),
        }
    }

    /// Merge `path` and the environment without validating.
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
    }

    /// Parse TOML text, then apply environment overrides.
    pub fn from_toml_str(toml: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::string(toml))
            .merge(Env::prefixed(ENV_PREFIX))
            .extract()
    }

    /// Load and validate.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let config = Self::load_from(path)
            .with_context(|| format!("Failed to load XIMEA config from {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid XIMEA config in {}", path.display()))?;
        Ok(config)
    }

    /// Serialize back to TOML.
    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize XIMEA config")
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), HwError> {
        if !GPI_PORT_RANGE.contains(&self.trigger_gpi_port) {
            return Err(HwError::Config(format!(
                "trigger_gpi_port {} outside {}..={}",
                self.trigger_gpi_port,
                GPI_PORT_RANGE.start(),
                GPI_PORT_RANGE.end()
            )));
        }
        if self.timeout_ms == 0 {
            return Err(HwError::Config("timeout_ms must be > 0".into()));
        }
        if self.nb_buffers == 0 {
            return Err(HwError::Config("nb_buffers must be > 0".into()));
        }
        Ok(())
    }
}
