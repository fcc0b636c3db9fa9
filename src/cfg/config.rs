// SPDX-License-Identifier: BSD-3-Clause

use std::{collections::HashMap, fs, path::PathBuf, time::Duration};

use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level configuration record (§6.3), deserialized from YAML.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub observatory: Observatory,
    pub files: FilesConfig,
    pub timeouts: TimeoutsConfig,
    pub controllers: HashMap<String, ControllerConfig>,
    #[serde(default)]
    pub network: NetworkConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Observatory {
    Apo,
    Lco,
}

impl Observatory {
    /// `n` for `apo`, `s` otherwise; used to expand the `{hemisphere}`
    /// filename template placeholder (§4.7.1).
    pub fn hemisphere(&self) -> &'static str {
        match self {
            Observatory::Apo => "n",
            Observatory::Lco => "s",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FilesConfig {
    pub data_dir: PathBuf,
    pub template: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TimeoutsConfig {
    #[serde(rename = "readout_max", with = "serde_secs_f64")]
    pub readout_max: Duration,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ControllerConfig {
    pub host: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub ccds: HashMap<String, CcdRegion>,
}

/// A named readout region within a device's frame buffer, sliced out as
/// its own FITS image extension (§4.7.1 step 8).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct CcdRegion {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NetworkConfig {
    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: u64,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            connect_timeout_s: default_connect_timeout_s(),
            port: default_port(),
        }
    }
}

fn default_connect_timeout_s() -> u64 {
    5
}

fn default_port() -> u16 {
    4242
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    Stderr,
    File,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub output: LogOutput,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: LogOutput::default(),
            file_path: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Loads the configuration from YAML, validates it, and returns the
    /// ready-to-use value.
    pub fn load_from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path).context("failed to read config file")?;
        let mut cfg: Config = serde_yaml::from_str(&text).context("failed to parse config YAML")?;
        cfg.validate_and_normalize()?;
        Ok(cfg)
    }

    /// Validates invariants that `serde` alone cannot express.
    pub fn validate_and_normalize(&mut self) -> Result<()> {
        ensure!(!self.files.data_dir.as_os_str().is_empty(), "files.data_dir must not be empty");
        ensure!(!self.files.template.is_empty(), "files.template must not be empty");
        ensure!(!self.controllers.is_empty(), "at least one controller must be configured");
        ensure!(self.timeouts.readout_max > Duration::ZERO, "timeouts.readout_max must be > 0");
        ensure!(self.network.port > 0, "network.port must be > 0");

        if self.logging.output == LogOutput::File {
            ensure!(
                self.logging.file_path.is_some(),
                "logging.file_path is required when logging.output = file"
            );
        }

        Ok(())
    }
}

/// Serde helper representing a `Duration` as a number of fractional seconds.
mod serde_secs_f64 {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
