//! YAML configuration file support.
//!
//! A YAML file is an alternative to environment variables for describing a
//! run. Every field except `baseUrl` is optional; environment variables
//! override whatever the file sets (see [`crate::config::Config`]).
//!
//! ```yaml
//! baseUrl: "https://graphhopper.example.com/api/1"
//! users: 20
//! duration: "10m"
//! pacing: "1s"
//! personas:
//!   - name: route
//!     weight: 1
//!   - name: vrp
//!     weight: 10
//! vrp:
//!   maxLocations: 25
//!   profiles: ["car", "small_truck"]
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::errors::ConfigError;

/// Duration format for YAML (e.g., 30, "330ms", "5m").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum YamlDuration {
    Seconds(u64),
    String(String),
}

impl YamlDuration {
    pub fn to_std_duration(&self, field: &str) -> Result<Duration, ConfigError> {
        match self {
            YamlDuration::Seconds(s) => Ok(Duration::from_secs(*s)),
            YamlDuration::String(s) => crate::utils::parse_duration_string(s)
                .map_err(|e| ConfigError::invalid(field, s, e)),
        }
    }
}

/// One persona entry; the weight falls back to the persona default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YamlPersona {
    pub name: String,
    #[serde(default)]
    pub weight: Option<f64>,
}

/// Optimization persona settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlVrpConfig {
    pub max_profiles: Option<usize>,
    pub max_locations: Option<usize>,
    pub profiles: Option<Vec<String>>,
    pub traffic_probability: Option<f64>,
    pub poll_interval: Option<YamlDuration>,
    pub max_polls: Option<u32>,
}

/// Root of the YAML configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YamlConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub query_points: Option<String>,
    pub query_points_num: Option<usize>,
    pub users: Option<usize>,
    pub spawn_rate: Option<f64>,
    pub duration: Option<YamlDuration>,
    pub pacing: Option<YamlDuration>,
    pub skip_tls_verify: Option<bool>,
    pub seed: Option<u64>,
    pub debug: Option<bool>,
    pub metrics_port: Option<u16>,
    #[serde(default)]
    pub personas: Vec<YamlPersona>,
    #[serde(default)]
    pub vrp: YamlVrpConfig,
}

impl YamlConfig {
    /// Parse YAML configuration from a string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::YamlParse(e.to_string()))
    }

    /// Load YAML configuration from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(format!("{}: {}", path.display(), e)))?;
        Self::from_str(&content)
    }
}
