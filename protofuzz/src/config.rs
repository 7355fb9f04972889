//! JSON configuration (SPEC_FULL.md §4.9, ambient stack): the on-disk
//! config document named in spec §6, loaded with `serde`/`serde_json` the
//! way the rest of the example pack loads its config
//! (`ashton-dyke-SAIREN-OS`, `biandratti-huginn-proxy`).

use std::fs;
use std::path::{Path, PathBuf};

use serde::{de, Deserialize, Deserializer};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("input_dir {0:?} does not exist")]
    InputDirMissing(PathBuf),
}

/// The original tool's config files spell booleans `"True"`/`"False"`
/// rather than JSON's native `true`/`false`; preserved on the wire for
/// round-trip fidelity with configs written for the real system.
fn deserialize_python_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    match s.as_str() {
        "True" => Ok(true),
        "False" => Ok(false),
        other => Err(de::Error::custom(format!(
            "expected \"True\" or \"False\", got {:?}",
            other
        ))),
    }
}

fn default_dumb_mode() -> bool {
    false
}

fn default_exec_tmout_ms() -> u64 {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoverageConfig {
    pub step: Option<String>,
    pub target_cmd: Option<String>,
    pub work_dir: Option<PathBuf>,
    pub parallel: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default = "default_dumb_mode", deserialize_with = "deserialize_python_bool_opt")]
    pub dumb_mode: bool,
    #[serde(default)]
    pub extra: Option<PathBuf>,
    #[serde(default = "default_exec_tmout_ms")]
    pub exec_tmout_ms: u64,
    #[serde(default)]
    pub coverage: Option<CoverageConfig>,
}

/// serde's `deserialize_with` only runs when the field is present; wrap the
/// custom bool parser so a missing `dumb_mode` key still falls back to its
/// default rather than erroring.
fn deserialize_python_bool_opt<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_python_bool(deserializer)
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        if !config.input_dir.is_dir() {
            return Err(ConfigError::InputDirMissing(config.input_dir));
        }
        Ok(config)
    }
}
