//! Optional on-disk TOML configuration.
//!
//! Two locations cascade: the platform config directory
//! (`<config_dir>/bibfill/config.toml`) and a `.bibfill.toml` in the
//! working directory, the latter winning field by field. CLI flags
//! override both.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// All fields optional so partial configs merge with defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub network: Option<NetworkConfig>,
    pub lookups: Option<LookupsConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Contact address for polite pools (Crossref, OpenAlex).
    pub mailto: Option<String>,
    pub timeout_secs: Option<u64>,
    pub host_delay_ms: Option<u64>,
    pub max_concurrent: Option<usize>,
    pub host_concurrency: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LookupsConfig {
    /// Adapters never queried.
    pub disabled: Option<Vec<String>>,
    /// When set, only these adapters are queried.
    pub only: Option<Vec<String>>,
}

/// Platform config path: `<config_dir>/bibfill/config.toml`.
pub fn config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("bibfill").join("config.toml"))
}

/// Load the cascaded configuration.
pub fn load_config() -> ConfigFile {
    let platform = config_path().and_then(|p| load_from_path(&p));
    let cwd = load_from_path(Path::new(".bibfill.toml"));

    match (platform, cwd) {
        (None, None) => ConfigFile::default(),
        (Some(p), None) => p,
        (None, Some(c)) => c,
        (Some(p), Some(c)) => merge(p, c),
    }
}

/// Load one file; `None` when missing or unparseable.
pub fn load_from_path(path: &Path) -> Option<ConfigFile> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(config) => Some(config),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "ignoring unparseable config");
            None
        }
    }
}

/// Field-by-field overlay: `overlay` wins wherever it has a value.
pub fn merge(base: ConfigFile, overlay: ConfigFile) -> ConfigFile {
    let (bn, on) = (base.network.unwrap_or_default(), overlay.network.unwrap_or_default());
    let (bl, ol) = (base.lookups.unwrap_or_default(), overlay.lookups.unwrap_or_default());
    ConfigFile {
        network: Some(NetworkConfig {
            mailto: on.mailto.or(bn.mailto),
            timeout_secs: on.timeout_secs.or(bn.timeout_secs),
            host_delay_ms: on.host_delay_ms.or(bn.host_delay_ms),
            max_concurrent: on.max_concurrent.or(bn.max_concurrent),
            host_concurrency: on.host_concurrency.or(bn.host_concurrency),
        }),
        lookups: Some(LookupsConfig {
            disabled: ol.disabled.or(bl.disabled),
            only: ol.only.or(bl.only),
        }),
    }
}
