//! Endpoint config loader.

pub mod schema;

use std::fs;
use std::path::Path;

use rosgate_core::{BridgeError, Result};

pub use schema::{AuthConfig, CertFormat, EndpointConfig, PolicyConfig};

pub fn load_from_file(path: &Path) -> Result<EndpointConfig> {
    let s = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("read config failed: {e}")))?;
    let mut cfg = load_from_str(&s)?;
    // Relative cert/key paths resolve against the config's own directory
    // before $HOME.
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        cfg.set_config_dir(dir);
    }
    Ok(cfg)
}

pub fn load_from_str(s: &str) -> Result<EndpointConfig> {
    let cfg: EndpointConfig = serde_yaml::from_str(s)
        .map_err(|e| BridgeError::Config(format!("invalid yaml: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Parse the endpoint block out of a host-supplied YAML value.
///
/// The host hands the whole system block through, so unknown sibling keys are
/// tolerated; only the recognized keys are interpreted.
pub fn load_from_value(value: &serde_yaml::Value) -> Result<EndpointConfig> {
    let cfg: EndpointConfig = serde_yaml::from_value(value.clone())
        .map_err(|e| BridgeError::Config(format!("invalid configuration: {e}")))?;
    cfg.validate()?;
    Ok(cfg)
}
