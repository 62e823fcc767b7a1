use std::fs;
use std::path::Path;

use crate::config::TransportConfig;
use crate::error::{Result, TransportError};

/// Load and validate a [`TransportConfig`] from a TOML file. A missing file
/// is an error; callers that want defaults should use
/// [`TransportConfig::default`] directly instead of calling this function.
pub fn load_from_path<P: AsRef<Path>>(p: P) -> Result<TransportConfig> {
    let txt = fs::read_to_string(p)
        .map_err(|e| TransportError::Config(format!("failed to read config file: {e}")))?;
    let cfg: TransportConfig = toml::from_str(&txt)
        .map_err(|e| TransportError::Config(format!("failed to parse config: {e}")))?;

    cfg.validate().map_err(TransportError::Config)?;

    Ok(cfg)
}
