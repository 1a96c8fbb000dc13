use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use stocktake_vision::{DetectorConfig, EngineConfig};

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    pub roi: Option<RoiCfg>,
    #[serde(default)]
    pub count: CountCfg,
}

#[derive(Debug, Deserialize)]
pub struct RoiCfg {
    /// Grayscale image; non-zero pixels are inside the counting area.
    pub mask_path: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CountCfg {
    /// Upper bound on one run; unset means no limit.
    pub timeout_s: Option<u64>,
    /// Directory the JSON report is written to when `--out` is not given.
    pub report_dir: Option<String>,
}

pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let s = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
    let cfg: Config = toml::from_str(&s).context("parse config toml")?;
    cfg.engine.validate().context("invalid [engine] section")?;
    Ok(cfg)
}
