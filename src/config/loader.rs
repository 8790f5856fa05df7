use std::path::Path;

use anyhow::{Context, Result};

use super::types::RunnerConfig;

pub const CONFIG_FILE: &str = "styx-docker.yaml";

/// Load config from a `styx-docker.yaml` file in the given directory.
pub fn load(dir: &Path) -> Result<Option<RunnerConfig>> {
    let path = dir.join(CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_file(&path).map(Some)
}

/// Load config from an explicit path.
pub fn load_file(path: &Path) -> Result<RunnerConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config: RunnerConfig = serde_yaml::from_str(&contents)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    Ok(config)
}
