use anyhow::Result;
use restore_scatter::ScatterConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scatter: ScatterConfig,
    /// Node ids of the in-process cluster
    pub nodes: Vec<u32>,
    pub show_rows: bool,
    pub output_format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    Table,
    Json,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scatter: ScatterConfig::default(),
            nodes: vec![1, 2, 3],
            show_rows: true,
            output_format: OutputFormat::Table,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&contents)?;
        config.scatter.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"nodes": [4, 5]}"#).unwrap();
        assert_eq!(config.nodes, vec![4, 5]);
        assert_eq!(config.scatter.workers, 2);
        assert_eq!(config.output_format, OutputFormat::Table);
    }

    #[test]
    fn test_save_and_load() {
        let path = std::env::temp_dir().join(format!("restorectl-{}.json", std::process::id()));
        let mut config = Config::default();
        config.scatter = ScatterConfig::new(6);
        config.output_format = OutputFormat::Json;
        config.save(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded.scatter.workers, 6);
        assert_eq!(loaded.output_format, OutputFormat::Json);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let path =
            std::env::temp_dir().join(format!("restorectl-bad-{}.json", std::process::id()));
        std::fs::write(&path, r#"{"scatter": {"workers": 0}}"#).unwrap();
        let result = Config::from_file(&path);
        std::fs::remove_file(&path).unwrap();
        assert!(result.is_err());
    }
}
