use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock, time::Duration};

/// Pipeline configuration: remote endpoints and timing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    pub identify_base_url: String,
    pub account_base_url: String,
    pub request_timeout_secs: u64,
    pub drain_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            identify_base_url: "https://api.floralens.app/v1/".into(),
            account_base_url: "https://accounts.floralens.app/v1/".into(),
            request_timeout_secs: 15,
            drain_interval_secs: 60,
        }
    }
}

impl PipelineConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn drain_interval(&self) -> Duration {
        Duration::from_secs(self.drain_interval_secs)
    }
}

/// JSON-file-backed config store. Read once at startup; a malformed
/// file falls back to defaults rather than blocking launch.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<PipelineConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_default()
        } else {
            PipelineConfig::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn current(&self) -> PipelineConfig {
        self.data.read().unwrap().clone()
    }

    pub fn update(&self, config: PipelineConfig) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = config;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &PipelineConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write config to {}", self.path.display()))
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: PipelineConfig = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}
