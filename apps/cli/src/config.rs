use std::path::{Path, PathBuf};

use {
    anyhow::{Context, Result},
    gatelink_chat::ChatConfig,
    gatelink_gateway_client::GatewayConfig,
    serde::Deserialize,
};

/// Contents of `gatelink.toml`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub gateway: GatewayConfig,
    pub chat: ChatConfig,
    /// Where the device identity and device tokens live.
    pub state_dir: Option<PathBuf>,
}

/// Command-line and environment values that override the file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub ws_url: Option<String>,
    pub api_url: Option<String>,
    pub state_dir: Option<PathBuf>,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&data).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn apply(&mut self, overrides: Overrides) {
        if let Some(url) = overrides.ws_url {
            self.gateway.url = url;
        }
        if let Some(url) = overrides.api_url {
            self.chat.api_base_url = url;
        }
        if let Some(dir) = overrides.state_dir {
            self.state_dir = Some(dir);
        }
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(|| {
            directories::ProjectDirs::from("", "", "gatelink")
                .map(|d| d.data_dir().to_path_buf())
                .unwrap_or_else(|| PathBuf::from(".gatelink"))
        })
    }
}
