//! Kernel configuration.
//!
//! ```toml
//! default-service = "gpt-4"
//!
//! [entry-point]
//! group = "Chat"
//! name = "Greet"
//!
//! [[service]]
//! service = "openai"
//! model-id = "gpt-4"
//! api-key-env = "OPENAI_API_KEY"
//!
//! [[function]]
//! group = "Chat"
//! path = "functions/greet.yaml"
//! ```

use crate::{
    error::{Error, Result},
    service::{BackendService, OpenAiChatService},
};
use serde::Deserialize;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

/// Configuration of a [`Kernel`](crate::Kernel).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct KernelConfig {
    /// Model id of the default service.
    #[serde(default)]
    pub default_service: Option<String>,
    /// Function invoked by `run_entry_point`.
    #[serde(default)]
    pub entry_point: Option<FunctionRef>,
    /// Backend services in registration order.
    #[serde(default, rename = "service")]
    pub services: Vec<ServiceConfig>,
    /// Function descriptor files in registration order.
    #[serde(default, rename = "function")]
    pub functions: Vec<FunctionConfig>,
    /// Directory against which relative descriptor paths are resolved.
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

impl KernelConfig {
    /// Parses the TOML content.
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(Error::from)
    }

    /// Reads the TOML file. Descriptor paths are resolved relative to its directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let mut config = Self::from_toml(&content)?;
        config.base_dir = path.parent().map(Path::to_path_buf);
        tracing::info!(path = %path.display(), "kernel config loaded");
        Ok(config)
    }

    /// Sets the directory against which relative descriptor paths are resolved.
    #[inline]
    pub fn with_base_dir(mut self, base_dir: impl Into<PathBuf>) -> Self {
        self.base_dir = Some(base_dir.into());
        self
    }

    /// Resolves a descriptor path.
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        match &self.base_dir {
            Some(base_dir) if path.is_relative() => base_dir.join(path),
            _ => path.to_path_buf(),
        }
    }
}

/// A function addressed by group and name.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct FunctionRef {
    /// Group of the function.
    pub group: String,
    /// Name of the function.
    pub name: String,
}

/// A `[[service]]` table.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServiceConfig {
    /// Service kind. Only `openai` is supported.
    #[serde(default = "ServiceConfig::default_service")]
    pub service: String,
    /// Model id.
    pub model_id: String,
    /// Base URL of the API.
    #[serde(default)]
    pub base_url: Option<String>,
    /// API key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ServiceConfig {
    fn default_service() -> String {
        "openai".to_owned()
    }

    /// Constructs the backend service.
    pub fn build(&self) -> Result<Arc<dyn BackendService>> {
        match self.service.as_str() {
            "openai" => {
                let mut service = OpenAiChatService::new(&self.model_id);
                if let Some(base_url) = &self.base_url {
                    service = service.with_base_url(base_url);
                }
                if let Some(api_key) = self.api_key()? {
                    service = service.with_api_key(api_key);
                }
                if let Some(timeout) = self.timeout {
                    service = service
                        .with_timeout(Duration::from_secs(timeout))
                        .map_err(|err| Error::Config(err.to_string()))?;
                }
                Ok(Arc::new(service))
            }
            service => Err(Error::Config(format!(
                "backend service `{service}` is unsupported"
            ))),
        }
    }

    /// Returns the API key, reading the environment variable if configured.
    fn api_key(&self) -> Result<Option<String>> {
        if let Some(api_key) = &self.api_key {
            return Ok(Some(api_key.clone()));
        }
        match &self.api_key_env {
            Some(var) => std::env::var(var).map(Some).map_err(|err| {
                Error::Config(format!("fail to read the API key from `{var}`: {err}"))
            }),
            None => Ok(None),
        }
    }
}

/// A `[[function]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct FunctionConfig {
    /// Group of the function.
    pub group: String,
    /// Path of the YAML descriptor.
    pub path: PathBuf,
}
