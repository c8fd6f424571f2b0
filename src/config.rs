//! Configuration
//!
//! Layered with the `config` crate, lowest priority first:
//!
//! 1. Built-in defaults
//! 2. `namel3ss.toml` in the working directory, or the file named by
//!    `--config` / `N3_CONFIG_PATH` (an explicitly named file must exist)
//! 3. `N3_` environment variables, with `__` between section and key:
//!    `N3_STORE__BACKEND=sqlite`, `N3_RUNTIME__CAPABILITIES=network,secrets`
//! 4. Builder overrides
//!
//! A `.env` file in the working directory is read first with `dotenvy`.
//!
//! ```toml
//! [store]
//! backend = "sqlite"
//! path = "app.db"
//! max_connections = 5
//!
//! [runtime]
//! capabilities = ["network"]
//! verify_fast_scan = true
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::capabilities::CapabilitySet;

const DEFAULT_CONFIG_FILE: &str = "namel3ss.toml";
const ENV_PREFIX: &str = "N3";
const CONFIG_PATH_VAR: &str = "N3_CONFIG_PATH";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

impl StoreBackend {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreBackend::Memory => "memory",
            StoreBackend::Sqlite => "sqlite",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    /// Database file for the sqlite backend; unset means an in-memory database
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub max_connections: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            max_connections: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capabilities granted to every run, on top of invocation and policy grants
    pub capabilities: Vec<String>,
    /// Check accelerated scanner output against the reference lexer
    pub verify_fast_scan: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            capabilities: Vec::new(),
            verify_fast_scan: true,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            runtime: RuntimeConfig::default(),
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default sources.
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Default grants as a capability set.
    pub fn grants(&self) -> Result<CapabilitySet> {
        CapabilitySet::from_names(&self.runtime.capabilities)
            .map_err(|name| anyhow::anyhow!("Unknown capability '{}' in runtime.capabilities", name))
    }

    /// The effective configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }

    fn validate(&self) -> Result<()> {
        if self.store.max_connections == 0 {
            bail!("store.max_connections must be at least 1");
        }
        self.grants()?;
        Ok(())
    }
}

/* ===================== Builder ===================== */

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    store_backend: Option<StoreBackend>,
    store_path: Option<PathBuf>,
    capabilities: Option<Vec<String>>,
    env: Option<HashMap<String, String>>,
}

impl ConfigBuilder {
    /// Config file to read instead of `namel3ss.toml`.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn store_backend(mut self, backend: Option<StoreBackend>) -> Self {
        self.store_backend = backend;
        self
    }

    pub fn store_path(mut self, path: Option<PathBuf>) -> Self {
        self.store_path = path;
        self
    }

    pub fn capabilities(mut self, capabilities: Option<Vec<String>>) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Read `N3_` variables from `vars` instead of the process environment.
    pub fn env_source(mut self, vars: HashMap<String, String>) -> Self {
        self.env = Some(vars);
        self
    }

    pub fn build(self) -> Result<Config> {
        if self.env.is_none() {
            dotenvy::dotenv().ok();
        }

        let explicit = self.config_path.clone().or_else(|| match &self.env {
            Some(vars) => vars.get(CONFIG_PATH_VAR).map(PathBuf::from),
            None => std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from),
        });
        let (file, required) = match explicit {
            Some(path) => (path, true),
            None => (PathBuf::from(DEFAULT_CONFIG_FILE), false),
        };
        if required && !file.exists() {
            bail!("Config file not found: {}", file.display());
        }

        let defaults = Config::default();
        let mut builder = ::config::Config::builder()
            .set_default("store.backend", defaults.store.backend.as_str())?
            .set_default("store.max_connections", i64::from(defaults.store.max_connections))?
            .set_default("runtime.capabilities", Vec::<String>::new())?
            .set_default("runtime.verify_fast_scan", defaults.runtime.verify_fast_scan)?
            .add_source(
                ::config::File::from(file.clone())
                    .format(::config::FileFormat::Toml)
                    .required(required),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("runtime.capabilities")
                    .try_parsing(true)
                    .source(self.env.clone()),
            );

        if let Some(backend) = self.store_backend {
            builder = builder.set_override("store.backend", backend.as_str())?;
        }
        if let Some(path) = &self.store_path {
            builder = builder.set_override("store.path", path.to_string_lossy().to_string())?;
        }
        if let Some(capabilities) = self.capabilities {
            builder = builder.set_override("runtime.capabilities", capabilities)?;
        }

        let config: Config = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .with_context(|| format!("Failed to load configuration (file: {})", file.display()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maplit::hashmap;
    use std::io::Write;

    fn no_env() -> HashMap<String, String> {
        HashMap::new()
    }

    #[test]
    fn test_defaults() {
        let config = Config::builder()
            .config_path(None)
            .env_source(no_env())
            .build()
            .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.max_connections, 5);
        assert!(config.runtime.capabilities.is_empty());
        assert!(config.runtime.verify_fast_scan);
    }

    #[test]
    fn test_file_then_env_then_overrides() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[store]\nbackend = \"sqlite\"\npath = \"app.db\"\n\n[runtime]\ncapabilities = [\"network\"]\n"
        )
        .unwrap();

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .env_source(no_env())
            .build()
            .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
        assert_eq!(config.store.path, Some(PathBuf::from("app.db")));
        assert_eq!(config.runtime.capabilities, vec!["network"]);

        let config = Config::builder()
            .config_path(Some(file.path().to_path_buf()))
            .env_source(hashmap! {
                "N3_STORE__MAX_CONNECTIONS".to_string() => "9".to_string(),
                "N3_RUNTIME__CAPABILITIES".to_string() => "network,secrets".to_string(),
            })
            .store_backend(Some(StoreBackend::Memory))
            .build()
            .unwrap();
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.max_connections, 9);
        assert_eq!(config.runtime.capabilities, vec!["network", "secrets"]);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let err = Config::builder()
            .config_path(Some(PathBuf::from("/nonexistent/namel3ss.toml")))
            .env_source(no_env())
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("Config file not found"));
    }

    #[test]
    fn test_unknown_capability_is_rejected() {
        let err = Config::builder()
            .env_source(no_env())
            .capabilities(Some(vec!["teleport".to_string()]))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_to_toml() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("backend = \"memory\""));
        assert!(rendered.contains("verify_fast_scan = true"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }
}
