//! Application bootstrap
//!
//! Builds an [`Application`] from configuration: the shared store, the tool
//! executor and the default grants. Programs are loaded and flows run
//! through it.
//!
//! ```rust,ignore
//! use namel3ss_core::application::InitBuilder;
//!
//! let app = InitBuilder::new().store_backend(StoreBackend::Sqlite).init().await?;
//! let program = app.load(&[SourceFile::new("app.ai", source)])?;
//! let outcome = app.run_flow(program, FlowInvocation::new(None)).await?;
//! ```

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::capabilities::CapabilitySet;
use crate::config::{Config, StoreBackend};
use crate::errors::Namel3ssError;
use crate::executor::{Executor, FlowInvocation, FlowOutcome, RuntimeFault, ToolExecutor, ToolRegistry};
use crate::lexer::FastScanner;
use crate::loader::{load_with, LoadOptions, SourceFile};
use crate::lowering::ir::Program;
use crate::store::{SqliteStore, StoreHandle};

/// A configured runtime: store, tools and default grants
pub struct Application {
    pub config: Config,
    pub store: StoreHandle,
    tools: Arc<dyn ToolExecutor>,
    grants: CapabilitySet,
    scanner: Option<Arc<dyn FastScanner>>,
}

impl Application {
    /// Create a new Application instance (pure instantiation, no I/O)
    pub fn new(config: Config, store: StoreHandle, tools: Arc<dyn ToolExecutor>) -> Result<Self> {
        let grants = config.grants()?;
        Ok(Self {
            config,
            store,
            tools,
            grants,
            scanner: None,
        })
    }

    /// Try `scanner` before the reference lexer on every load.
    pub fn with_scanner(mut self, scanner: Arc<dyn FastScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Load and lower a program.
    pub fn load(&self, sources: &[SourceFile]) -> Result<Arc<Program>, Namel3ssError> {
        let options = LoadOptions {
            scanner: self.scanner.as_deref(),
            verify_fast_scan: self.config.runtime.verify_fast_scan,
            ..LoadOptions::default()
        };
        load_with(sources, &options).map(Arc::new)
    }

    pub fn executor(&self, program: Arc<Program>) -> Executor {
        Executor::new(program, self.store.clone(), self.tools.clone())
    }

    /// Run a flow with the configured grants added to the invocation's.
    pub async fn run_flow(
        &self,
        program: Arc<Program>,
        invocation: FlowInvocation,
    ) -> Result<FlowOutcome, RuntimeFault> {
        let executor = self.executor(program);
        executor
            .register_schemas()
            .await
            .map_err(|e| RuntimeFault::store(e, None))?;
        let grants = invocation.grants.union(&self.grants);
        executor.run(invocation.with_grants(grants)).await
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("config", &self.config)
            .field("store", &self.store)
            .finish()
    }
}

/// Options for initializing an [`Application`]
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    /// Config file path (overrides default search)
    pub config_path: Option<PathBuf>,

    /// Store backend (overrides config file and env vars)
    pub store_backend: Option<StoreBackend>,

    /// Database file for the sqlite backend
    pub store_path: Option<PathBuf>,

    /// Default grants (overrides config file and env vars)
    pub capabilities: Option<Vec<String>>,

    /// Tool handlers available to flows
    pub tools: ToolRegistry,
}

/// Builder for constructing InitOptions
#[derive(Debug, Default)]
pub struct InitBuilder {
    options: InitOptions,
}

impl InitBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.config_path = Some(path.into());
        self
    }

    pub fn store_backend(mut self, backend: StoreBackend) -> Self {
        self.options.store_backend = Some(backend);
        self
    }

    pub fn store_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.options.store_path = Some(path.into());
        self
    }

    pub fn capabilities(mut self, capabilities: Vec<String>) -> Self {
        self.options.capabilities = Some(capabilities);
        self
    }

    pub fn tools(mut self, tools: ToolRegistry) -> Self {
        self.options.tools = tools;
        self
    }

    pub async fn init(self) -> Result<Application> {
        initialize(self.options).await
    }
}

/// Load configuration, open the store and build the application.
pub async fn initialize(options: InitOptions) -> Result<Application> {
    let config = Config::builder()
        .config_path(options.config_path)
        .store_backend(options.store_backend)
        .store_path(options.store_path)
        .capabilities(options.capabilities)
        .build()?;
    let store = open_store(&config).await?;
    info!(backend = store.store().backend(), "application initialized");
    Application::new(config, store, Arc::new(options.tools))
}

async fn open_store(config: &Config) -> Result<StoreHandle> {
    match config.store.backend {
        StoreBackend::Memory => Ok(StoreHandle::memory()),
        StoreBackend::Sqlite => {
            let store = match &config.store.path {
                Some(path) => SqliteStore::open(path, config.store.max_connections)
                    .await
                    .with_context(|| format!("Failed to open sqlite store at {}", path.display()))?,
                None => SqliteStore::open_in_memory()
                    .await
                    .context("Failed to open in-memory sqlite store")?,
            };
            Ok(StoreHandle::new(Arc::new(store)))
        }
    }
}
