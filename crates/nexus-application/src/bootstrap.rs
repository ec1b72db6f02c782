//! Composition root.
//!
//! Loads `config.toml`, opens the state store, builds the shared services and
//! hands back a ready [`SessionRegistry`]. The host supplies the protocol
//! client factory and the sink that carries UI events to its views.

use crate::lifecycle::SessionServices;
use crate::logging::{DiagnosticsLayer, init_tracing};
use crate::preferences::PreferenceService;
use crate::registry::SessionRegistry;
use crate::stored_sessions::StoredSessionService;
use anyhow::Context;
use nexus_core::config::NexusConfig;
use nexus_core::protocol::ProtocolClientFactory;
use nexus_core::stderr::{ErrorClassifier, RegexErrorClassifier};
use nexus_core::store::KeyValueStore;
use nexus_core::ui::UiSink;
use nexus_infrastructure::{
    ConfigService, ConfiguredAgentCatalog, GfmRenderer, JsonFileStore, NexusPaths,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_appender::non_blocking::WorkerGuard;

/// Options for [`start`].
#[derive(Default)]
pub struct StartOptions {
    /// Overrides the platform config directory.
    pub base_dir: Option<PathBuf>,
    /// Installs the global tracing subscriber.
    pub init_logging: bool,
    pub diagnostics: Option<DiagnosticsLayer>,
    /// Replaces the regex stderr classifier.
    pub classifier: Option<Arc<dyn ErrorClassifier>>,
}

/// Everything a host needs after startup.
pub struct NexusRuntime {
    pub config: NexusConfig,
    pub config_service: ConfigService,
    pub registry: Arc<SessionRegistry>,
    pub stored_sessions: Arc<StoredSessionService>,
    pub preferences: Arc<PreferenceService>,
    pub agents: Arc<ConfiguredAgentCatalog>,
    _log_guard: Option<WorkerGuard>,
}

impl NexusRuntime {
    /// Disposes every session. Call before the process exits.
    pub async fn shutdown(&self) {
        self.registry.dispose_all().await;
        tracing::info!("[Nexus] Shut down");
    }
}

/// Builds the runtime.
///
/// # Errors
///
/// Fails when the config directory cannot be resolved, `config.toml` or
/// `state.json` is malformed, or logging cannot be installed.
pub async fn start(
    factory: Arc<dyn ProtocolClientFactory>,
    ui: UiSink,
    options: StartOptions,
) -> anyhow::Result<NexusRuntime> {
    let paths = NexusPaths::new(options.base_dir);
    let config_service = ConfigService::from_paths(&paths)?;
    let config = config_service
        .get_config()
        .await
        .context("failed to load config.toml")?;

    let log_guard = if options.init_logging {
        let logs_dir = paths.logs_dir().ok();
        init_tracing(&config.logging, logs_dir.as_deref(), options.diagnostics)?
    } else {
        None
    };

    let store: Arc<dyn KeyValueStore> = Arc::new(
        JsonFileStore::open_default(&paths)
            .await
            .context("failed to open state store")?,
    );
    let stored_sessions = Arc::new(StoredSessionService::new(
        store.clone(),
        config.orchestrator.max_stored_sessions,
    ));
    let preferences = Arc::new(PreferenceService::new(store));
    let agents = Arc::new(ConfiguredAgentCatalog::new(config.agents.clone()));

    let services = SessionServices {
        factory,
        agents: agents.clone(),
        renderer: Arc::new(GfmRenderer),
        classifier: options
            .classifier
            .unwrap_or_else(|| Arc::new(RegexErrorClassifier)),
        stored_sessions: stored_sessions.clone(),
        preferences: preferences.clone(),
        config: config.orchestrator.clone(),
        ui,
    };
    let registry = SessionRegistry::init(services);

    tracing::info!("[Nexus] Started with state in {:?}", paths.config_dir().ok());
    Ok(NexusRuntime {
        config,
        config_service,
        registry,
        stored_sessions,
        preferences,
        agents,
        _log_guard: log_guard,
    })
}
