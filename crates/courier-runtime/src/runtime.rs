//! Runtime orchestration.
//!
//! [`CourierRuntime`] wires the store, the inbound pipeline, the connection
//! directory, the queue dispatcher and the webhook server together, then
//! runs until Ctrl+C or SIGTERM.
//!
//! ```rust,ignore
//! use courier_runtime::CourierRuntime;
//!
//! let mut runtime = CourierRuntime::builder()
//!     .config_file("courier.toml")
//!     .profile("production")
//!     .build()?;
//!
//! runtime.register_channel::<SlackChannel>();
//! runtime.register_channel::<XmppChannel>();
//! runtime.run().await?;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use courier_core::{ConfigurableChannel, MemoryStore, Store, TemplateRenderer, TokenVerifier};
use courier_framework::{
    EventSource, IncomingProcessor, JwtVerifier, RuleMatcher, TeraRenderer, builtin_sources,
};

use crate::config::{ConfigError, ConfigLoader, CourierConfig, validate_config};
use crate::connections::{ChannelFactory, ConnectionManager, channel_factory};
use crate::dispatcher::QueueDispatcher;
use crate::error::{RuntimeError, RuntimeResult};
use crate::logging;
use crate::webhook::{self, WebhookState};

/// The broker before it starts: configuration plus registered parts.
pub struct CourierRuntime {
    config: CourierConfig,
    store: Arc<dyn Store>,
    verifier: Arc<dyn TokenVerifier>,
    renderer: Arc<dyn TemplateRenderer>,
    sources: Vec<Arc<dyn EventSource>>,
    channels: Vec<(&'static str, ChannelFactory)>,
}

impl CourierRuntime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder::new()
    }

    /// Creates a runtime from configuration.
    ///
    /// Initializes logging, seeds an in-memory store from
    /// `store.seed_file` when set, and registers the built-in sources.
    pub fn from_config(config: CourierConfig) -> RuntimeResult<Self> {
        logging::init_from_config(&config.logging);

        let store = MemoryStore::new();
        if let Some(seed) = &config.store.seed_file {
            store.load_seed_file(seed)?;
            info!(path = %seed.display(), "Store seeded");
        }

        let verifier = JwtVerifier::new(&config.auth.token_secret, config.auth.verify_expiry);

        info!(
            log_level = %config.logging.level,
            server = config.server.enabled,
            dispatcher = config.dispatcher.enabled,
            "Runtime initialized from configuration"
        );

        Ok(Self {
            config,
            store: Arc::new(store),
            verifier: Arc::new(verifier),
            renderer: Arc::new(TeraRenderer::new()),
            sources: builtin_sources(),
            channels: Vec::new(),
        })
    }

    pub fn config(&self) -> &CourierConfig {
        &self.config
    }

    pub fn store(&self) -> Arc<dyn Store> {
        Arc::clone(&self.store)
    }

    /// Replaces the bundled in-memory store.
    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = store;
        self
    }

    pub fn with_verifier(mut self, verifier: Arc<dyn TokenVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn TemplateRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Adds an inbound source, replacing a built-in one of the same kind.
    pub fn register_source(&mut self, source: Arc<dyn EventSource>) -> &mut Self {
        self.sources.push(source);
        self
    }

    /// Registers an outbound channel type.
    pub fn register_channel<C>(&mut self) -> &mut Self
    where
        C: ConfigurableChannel + 'static,
    {
        self.register_channel_factory(C::channel_type(), channel_factory::<C>())
    }

    pub fn register_channel_factory(
        &mut self,
        kind: &'static str,
        factory: ChannelFactory,
    ) -> &mut Self {
        self.channels.push((kind, factory));
        self
    }

    /// Starts every component and returns a handle to the running broker.
    pub async fn start(self) -> RuntimeResult<RunningRuntime> {
        let Self {
            config,
            store,
            verifier,
            renderer,
            sources,
            channels,
        } = self;

        let mut manager = ConnectionManager::new(Arc::clone(&store), config.channels.to_context());
        for (kind, factory) in channels {
            manager.register_factory(kind, factory);
        }
        let connections = Arc::new(manager);
        connections.restart().await?;

        let matcher = RuleMatcher::new(Arc::clone(&store), renderer);
        let processor = Arc::new(
            IncomingProcessor::new(Arc::clone(&store), verifier, matcher)
                .with_retention(chrono::Duration::days(i64::from(
                    config.retention.incoming_log_days,
                )))
                .with_sources(sources),
        );

        let dispatcher = Arc::new(QueueDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&connections),
            config.dispatcher.poll_interval(),
        ));

        let shutdown = CancellationToken::new();
        let mut tasks = Vec::new();

        if config.dispatcher.enabled {
            tasks.push(tokio::spawn(
                Arc::clone(&dispatcher).run(shutdown.child_token()),
            ));
        } else {
            info!("Queue dispatcher disabled");
        }

        let mut local_addr = None;
        if config.server.enabled {
            let bind = (config.server.host.as_str(), config.server.port);
            let listener = match TcpListener::bind(bind).await {
                Ok(listener) => listener,
                Err(e) => {
                    shutdown.cancel();
                    connections.shutdown().await;
                    return Err(RuntimeError::Server(e));
                }
            };
            local_addr = listener.local_addr().ok();

            let router = webhook::router(WebhookState {
                processor: Arc::clone(&processor),
                connections: Arc::clone(&connections),
            });
            let token = shutdown.child_token();
            tasks.push(tokio::spawn(async move {
                if let Err(e) = webhook::serve(listener, router, token).await {
                    error!(error = %e, "Webhook server failed");
                }
            }));
        } else {
            info!("Webhook server disabled");
        }

        info!("Courier runtime started");
        Ok(RunningRuntime {
            connections,
            processor,
            dispatcher,
            local_addr,
            shutdown,
            tasks,
        })
    }

    /// Runs until Ctrl+C or SIGTERM.
    pub async fn run(self) -> RuntimeResult<()> {
        let running = self.start().await?;
        info!("Courier is now running. Press Ctrl+C to stop.");
        wait_for_shutdown().await;
        running.stop().await;
        Ok(())
    }

    /// Runs until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> RuntimeResult<()>
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await?;
        shutdown.await;
        running.stop().await;
        Ok(())
    }
}

// =============================================================================
// RunningRuntime
// =============================================================================

/// Handles to a started broker.
pub struct RunningRuntime {
    connections: Arc<ConnectionManager>,
    processor: Arc<IncomingProcessor>,
    dispatcher: Arc<QueueDispatcher>,
    local_addr: Option<SocketAddr>,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningRuntime {
    pub fn connections(&self) -> &Arc<ConnectionManager> {
        &self.connections
    }

    pub fn processor(&self) -> &Arc<IncomingProcessor> {
        &self.processor
    }

    pub fn dispatcher(&self) -> &Arc<QueueDispatcher> {
        &self.dispatcher
    }

    /// The bound webhook address, when the server is enabled.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Stops the server and the dispatcher, then closes every channel.
    pub async fn stop(self) {
        info!("Stopping Courier runtime");
        self.shutdown.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Runtime task ended abnormally");
            }
        }
        self.connections.shutdown().await;
        info!("Courier runtime stopped");
    }
}

/// Waits for Ctrl+C or, on unix, SIGTERM.
async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = signal::ctrl_c() => info!("Received Ctrl+C, shutting down"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
                }
                return;
            }
            Err(e) => warn!(error = %e, "Failed to register SIGTERM handler"),
        }
    }

    match signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
    }
}

// =============================================================================
// RuntimeBuilder
// =============================================================================

/// Loads and validates configuration, then creates a [`CourierRuntime`].
pub struct RuntimeBuilder {
    config_loader: ConfigLoader,
    seed_file: Option<std::path::PathBuf>,
}

impl RuntimeBuilder {
    pub fn new() -> Self {
        Self {
            config_loader: ConfigLoader::new(),
            seed_file: None,
        }
    }

    pub fn config_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.file(path);
        self
    }

    pub fn profile(mut self, profile: impl AsRef<str>) -> Self {
        self.config_loader = self.config_loader.profile(profile);
        self
    }

    pub fn search_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_loader = self.config_loader.search_path(path);
        self
    }

    pub fn without_env(mut self) -> Self {
        self.config_loader = self.config_loader.without_env();
        self
    }

    /// Overrides one dotted configuration key.
    pub fn set<T: serde::Serialize>(mut self, key: &str, value: T) -> Self {
        self.config_loader = self.config_loader.set(key, value);
        self
    }

    /// Seeds the store from this file, taking precedence over `store.seed_file`.
    pub fn seed_file<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.seed_file = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn load_config(self) -> Result<CourierConfig, ConfigError> {
        let mut config = self.config_loader.load()?;
        if let Some(seed) = self.seed_file {
            config.store.seed_file = Some(seed);
        }
        validate_config(&config)?;
        Ok(config)
    }

    pub fn build(self) -> RuntimeResult<CourierRuntime> {
        let config = self.load_config()?;
        CourierRuntime::from_config(config)
    }
}

impl Default for RuntimeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
