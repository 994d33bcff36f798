//! Dev server lifecycle: prepare, watch, compile and serve until stopped.

use std::path::PathBuf;
use std::sync::Arc;

use axum::Router;
use quire_core::{FsPreparer, SitePreparer};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::address::{Platform, ServerAddress, resolve_host, resolve_port};
use crate::bundle::{BundleConfig, BundleHook};
use crate::compiler::{Compiler, RenderCache};
use crate::coordinator::CoordinatorBuilder;
use crate::error::{DevError, Result};
use crate::hot::HotReloader;
use crate::middleware::MiddlewareChain;
use crate::watcher::subscribe_watchers;

/// Options coming from the command line.
#[derive(Clone, Default)]
pub struct DevOptions {
    pub host: Option<String>,
    /// Raw port value, parsed like the site config `port`.
    pub port: Option<String>,
    /// Open the browser once the server is up.
    pub open: bool,
    /// Applied to the bundle configuration after everything else.
    pub configure_bundle: Option<BundleHook>,
}

pub struct DevServer {
    source_dir: PathBuf,
    options: DevOptions,
    preparer: Arc<dyn SitePreparer>,
    platform: Platform,
}

impl DevServer {
    pub fn new(source_dir: impl Into<PathBuf>, options: DevOptions) -> Self {
        Self {
            source_dir: source_dir.into(),
            options,
            preparer: Arc::new(FsPreparer),
            platform: Platform::current(),
        }
    }

    pub fn with_preparer(mut self, preparer: Arc<dyn SitePreparer>) -> Self {
        self.preparer = preparer;
        self
    }

    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Run the dev server until ctrl-c.
    ///
    /// # Errors
    ///
    /// Fails when the first site preparation fails, when no port can be
    /// found, when watching or the first compile fails, or when binding or
    /// serving fails. Later regeneration and compile failures are only
    /// logged.
    pub async fn run(self) -> Result<()> {
        let source_dir = self.source_dir;

        tracing::info!("Extracting site metadata...");
        let cache = Arc::new(RenderCache::default());
        let flush = Arc::clone(&cache);
        let (metadata_tx, metadata_rx) = mpsc::unbounded_channel();
        let coordinator = CoordinatorBuilder::new(self.preparer, &source_dir)
            .metadata_events(metadata_rx)
            .on_options_updated(move |_| flush.clear())
            .initialize()
            .await?;

        let (content_tx, content_rx) = mpsc::unbounded_channel();
        let _watcher = subscribe_watchers(&source_dir, coordinator.clone(), content_tx)?;

        let model = coordinator.current();
        let config = BundleConfig::from_site(&model);

        let port = match self.options.port {
            Some(port) => resolve_port(Some(&port)).await?,
            None => resolve_port(model.config.port.map(|p| p.to_string()).as_deref()).await?,
        };
        let host = self
            .options
            .host
            .filter(|host| !host.is_empty())
            .or_else(|| model.config.host.clone());
        let address = ServerAddress::new(resolve_host(host.as_deref(), self.platform), port);
        let hot_port = address.hot_port()?;
        let url = address.url(model.base());

        let config = config
            .with_hot_port(hot_port)
            .with_dev_log(url.clone())
            .apply_user_config(
                model.config.configure_bundle.as_ref(),
                &source_dir,
                self.options.configure_bundle.as_ref(),
            );

        let hot = HotReloader::new();
        let compiler = Arc::new(Compiler::new(config, metadata_tx, hot.clone()).with_cache(cache));
        let bundle = compiler.compile_blocking(Arc::clone(&model)).await?;

        let chain = MiddlewareChain::build(&source_dir, model.base(), compiler.store());
        tracing::debug!(
            stages = %chain.stages().iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> "),
            "Middleware"
        );

        let listener = bind(&address.host, address.port).await?;
        let hot_listener = bind(&address.host, hot_port).await?;

        compiler.install(bundle);
        tokio::spawn(Arc::clone(&compiler).run(coordinator.subscribe(), content_rx));

        if self.options.open {
            if let Err(e) = open::that(&url) {
                tracing::warn!("Failed to open browser: {e}");
            }
        }

        tokio::try_join!(
            serve(listener, chain.into_router()),
            serve(hot_listener, hot.router()),
        )?;

        tracing::info!("Dev server stopped");
        Ok(())
    }
}

async fn bind(host: &str, port: u16) -> Result<TcpListener> {
    TcpListener::bind((host, port))
        .await
        .map_err(|source| DevError::Bind {
            addr: format!("{host}:{port}"),
            source,
        })
}

async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(DevError::Serve)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
}
