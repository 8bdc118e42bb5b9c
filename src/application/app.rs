use crate::config::{LogSinkKind, LogSinkSettings, Settings};
use crate::interaction::logger::InteractionLogger;
use crate::interaction::sink::{DirectorySink, InteractionSink, JsonlFileSink, NullSink};
use crate::proxy::ProxyService;
use crate::Result;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{error, info, instrument};

/// Main application struct that coordinates all components
pub struct Application {
    listener: TcpListener,
    router: Router,
    logger: InteractionLogger,
    writer: JoinHandle<()>,
}

impl Application {
    /// Validate settings, open the interaction log, and bind the listener.
    #[instrument(skip_all)]
    pub async fn new(settings: Settings) -> Result<Self> {
        let proxy_config = settings.proxy_config()?;
        let sink = open_sink(&settings.log_sink).await?;
        let (logger, writer) = InteractionLogger::spawn(sink);

        let router = ProxyService::new(proxy_config, logger.clone()).into_router();
        let listener = TcpListener::bind(settings.bind_address()).await?;

        info!(
            address = %listener.local_addr()?,
            upstream = %settings.upstream.base_url,
            sink = ?settings.log_sink.kind,
            "Tapline proxy ready"
        );

        Ok(Self {
            listener,
            router,
            logger,
            writer,
        })
    }

    /// Address actually bound, useful when the configured port is 0
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until Ctrl-C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Serve until `shutdown` resolves, then drain the interaction log.
    #[instrument(skip_all)]
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let Self {
            listener,
            router,
            logger,
            writer,
        } = self;

        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await?;

        info!("Server stopped, draining interaction log");
        logger.shutdown().await;
        if let Err(e) = writer.await {
            error!(error = %e, "Interaction log writer terminated abnormally");
        }

        Ok(())
    }
}

async fn open_sink(settings: &LogSinkSettings) -> Result<Arc<dyn InteractionSink>> {
    let sink: Arc<dyn InteractionSink> = match settings.kind {
        LogSinkKind::Jsonl => Arc::new(JsonlFileSink::open(settings.path.clone()).await?),
        LogSinkKind::Directory => Arc::new(DirectorySink::open(settings.path.clone()).await?),
        LogSinkKind::Disabled => Arc::new(NullSink),
    };
    Ok(sink)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received SIGINT (Ctrl+C), initiating graceful shutdown"),
        () = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
