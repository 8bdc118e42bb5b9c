use anyhow::{Context, Result};
use tapline::config::{LoggingSettings, Settings};
use tapline::Application;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new().context("failed to load settings")?;
    init_tracing(&settings.logging);

    info!("Starting Tapline proxy");

    let app = Application::new(settings)
        .await
        .context("failed to start application")?;
    app.run().await?;

    Ok(())
}

/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(logging: &LoggingSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    if logging.format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .pretty()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    }
}
