mod config;
mod heartbeat;
mod platform;
mod relay;
mod sms;
mod source;
mod state;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{Config, BUTTON_ENV_VARS};
use crate::heartbeat::{Heartbeat, HEARTBEAT_CRON};
use crate::platform::telegram::TelegramNotifier;
use crate::relay::{Delivery, Relay, RelayStats, Schedule};
use crate::source::PanelClient;
use crate::state::StateFile;

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn log_startup(config: &Config) {
    info!("{}", "=".repeat(50));
    info!("OTP relay starting");
    info!("{}", "=".repeat(50));
    info!("  Panel: {}", config.panel.url);
    info!("  Chat IDs: {}", config.telegram.chat_ids.join(", "));
    info!("  Check interval: {} seconds", config.relay.check_interval_secs);
    info!("  State file: {}", config.relay.state_file.display());
    info!("  Developer: {}", config.buttons.developer_url);
    info!("  Numbers 1: {}", config.buttons.numbers_url_1);
    info!("  Numbers 2: {}", config.buttons.numbers_url_2);
    info!("  Support 1: {}", config.buttons.support_url_1);
    info!("  Support 2: {}", config.buttons.support_url_2);

    for var in BUTTON_ENV_VARS {
        if std::env::var(var).map(|v| v.trim().is_empty()).unwrap_or(true) {
            warn!("{} not set, using configured value", var);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env may carry RUST_LOG as well as the secrets
    let dotenv = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,otp_relay=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Ok(path) = dotenv {
        info!("Loaded environment from {}", path.display());
    }

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    log_startup(&config);

    let source = PanelClient::new(&config.panel)?;
    let notifier = TelegramNotifier::new(&config.telegram.bot_token)?;
    let stats = Arc::new(RelayStats::default());

    let heartbeat = Heartbeat::new(stats.clone(), HEARTBEAT_CRON).await?;

    let relay = Relay::new(
        source,
        notifier,
        Delivery {
            destinations: config.telegram.chat_ids.clone(),
            buttons: config.buttons.keyboard()?,
            footer: config.relay.footer.clone(),
        },
        StateFile::new(config.relay.state_file.clone()),
        Schedule {
            check_interval: Duration::from_secs(config.relay.check_interval_secs),
            error_backoff: Duration::from_secs(config.relay.error_backoff_secs),
        },
        stats,
    );

    let shutdown = CancellationToken::new();
    let heartbeat = tokio::spawn(heartbeat.run(shutdown.clone()));
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            shutdown_signal().await;
            info!("Shutdown requested, stopping relay");
            shutdown.cancel();
        }
    });

    let result = relay.run(shutdown.clone()).await;
    shutdown.cancel();
    heartbeat.await.context("Heartbeat task panicked")??;

    result
}
