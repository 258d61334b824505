use std::sync::Arc;

use anyhow::Context;
use secrecy::ExposeSecret;

use car_price_bot::bot::{BotDeps, Dispatcher};
use car_price_bot::channels::{ChannelManager, CliChannel, TelegramChannel};
use car_price_bot::collection::{CollectionEngine, FieldTable, SessionStore};
use car_price_bot::config::BotConfig;
use car_price_bot::predictor::HttpPredictor;
use car_price_bot::rating::{RatingLedger, RatingRouteState, rating_routes};
use car_price_bot::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export TELEGRAM_BOT_TOKEN=123456:ABC...   (or CAR_BOT_CLI=1 for a local REPL)");
        std::process::exit(1);
    });

    eprintln!("🚗 Car Price Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Predictor: {}", config.predictor_url);
    eprintln!("   Database: {}", config.db_path.display());
    eprintln!("   Stats API: http://0.0.0.0:{}/api/rating/stats", config.http_port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("Failed to open database at {}", config.db_path.display()))?,
    );
    let ledger = Arc::new(RatingLedger::new(db));

    // ── Prediction service ───────────────────────────────────────────────
    let predictor = Arc::new(
        HttpPredictor::new(&config.predictor_url, config.predictor_timeout)
            .context("Failed to create prediction client")?,
    );

    // ── Collection engine ────────────────────────────────────────────────
    let engine = Arc::new(CollectionEngine::new(
        FieldTable::car_attributes(),
        Arc::new(SessionStore::new()),
    ));

    // ── Reporting HTTP server ────────────────────────────────────────────
    let app = rating_routes(RatingRouteState {
        ledger: Arc::clone(&ledger),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.http_port))
        .await
        .with_context(|| format!("Failed to bind stats server port {}", config.http_port))?;
    tokio::spawn(async move {
        tracing::info!("Stats server started");
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!("Stats server stopped: {e}");
        }
    });

    // ── Channels ─────────────────────────────────────────────────────────
    let mut channels = ChannelManager::new();

    if config.cli_enabled {
        channels.add(Box::new(CliChannel::new()));
        eprintln!("   CLI: enabled (/rate N to rate, /upload PATH to send a file)");
    }

    if let Some(token) = &config.telegram_token {
        eprintln!(
            "   Telegram: enabled (allowed: {})",
            if config.allowed_users.iter().any(|u| u == "*") {
                "everyone".to_string()
            } else {
                config.allowed_users.join(", ")
            }
        );
        channels.add(Box::new(TelegramChannel::new(
            token.expose_secret().to_string(),
            config.allowed_users.clone(),
        )));
    }

    eprintln!("   Channels: {}\n", channels.names().join(", "));

    let deps = BotDeps {
        engine,
        ledger,
        predictor,
        min_price: config.min_price,
        session_idle_timeout: config.session_idle_timeout,
    };

    Dispatcher::new(deps, channels).run().await?;

    Ok(())
}
