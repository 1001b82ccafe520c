use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tower::ServiceBuilder;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use keymint::auth::TokenKeys;
use keymint::config::Config;
use keymint::db::{self, queries, AppState};
use keymint::payments::{MockGateway, PaymentGateway, RazorpayClient};

#[derive(Parser, Debug)]
#[command(name = "keymint", about = "License-key issuance and reseller management backend")]
struct Cli {
    /// Override the listen host
    #[arg(long)]
    host: Option<String>,

    /// Override the listen port
    #[arg(long)]
    port: Option<u16>,

    /// Override the database path
    #[arg(long)]
    database: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "keymint=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(database) = cli.database {
        config.database_path = database;
    }

    tracing::info!("Starting keymint v{}", env!("CARGO_PKG_VERSION"));

    let pool = db::create_pool(&config.database_path)?;

    if config.audit_log_retention_days > 0 {
        let conn = pool.get()?;
        let purged = queries::purge_old_audit_logs(&conn, config.audit_log_retention_days)?;
        if purged > 0 {
            tracing::info!("Purged {} expired audit log entries", purged);
        }
    }

    // Gateway selection happens exactly once, here. Handlers only ever see
    // the trait object.
    let gateway: Arc<dyn PaymentGateway> = match (
        config.dev_mode,
        &config.razorpay_key_id,
        &config.razorpay_key_secret,
    ) {
        (false, Some(key_id), Some(key_secret)) => {
            tracing::info!("Payment gateway: razorpay");
            Arc::new(RazorpayClient::new(
                key_id.clone(),
                key_secret.clone(),
                config.razorpay_webhook_secret.clone(),
            ))
        }
        _ => {
            tracing::warn!("Payment gateway: mock (dev mode or missing Razorpay credentials)");
            Arc::new(MockGateway::default())
        }
    };

    let state = AppState {
        db: pool,
        tokens: TokenKeys::new(&config.jwt_secret),
        gateway,
        audit_log_enabled: config.audit_log_enabled,
        premium_price_cents: config.premium_price_cents,
        currency: config.currency.clone(),
    };

    // Rate limiting across the whole API surface.
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(2)
            .burst_size(100)
            .finish()
            .expect("Failed to build rate limiter config"),
    );
    let governor_limiter = governor_conf.limiter().clone();
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            governor_limiter.retain_recent();
        }
    });

    let app = keymint::handlers::router(state.clone())
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(GovernorLayer::new(governor_conf))
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                ),
        )
        .with_state(state);

    let addr = config.addr();
    tracing::info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    // Connect info feeds the per-IP rate limiter key extractor.
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
