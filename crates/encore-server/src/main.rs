use std::sync::Arc;

use tracing::info;

use encore_db::Database;
use encore_gateway::Chat;
use encore_gateway::auth::JwtAuthenticator;
use encore_server::build_app;
use encore_server::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "encore=debug,tower_http=debug".into()),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(Database::open(&config.db_path, config.store.clone())?);

    let authenticator = Arc::new(JwtAuthenticator::new(&config.jwt_secret));
    let app = build_app(Chat::new(db, authenticator));

    let addr = config.addr()?;
    info!("Encore server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
