use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use chat_stream_server::config::Config;
use chat_stream_server::models::SubscriptionTier;
use chat_stream_server::provider::HttpProvider;
use chat_stream_server::storage::{MemoryStorage, PgStorage, Storage};
use chat_stream_server::{build_state, create_app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,chat_stream_server=debug")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let storage: Arc<dyn Storage> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            let storage = PgStorage::new(pool);
            storage.migrate().await?;
            tracing::info!("connected to postgres");
            Arc::new(storage)
        }
        None => {
            let storage = MemoryStorage::new();
            let user = storage.add_user("dev-token", SubscriptionTier::Enterprise);
            tracing::warn!(
                user_id = %user.id,
                "DATABASE_URL not set; using volatile in-memory storage with dev token 'dev-token'"
            );
            Arc::new(storage)
        }
    };

    let provider = Arc::new(HttpProvider::from_config(&config));
    let port = config.port;
    let state = build_state(config, storage, provider)?;
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    tracing::info!(port, "chat-stream-server listening");
    axum::serve(listener, app).await?;
    Ok(())
}
