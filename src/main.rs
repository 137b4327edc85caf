use tracing_subscriber::EnvFilter;

use vector_rebuild::api;
use vector_rebuild::config::Config;
use vector_rebuild::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();
    tracing::info!("Data directory: {}", config.data_dir.display());
    tracing::info!(
        "Embedding provider: {} ({}, model {})",
        config.llm.provider,
        config.llm.base_url,
        config.llm.embedding_model
    );
    if config.auth.secret_key.is_empty() {
        tracing::warn!("SECRET_KEY is not set; every admin request will be rejected");
    }

    let state = AppState::new(config.clone())?;
    tracing::info!(
        "Vector store holds {} entries",
        state.vectors.entry_count()
    );

    let app = api::router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
