use std::sync::Arc;

use tokio::net::TcpListener;

use ai_ml_service::{AppConfig, GeonamesStore, ModelRegistry, build_router, init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = Arc::new(AppConfig::from_env()?);
    tracing::info!(?config.listen_addr, "loading model artifacts");

    let registry = Arc::new(ModelRegistry::initialize(config.as_ref()));

    let geonames = match config.geonames_db_path.as_deref() {
        Some(path) => match GeonamesStore::open(path) {
            Ok(store) => Some(Arc::new(store)),
            Err(err) => {
                tracing::warn!(error = %err, "geonames lookups disabled");
                None
            }
        },
        None => None,
    };

    let router = build_router(config.clone(), registry, geonames);

    let listener = TcpListener::bind(config.listen_addr).await?;
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "REST server ready");

    axum::serve(listener, router).await?;

    Ok(())
}
