pub mod config;
pub mod error;
pub mod evaluation;
pub mod geonames;
pub mod model;
pub mod server;
pub mod training;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub use config::AppConfig;
pub use error::ServiceError;
pub use geonames::GeonamesStore;
pub use model::{LogisticRegression, ModelRegistry};
pub use server::build_router;

/// Installs the global subscriber once. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,hyper=warn,axum::rejection=trace".into());
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
