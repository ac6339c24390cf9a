use std::error::Error;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use carestore::api::RestApi;
use carestore::config::{config_path, load_config, Backend, Config, LoggingConfig};
use carestore::service::SignupRequest;
use carestore::{CareService, FileStore, KvStore, MemoryIdentityProvider, MemoryStore, SystemClock};

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.filter));
    if logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn seed_users(service: &CareService, config: &Config) {
    for seed in &config.seed_users {
        let request = SignupRequest {
            email: seed.email.clone(),
            password: seed.password.clone(),
            name: seed.name.clone(),
            age: seed.age,
            diseases: seed.diseases.clone(),
        };
        match service.signup(request, seed.token.clone()).await {
            Ok(user) => info!(email = %user.email, user = %user.id, "seeded user"),
            Err(e) => warn!(email = %seed.email, error = %e, "failed to seed user"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let path = config_path();
    let config = load_config(&path)?;
    init_tracing(&config.logging);
    info!(config = %path.display(), "starting carestore");

    let file_store = match (config.storage.backend, &config.storage.path) {
        (Backend::File, Some(dir)) => Some(Arc::new(FileStore::open(dir)?)),
        _ => None,
    };
    let store: Arc<dyn KvStore> = match &file_store {
        Some(file_store) => Arc::clone(file_store) as Arc<dyn KvStore>,
        None => Arc::new(MemoryStore::new()),
    };
    info!(backend = store.backend_tag(), "storage ready");

    let identity = Arc::new(MemoryIdentityProvider::with_static_tokens(config.auth.tokens.clone()));
    let service = Arc::new(CareService::new(
        store,
        identity,
        Arc::new(SystemClock),
        config.clock.offset()?,
    ));
    seed_users(&service, &config).await;

    let api = RestApi::new(Arc::clone(&service));
    let addr = config.api.addr();

    // Create a channel for shutdown signal
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let (bound, server) = warp::serve(api.routes()).try_bind_with_graceful_shutdown(addr, async move {
        shutdown_rx.await.ok();
        info!("shutting down server");
    })?;
    info!(addr = %bound, "listening");

    let server_handle = tokio::spawn(server);

    signal::ctrl_c().await?;
    info!("ctrl-c received, starting graceful shutdown");
    shutdown_tx.send(()).ok();
    server_handle.await?;

    if let Some(file_store) = file_store {
        match file_store.compact() {
            Ok(()) => info!("store compacted"),
            Err(e) => warn!(error = %e, "failed to compact store on shutdown"),
        }
    }

    info!("shutdown complete");
    Ok(())
}
