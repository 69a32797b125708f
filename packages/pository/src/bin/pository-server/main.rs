use std::{net::SocketAddr, sync::Arc};

use pository::{
    auth::{KeyStore, OidcVerifier},
    config::Config,
    events::{EventBus, INDEX_CHANGED},
    metrics::Metrics,
    server::{self, ServerState},
    storage::Storage,
};
use tokio::signal;
use tracing::{debug, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer as _, filter::LevelFilter, layer::SubscriberExt as _,
    util::SubscriberInitExt as _,
};

#[tokio::main]
async fn main() {
    let config = Arc::new(Config::load().expect("could not load configuration"));
    config
        .ensure_directories()
        .expect("could not create data, log and key store directories");

    // Newline-delimited JSON events to the log file; warnings and errors
    // mirrored to stderr.
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.log_path)
        .expect("could not open log file");
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .json()
                .flatten_event(true)
                .with_writer(Arc::new(log_file))
                .with_filter(
                    EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| EnvFilter::new("info")),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(LevelFilter::ERROR),
        )
        .init();

    if config.tls.enabled {
        warn!("tls.enabled is set; Pository does not terminate TLS itself, front it with a proxy");
    }

    let events = Arc::new(EventBus::new());
    events.on(INDEX_CHANGED, |repo| {
        debug!(repo, "repository index changed");
    });

    let state = ServerState {
        storage: Arc::new(Storage::new(config.data_root.clone(), events.clone())),
        keys: Arc::new(KeyStore::new(
            config.api_keys_path.clone(),
            config.admin_key.clone(),
        )),
        oidc: config
            .oidc_audience
            .clone()
            .map(|audience| Arc::new(OidcVerifier::new(audience))),
        metrics: Arc::new(Metrics::new()),
        events,
        config: config.clone(),
    };
    let app = server::new(state);

    let address = format!("{}:{}", config.bind_address, config.port);
    info!(%address, "starting server");
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .expect("could not bind listen address");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown())
    .await
    .expect("server exited with an error");
}

async fn shutdown() {
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
        .expect("could not install SIGTERM handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = signal::ctrl_c() => {}
    }
}
