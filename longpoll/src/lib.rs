//! Long-poll config delivery.
//!
//! Clients ask for the current payload of a config key. A client that already
//! holds the current payload is parked until its application activates a new
//! generation or its timeout runs out; everyone else is answered right away.

pub mod backend;
pub mod checksums;
pub mod compat;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod generations;
pub mod http_api;
pub mod memory;
pub mod metrics_defs;
pub mod payload;
pub mod protocol;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod types;
pub mod worker_pool;

#[cfg(test)]
mod testutils;

use crate::backend::{ApplicationRegistry, ConfigBackend};
use crate::checksums::ChecksumCache;
use crate::config::Config;
use crate::coordinator::{CoordinatorSettings, RequestCoordinator};
use crate::generations::ApplicationGenerations;
use crate::http_api::LongPollService;
use crate::memory::InMemoryBackend;
use crate::payload::response_factory;
use crate::resolver::RequestResolver;
use shared::admin_service::AdminService;
use shared::http::serve_listener;
use std::io;
use std::sync::Arc;
use tokio::net::TcpListener;

#[derive(thiserror::Error, Debug)]
pub enum LongPollError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] config::ValidationError),
}

/// Wires a coordinator for `config` on top of the given backend.
///
/// Must be called from within a tokio runtime.
pub fn build_coordinator(
    config: &Config,
    backend: Arc<dyn ConfigBackend>,
    applications: Arc<dyn ApplicationRegistry>,
) -> RequestCoordinator {
    let generations = Arc::new(ApplicationGenerations::new());
    let resolver = RequestResolver::new(
        backend,
        applications,
        generations.clone(),
        response_factory(config.compression),
        ChecksumCache::new(
            config.checksum_cache.max_capacity,
            config.checksum_cache.ttl(),
        ),
        config.aggregate_config_names.iter().cloned().collect(),
    );

    RequestCoordinator::new(
        resolver,
        generations,
        CoordinatorSettings {
            workers: config.worker_pool.workers,
            queue_size: config.worker_pool.queue_size,
            max_timeout: config.long_poll.max_timeout(),
        },
    )
}

/// Serves the applications configured inline until ctrl-c, then answers
/// every parked request and returns.
pub async fn run(config: Config) -> Result<(), LongPollError> {
    config.validate()?;

    let backend = Arc::new(InMemoryBackend::from_static(&config.applications));
    let coordinator = Arc::new(build_coordinator(&config, backend.clone(), backend));
    for app in &config.applications {
        coordinator.on_activation(&app.id, app.generation);
    }

    let listener = TcpListener::bind(format!(
        "{}:{}",
        config.listener.host, config.listener.port
    ))
    .await?;
    let admin_listener = TcpListener::bind(format!(
        "{}:{}",
        config.admin_listener.host, config.admin_listener.port
    ))
    .await?;

    let ready = coordinator.clone();
    let status = coordinator.clone();
    let admin_service = AdminService::<_, _, LongPollError>::new(
        move || ready.is_accepting(),
        move || status.status(),
    );

    tracing::info!(
        listener = %format!("{}:{}", config.listener.host, config.listener.port),
        admin = %format!("{}:{}", config.admin_listener.host, config.admin_listener.port),
        applications = config.applications.len(),
        compression = ?config.compression,
        "Config server started"
    );

    let result = tokio::select! {
        result = serve_listener(listener, LongPollService::new(coordinator.clone())) => result,
        result = serve_listener(admin_listener, admin_service) => result,
        signal = tokio::signal::ctrl_c() => signal.map_err(LongPollError::from),
    };

    coordinator.shutdown().await;
    result
}
