//! Chainring Controller
//!
//! The daemon that keeps member nodes of a virtual-network overlay arranged
//! as a self-healing chain or ring.
//!
//! # Architecture
//!
//! ```text
//!  member nodes ──HTTP──> responder (api) ──> durable queues <──┐
//!                                                               │
//!  network controller <──HTTP── topology engine <── refresh loop (service)
//! ```
//!
//! The refresh loop owns the indices. The responder only touches the
//! queues, so the two share nothing but [`chainring_queue::QueueStore`].

pub mod api;
pub mod config;
pub mod error;
pub mod http_client;
pub mod service;

use std::future::IntoFuture;
use std::sync::Arc;

use chainring_queue::QueueStore;
use chainring_topology::{ControllerClient, MemoryController};
use tracing::info;

pub use api::{build_router, ApiState};
pub use config::ControllerConfig;
pub use error::{Error, Result};
pub use http_client::HttpController;
pub use service::{ControllerService, CycleReport, TopologyOp};

/// Build the controller client the configuration asks for.
pub fn connect_controller(config: &ControllerConfig) -> Result<Arc<dyn ControllerClient>> {
    if let Some(id) = config.memory_controller() {
        let id = id?;
        info!("Using in-process controller {}", id);
        return Ok(Arc::new(MemoryController::new(id)));
    }
    info!("Using controller at {}", config.controller_url);
    Ok(Arc::new(HttpController::new(
        &config.controller_url,
        config.auth_token.clone(),
    )?))
}

/// Open the queues and run the responder and the refresh loop until either
/// fails or the process is interrupted.
pub async fn run(config: ControllerConfig) -> Result<()> {
    std::fs::create_dir_all(&config.data_dir)?;
    let store = Arc::new(QueueStore::open(config.queue_path())?);
    let client = connect_controller(&config)?;

    let router = build_router(ApiState {
        store: Arc::clone(&store),
        max_hold: config.max_hold,
    });
    let listener = tokio::net::TcpListener::bind(config.api_addr).await?;
    info!("Responder listening on {}", config.api_addr);

    let service = ControllerService::new(config, store, client);

    tokio::select! {
        served = axum::serve(listener, router).into_future() => served?,
        looped = service.run() => looped?,
        _ = tokio::signal::ctrl_c() => info!("Interrupted, shutting down"),
    }
    Ok(())
}
