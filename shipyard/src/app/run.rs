//! Main application run loops

use std::future::Future;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::options::{AppOptions, EdgeOptions, LifecycleOptions};
use crate::app::state::{AppState, EdgeAppState};
use crate::errors::ControlError;
use crate::routing::edge;
use crate::server::serve::{app, serve};
use crate::workers::sweeper::{self, Sweep};

/// Run the origin control plane
pub async fn run(
    options: AppOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControlError> {
    info!("Initializing Shipyard control plane...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start control plane: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

/// Run the edge proxy
pub async fn run_edge(
    options: EdgeOptions,
    shutdown_signal: impl Future<Output = ()> + Send + 'static,
) -> Result<(), ControlError> {
    info!("Initializing Shipyard edge...");

    let (shutdown_tx, _shutdown_rx): (broadcast::Sender<()>, _) = broadcast::channel(1);
    let mut shutdown_manager = ShutdownManager::new(shutdown_tx.clone(), options.lifecycle.clone());

    if let Err(e) = init_edge(&options, &shutdown_tx, &mut shutdown_manager).await {
        error!("Failed to start edge: {}", e);
        shutdown_manager.shutdown().await?;
        return Err(e);
    }

    shutdown_signal.await;
    info!("Shutdown signal received, shutting down...");

    drop(shutdown_tx);
    shutdown_manager.shutdown().await
}

// =============================== INITIALIZATION ================================== //

async fn init(
    options: &AppOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ControlError> {
    let app_state = Arc::new(AppState::init(options).await?);
    shutdown_manager.with_app_state(app_state.clone())?;

    init_sweeper_worker(
        options.sweeper.clone(),
        app_state.sweep_targets(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    info!("Initializing HTTP server...");
    let router = app(
        Arc::new(app_state.server_state()),
        app_state.routing.clone(),
        app_state.limiter.clone(),
    );
    let mut shutdown_rx = shutdown_tx.subscribe();
    let server_handle = serve(&options.server, router, async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(server_handle)?;

    Ok(())
}

async fn init_edge(
    options: &EdgeOptions,
    shutdown_tx: &broadcast::Sender<()>,
    shutdown_manager: &mut ShutdownManager,
) -> Result<(), ControlError> {
    let edge_state = EdgeAppState::init(options)?;

    init_sweeper_worker(
        options.sweeper.clone(),
        edge_state.sweep_targets(),
        shutdown_manager,
        shutdown_tx.subscribe(),
    )?;

    let mut shutdown_rx = shutdown_tx.subscribe();
    let server_handle = edge::serve(&options.server, edge_state.edge.clone(), async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;
    shutdown_manager.with_server_handle(server_handle)?;

    Ok(())
}

fn init_sweeper_worker(
    options: sweeper::Options,
    targets: Vec<(&'static str, Arc<dyn Sweep>)>,
    shutdown_manager: &mut ShutdownManager,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ControlError> {
    info!("Initializing sweeper worker...");

    let sweeper_handle = tokio::spawn(async move {
        sweeper::run(
            &options,
            targets,
            tokio::time::sleep,
            Box::pin(async move {
                let _ = shutdown_rx.recv().await;
            }),
        )
        .await;
    });

    shutdown_manager.with_sweeper_worker_handle(sweeper_handle)
}

// ================================= SHUTDOWN ===================================== //

struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    lifecycle_options: LifecycleOptions,
    app_state: Option<Arc<AppState>>,
    server_handle: Option<JoinHandle<Result<(), ControlError>>>,
    sweeper_worker_handle: Option<JoinHandle<()>>,
}

impl ShutdownManager {
    pub fn new(shutdown_tx: broadcast::Sender<()>, lifecycle_options: LifecycleOptions) -> Self {
        Self {
            shutdown_tx,
            lifecycle_options,
            app_state: None,
            server_handle: None,
            sweeper_worker_handle: None,
        }
    }

    pub fn with_app_state(&mut self, state: Arc<AppState>) -> Result<(), ControlError> {
        if self.app_state.is_some() {
            return Err(ControlError::ShutdownError("app_state already set".to_string()));
        }
        self.app_state = Some(state);
        Ok(())
    }

    pub fn with_sweeper_worker_handle(&mut self, handle: JoinHandle<()>) -> Result<(), ControlError> {
        if self.sweeper_worker_handle.is_some() {
            return Err(ControlError::ShutdownError("sweeper_handle already set".to_string()));
        }
        self.sweeper_worker_handle = Some(handle);
        Ok(())
    }

    pub fn with_server_handle(
        &mut self,
        handle: JoinHandle<Result<(), ControlError>>,
    ) -> Result<(), ControlError> {
        if self.server_handle.is_some() {
            return Err(ControlError::ShutdownError("server_handle already set".to_string()));
        }
        self.server_handle = Some(handle);
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ControlError> {
        let _ = self.shutdown_tx.send(());

        let max_delay = self.lifecycle_options.max_shutdown_delay;
        match tokio::time::timeout(max_delay, self.shutdown_impl()).await {
            Ok(result) => result,
            Err(_) => {
                error!("Shutdown timed out after {:?}, forcing shutdown...", max_delay);
                std::process::exit(1);
            }
        }
    }

    async fn shutdown_impl(&mut self) -> Result<(), ControlError> {
        info!("Shutting down Shipyard...");

        // 1. Sweeper worker
        if let Some(handle) = self.sweeper_worker_handle.take() {
            handle.await.map_err(|e| ControlError::ShutdownError(e.to_string()))?;
        }

        // 2. HTTP server, stops accepting and finishes in-flight requests
        if let Some(handle) = self.server_handle.take() {
            handle.await.map_err(|e| ControlError::ShutdownError(e.to_string()))??;
        }

        // 3. Running deployments, bounded below the overall shutdown timeout
        if let Some(app_state) = self.app_state.take() {
            let drain = self.lifecycle_options.max_shutdown_delay.mul_f32(0.8);
            app_state.shutdown(drain).await?;
        }

        info!("Shutdown complete");
        Ok(())
    }
}
