//! Keygate control-plane HTTP service entry point.
//!
//! # Purpose
//! Wires configuration, storage, the audit sink, and the HTTP router, then
//! starts the API server alongside the Prometheus listener.
//!
//! # Notes
//! The `build_state` helper keeps wiring testable and minimizes main setup logic.
use anyhow::Context;
use keygate_controlplane::app::{AppState, build_router};
use keygate_controlplane::audit::{AuditSink, TracingAuditSink};
use keygate_controlplane::config::{ControlPlaneConfig, StorageBackend};
use keygate_controlplane::model::Key;
use keygate_controlplane::observability;
use keygate_controlplane::rbac::RbacService;
use keygate_controlplane::store::{
    KeyStore, RbacStore, memory::InMemoryStore, postgres::PostgresStore,
};
use std::future::Future;
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ControlPlaneConfig::from_env_or_yaml().context("control plane config")?;
    run_with_shutdown(config, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await
}

async fn run_with_shutdown<F>(config: ControlPlaneConfig, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let metrics_handle = observability::init_observability("keygate-controlplane")?;
    let state = build_state(config.clone()).await?;
    let backend = state.rbac.store().backend_name();
    let metrics_task = tokio::spawn(observability::serve_metrics(
        metrics_handle,
        config.metrics_bind,
    ));

    let app = build_router(state);

    let addr = config.bind_addr;
    tracing::info!(%addr, backend, "control plane listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tokio::pin!(shutdown);
    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result?;
        }
        _ = &mut shutdown => {}
    }

    metrics_task.abort();
    let _ = metrics_task.await;
    Ok(())
}

async fn build_state(config: ControlPlaneConfig) -> anyhow::Result<AppState> {
    let (store, keys): (Arc<dyn RbacStore>, Arc<dyn KeyStore>) = match config.storage {
        StorageBackend::Memory => {
            let store = Arc::new(InMemoryStore::new());
            for key in &config.memory_keys {
                store
                    .insert_key(Key::new(&key.workspace_id, &key.id, key.name.clone()))
                    .await;
            }
            tracing::info!(keys = config.memory_keys.len(), "memory key registry seeded");
            (store.clone() as Arc<dyn RbacStore>, store as Arc<dyn KeyStore>)
        }
        StorageBackend::Postgres => {
            if !config.memory_keys.is_empty() {
                tracing::warn!("memory_keys is ignored by the postgres backend");
            }
            let pg = config
                .postgres
                .as_ref()
                .context("postgres configuration missing")?;
            let store = Arc::new(
                PostgresStore::connect(pg)
                    .await
                    .context("connect postgres pool")?,
            );
            (store.clone() as Arc<dyn RbacStore>, store as Arc<dyn KeyStore>)
        }
    };
    let audit: Arc<dyn AuditSink> = Arc::new(TracingAuditSink);

    Ok(AppState {
        rbac: RbacService::new(store, keys, audit),
    })
}
