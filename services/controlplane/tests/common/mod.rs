#![allow(dead_code)]

use keygate_controlplane::app::{AppState, build_router};
use keygate_controlplane::audit::MemoryAuditSink;
use keygate_controlplane::model::Key;
use keygate_controlplane::rbac::RbacService;
use keygate_controlplane::store::memory::InMemoryStore;
use std::sync::Arc;

pub async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

pub struct TestApp {
    pub router: axum::Router,
    pub store: Arc<InMemoryStore>,
    pub audit: Arc<MemoryAuditSink>,
}

/// Router over a fresh in-memory store seeded with `key_1` in `ws_1` and
/// `key_2` in `ws_2`.
pub async fn test_app() -> TestApp {
    let store = Arc::new(InMemoryStore::new());
    store
        .insert_key(Key::new("ws_1", "key_1", Some("primary".to_string())))
        .await;
    store.insert_key(Key::new("ws_2", "key_2", None)).await;
    let audit = Arc::new(MemoryAuditSink::new());
    let rbac = RbacService::new(store.clone(), store.clone(), audit.clone());
    TestApp {
        router: build_router(AppState { rbac }),
        store,
        audit,
    }
}
