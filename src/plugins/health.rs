use crate::kernel::Plugin;
use crate::store::DynStore;
use axum::http::StatusCode;
use axum::{routing::get, Extension, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct Health {
    status: &'static str,
    store: &'static str,
}

pub struct HealthPlugin {
    store: DynStore,
}

impl HealthPlugin {
    pub fn new(store: DynStore) -> Self {
        Self { store }
    }
}

#[axum::debug_handler]
async fn health_handler(Extension(store): Extension<DynStore>) -> (StatusCode, Json<Health>) {
    match store.ping().await {
        Ok(()) => (StatusCode::OK, Json(Health { status: "ok", store: store.backend() })),
        Err(e) => {
            tracing::warn!("store ping failed: {:#}", e);
            (StatusCode::SERVICE_UNAVAILABLE, Json(Health { status: "unavailable", store: store.backend() }))
        }
    }
}

#[async_trait::async_trait]
impl Plugin for HealthPlugin {
    async fn router(&self) -> Router {
        Router::new()
            .route("/", get(health_handler))
            .layer(Extension(self.store.clone()))
    }

    fn name(&self) -> &'static str {
        "health"
    }

    async fn on_start(&self) {
        tracing::info!(store = self.store.backend(), "health plugin started");
    }
}
