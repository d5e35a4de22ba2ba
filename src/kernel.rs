use axum::extract::{Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::Router;
use async_trait::async_trait;
use std::time::Instant;
use tracing::info;

use crate::plugins::metrics::MetricsPlugin;

#[async_trait]
pub trait Plugin: Send + Sync {
    async fn router(&self) -> Router;

    fn name(&self) -> &'static str;
    /// Optional lifecycle hook called when the kernel starts.
    async fn on_start(&self) {}
    /// Optional lifecycle hook called on shutdown.
    async fn on_shutdown(&self) {}
}

#[derive(Clone)]
struct RouteMetrics {
    metrics: MetricsPlugin,
    plugin: &'static str,
}

async fn track_requests(State(route): State<RouteMetrics>, req: Request, next: Next) -> Response {
    let method = req.method().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    let status = response.status().as_u16().to_string();
    route
        .metrics
        .request_counter
        .with_label_values(&[method.as_str(), route.plugin, status.as_str()])
        .inc();
    route
        .metrics
        .request_duration
        .with_label_values(&[method.as_str(), route.plugin])
        .observe(started.elapsed().as_secs_f64());
    response
}

/// Builds the application router by mounting each plugin under `/{plugin.name()}`.
/// With `metrics`, every plugin router is instrumented and labelled with the plugin name.
pub async fn build_app(plugins: &[Box<dyn Plugin>], metrics: Option<MetricsPlugin>) -> Router {
    let mut app = Router::new();

    for plugin in plugins.iter() {
        info!("starting plugin {}", plugin.name());
        plugin.on_start().await;
        let mut router = plugin.router().await;
        if let Some(metrics) = &metrics {
            let route = RouteMetrics { metrics: metrics.clone(), plugin: plugin.name() };
            router = router.layer(middleware::from_fn_with_state(route, track_requests));
        }
        // mount plugin under its name to namespace routes
        app = app.nest(&format!("/{}", plugin.name()), router);
    }

    app
}
