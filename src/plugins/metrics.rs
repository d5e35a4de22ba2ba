use axum::http::StatusCode;
use axum::{routing::get, Router};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

#[derive(Clone)]
pub struct MetricsPlugin {
    registry: Arc<Registry>,
    pub request_counter: Arc<IntCounterVec>,
    pub request_duration: Arc<HistogramVec>,
}

impl MetricsPlugin {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();
        let counter = IntCounterVec::new(
            Opts::new("requests_total", "Total HTTP requests"),
            &["method", "plugin", "status"],
        )?;
        registry.register(Box::new(counter.clone()))?;

        let histogram = HistogramVec::new(
            HistogramOpts::new("request_duration_seconds", "HTTP request latencies in seconds"),
            &["method", "plugin"],
        )?;
        registry.register(Box::new(histogram.clone()))?;

        #[cfg(target_os = "linux")]
        {
            let collector = prometheus::process_collector::ProcessCollector::for_self();
            registry.register(Box::new(collector)).ok();
        }

        Ok(MetricsPlugin {
            registry: Arc::new(registry),
            request_counter: Arc::new(counter),
            request_duration: Arc::new(histogram),
        })
    }

    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Exposition endpoint. Mounted outside `build_app` so scrapes are not counted.
    pub fn router(&self) -> Router {
        let metrics = self.clone();
        Router::new().route(
            "/",
            get(move || {
                let rendered = metrics.render();
                async move {
                    match rendered {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            tracing::error!("failed to render metrics: {:#}", e);
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        )
    }
}
