use axum::Router;
use dotenvy::dotenv;
use std::net::SocketAddr;
use stories_api_kernel::config::AppConfig;
use stories_api_kernel::kernel::{build_app, Plugin};
use stories_api_kernel::plugins::communication::stories::{StoriesPlugin, StoryRepository};
use stories_api_kernel::plugins::health::HealthPlugin;
use stories_api_kernel::plugins::metrics::MetricsPlugin;
use stories_api_kernel::store::connect_store;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AppConfig::from_env()?;
    let store = connect_store(&config.store).await?;

    // instantiate plugins
    let repo = StoryRepository::new(store.clone(), config.collection.clone(), config.story_ttl);
    let metrics_plugin = MetricsPlugin::new()?;
    let plugins_vec: Vec<Box<dyn Plugin>> = vec![
        Box::new(HealthPlugin::new(store.clone())),
        Box::new(StoriesPlugin::new(repo)),
    ];

    let plugin_names: Vec<&'static str> = plugins_vec.iter().map(|p| p.name()).collect();
    tracing::info!("mounting plugins: {:?}", plugin_names);

    let mut app: Router = build_app(&plugins_vec, Some(metrics_plugin.clone())).await;

    // exposed outside build_app so scrapes are not counted
    app = app.nest("/metrics", metrics_plugin.router());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(
        collection = %config.collection,
        ttl_hours = config.story_ttl.as_secs() / 3600,
        "listening on {}",
        addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            for p in plugins_vec.iter() {
                p.on_shutdown().await;
            }
        })
        .await?;

    Ok(())
}
