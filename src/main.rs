use actix_web::{web, App, HttpServer};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

use selector_crawler::api::configure_routes;
use selector_crawler::config::AppConfig;
use selector_crawler::logging::{init_logging, LogContext, RequestIdGenerator};
use selector_crawler::storage::SqliteStore;
use selector_crawler::CrawlerService;

#[actix_rt::main]
async fn main() -> Result<()> {
    let config = AppConfig::load().await?;
    init_logging(&config.logging)?;

    let context = LogContext::new("main", "startup")
        .with_request_id(RequestIdGenerator::generate())
        .with_string_field("version", env!("CARGO_PKG_VERSION"));
    selector_crawler::log_info!(context, "Selector Crawler API starting up");

    let store = Arc::new(SqliteStore::from_config(&config.storage).await?);
    info!("Store opened at {}", config.storage.path.display());

    let bind = (config.api.host.clone(), config.api.port);
    let json_limit = config.api.max_request_size_mb * 1024 * 1024;

    let service = Arc::new(CrawlerService::from_config(config, store.clone(), store).await?);
    let data = web::Data::new(service.clone());

    info!("Listening on {}:{}", bind.0, bind.1);
    HttpServer::new(move || {
        App::new()
            .app_data(data.clone())
            .app_data(web::JsonConfig::default().limit(json_limit))
            .configure(configure_routes)
    })
    .bind(bind)?
    .run()
    .await?;

    if let Some(pool) = service.fetcher().render_pool() {
        pool.shutdown().await;
    }
    info!("Selector Crawler API shutting down");
    Ok(())
}
