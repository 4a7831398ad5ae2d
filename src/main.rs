use std::sync::Arc;

use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use dotenvy::dotenv;

mod api;
mod attendance;
mod auth;
mod config;
mod db;
mod docs;
mod model;
mod models;
mod routes;
mod utils;

use attendance::registry::SessionRegistry;
use attendance::service::AttendanceService;
use attendance::store::{AttendanceStore, InMemoryAttendanceStore, MySqlAttendanceStore};
use config::Config;
use db::init_db;

use crate::docs::ApiDoc;
use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa::OpenApi; // ← needed for ApiDoc::openapi()
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Geo attendance service"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily("logs", "app.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_target(false) // removes module path
        .with_level(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .pretty()
        .init();

    info!("Server starting...");

    let store: Arc<dyn AttendanceStore> = match &config.database_url {
        Some(url) => Arc::new(MySqlAttendanceStore::new(init_db(url).await?)),
        None => {
            warn!("DATABASE_URL not set, attendance is kept in memory only");
            Arc::new(InMemoryAttendanceStore::new())
        }
    };

    if config.demo_mode {
        warn!("DEMO_MODE is on: check-in falls back to the office location when none is reported");
    }

    let anchor = config.anchor();
    info!(
        latitude = anchor.latitude,
        longitude = anchor.longitude,
        radius_meters = anchor.radius_meters,
        "Office geofence loaded"
    );

    let service = Data::new(AttendanceService::new(
        anchor,
        config.attendance_policy(),
        config.location_policy(),
        SessionRegistry::new(config.session_cache_capacity),
        store,
    ));
    let rate_limit = routes::rate_limit(config.rate_protected_per_min)?;

    // Clone values for the closure (avoid move issues)
    let server_addr = config.server_addr.clone();
    let config_data = Data::new(config);

    HttpServer::new(move || {
        let api_prefix = config_data.api_prefix.clone();
        let rate_limit = rate_limit.clone();

        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", ApiDoc::openapi()),
            )
            .app_data(service.clone())
            .app_data(config_data.clone())
            .service(index)
            .configure(move |cfg| routes::configure(cfg, &api_prefix, &rate_limit))
    })
    .bind(server_addr)?
    .run()
    .await?;

    Ok(())
}
