use actix_web::middleware::NormalizePath;
use actix_web::web::Data;
use actix_web::{App, HttpServer, Responder, get};
use anyhow::Context;
use std::sync::Arc;

mod api;
mod attendance;
mod auth;
mod config;
mod db;
mod directory;
mod docs;
mod model;
mod models;
mod routes;
mod store;

use attendance::{AttendanceService, SystemClock};
use config::{Config, StoreBackend};
use db::init_db;
use directory::provision::bootstrap_admin;
use directory::{Directory, EmployeeDirectory, MemoryDirectory, MySqlDirectory};
use routes::RateLimits;
use store::{MemoryStore, MySqlStore, RecordStore};

use tracing::{info, warn};
use tracing_appender::rolling;
use utoipa_swagger_ui::SwaggerUi;

#[get("/")]
async fn index() -> impl Responder {
    "Attendance service"
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;

    // Rolling daily log
    let file_appender = rolling::daily(&config.log_dir, "attendance.log");
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

    info!(backend = ?config.store_backend, "Server starting...");

    let (records, identities): (Arc<dyn RecordStore>, Arc<dyn Directory>) =
        match config.store_backend {
            StoreBackend::Memory => {
                warn!("In-memory backend: attendance is lost on restart");
                (Arc::new(MemoryStore::new()), Arc::new(MemoryDirectory::new()))
            }
            StoreBackend::MySql => {
                let url = config
                    .database_url
                    .as_deref()
                    .context("DATABASE_URL must be set when STORE_BACKEND=mysql")?;
                let pool = init_db(url, config.run_migrations).await?;
                (
                    Arc::new(MySqlStore::new(pool.clone())),
                    Arc::new(MySqlDirectory::new(pool)),
                )
            }
        };

    let service = AttendanceService::new(
        records,
        Arc::new(SystemClock),
        config.retry_policy(),
        config.running_hours_refresh,
    );
    let directory = EmployeeDirectory::new(identities, config.directory_cache_ttl);

    if let (Some(email), Some(password)) = (
        config.bootstrap_admin_email.as_deref(),
        config.bootstrap_admin_password.as_deref(),
    ) {
        let created = bootstrap_admin(&directory, email, password, service.now())
            .await
            .context("failed to bootstrap admin account")?;
        if created {
            info!("Bootstrap admin account created");
        }
    }

    let limits = RateLimits::from_config(&config)?;
    let server_addr = config.server_addr.clone();
    let openapi = docs::api_doc(&config.api_prefix);

    HttpServer::new(move || {
        let routes_config = config.clone();
        let limits = limits.clone();
        App::new()
            .wrap(actix_web::middleware::Logger::default())
            .wrap(NormalizePath::trim())
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}") // ← important: wildcard {_:.*} to match JS/CSS files
                    .url("/api-doc/openapi.json", openapi.clone()),
            )
            .app_data(Data::new(config.clone()))
            .app_data(Data::new(service.clone()))
            .app_data(Data::new(directory.clone()))
            .service(index)
            // Configure auth + protected routes with rate limiting
            .configure(move |cfg| routes::configure(cfg, &routes_config, &limits))
    })
    .bind(server_addr)?
    .run()
    .await?;

    info!("Server stopped");
    Ok(())
}
