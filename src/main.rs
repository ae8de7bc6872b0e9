//! Workspace authorization server - main entry point.
//!
//! Starts the Actix-web server with configured routes and middleware.

use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{App, HttpServer, http::header, web};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use workspace_authz::api;
use workspace_authz::config::{Config, StoreBackend};
use workspace_authz::db::DbPool;
use workspace_authz::middleware::RequestLogger;
use workspace_authz::services::Services;
use workspace_authz::store::{MemoryStore, PostgresStore, VersionedStore};

/// Perform health check (for Docker healthcheck).
fn health_check() -> bool {
    // Simple check - just verify we can load config
    Config::from_env().is_ok()
}

async fn open_store(config: &Config) -> std::io::Result<Arc<dyn VersionedStore>> {
    match config.store {
        StoreBackend::Memory => {
            warn!("Using the in-memory store - all data is lost on restart");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = DbPool::new(config)
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            pool.run_migrations()
                .await
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            info!("Database migrations complete");
            Ok(Arc::new(PostgresStore::new(pool)))
        }
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Check for --health-check flag (used by Docker HEALTHCHECK)
    if std::env::args().any(|arg| arg == "--health-check") {
        dotenvy::dotenv().ok();
        std::process::exit(if health_check() { 0 } else { 1 });
    }

    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration
    let config = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            error!("");
            error!("Please check your environment variables:");
            error!("  - RUST_ENV must be set to 'development' or 'production'");
            error!("  - In production, AUTHZ_STORE=postgres and DATABASE_URL must be set");
            error!("  - In production, values must not match development defaults");
            std::process::exit(1);
        }
    };

    info!("========================================");
    info!("  Workspace Authorization Server");
    info!("  Environment: {}", config.environment);
    info!("  Store: {}", config.store);
    info!("========================================");

    if config.is_development() {
        warn!("Running in DEVELOPMENT mode - do not use in production!");
    }

    let store = open_store(&config).await?;
    let services = Services::with_defaults(store, &config.auth);
    services
        .versions
        .ping()
        .await
        .map_err(|e| std::io::Error::other(e.to_string()))?;
    info!("Store reachable");

    let bind_address = config.bind_address();
    let is_development = config.is_development();
    let api_key_prefix = config.auth.api_key_prefix.clone();

    let worker_count = if is_development {
        info!(
            "Starting server at http://{} (4 workers - development mode)",
            bind_address
        );
        4
    } else {
        let cpus = num_cpus::get();
        info!(
            "Starting server at http://{} ({} workers)",
            bind_address, cpus
        );
        cpus
    };

    // Start HTTP server
    let server = HttpServer::new(move || {
        let cors = if is_development {
            // Permissive CORS for development
            Cors::default()
                .allowed_origin("http://localhost:3000")
                .allowed_origin("http://127.0.0.1:3000")
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        } else {
            // Restrictive CORS for production (same-origin only)
            Cors::default()
                .allowed_methods(vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"])
                .allowed_headers(vec![header::AUTHORIZATION, header::ACCEPT, header::CONTENT_TYPE])
                .max_age(3600)
        };

        App::new()
            // Add CORS middleware (must be before other middleware)
            .wrap(cors)
            .wrap(RequestLogger::new(&api_key_prefix))
            .app_data(web::Data::new(services.clone()))
            .configure(api::configure_routes)
    });

    server
        .workers(worker_count)
        .bind(&bind_address)?
        .run()
        .await
}
