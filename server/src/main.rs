// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use axum::http::{HeaderName, HeaderValue, Method};
use timesheet_server::auth;
use timesheet_server::config::AppConfig;
use timesheet_server::database;
use timesheet_server::routes::{self, AppState};
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    tracing::info!("Starting up the server...");

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let db_pool = match database::establish_connection_pool(&config.database_url).await {
        Ok(pool) => {
            tracing::info!("Database connection was made successfully.");
            pool
        }
        Err(e) => {
            tracing::error!("Failed to connect with the database: {:?}", e);
            std::process::exit(1);
        }
    };

    let state = AppState::new(db_pool);

    if let Some(admin) = &config.bootstrap_admin {
        match auth::bootstrap_admin(state.store.as_ref(), admin, state.clock.now_utc()).await {
            Ok(Some((user, token))) => {
                tracing::info!(
                    "Created administrator {} (id {}). Access token, valid for {} hours: {}",
                    user.email,
                    user.id,
                    auth::SESSION_TTL_HOURS,
                    token
                );
            }
            Ok(None) => tracing::debug!("Users already exist, skipping administrator bootstrap."),
            Err(e) => {
                tracing::error!("Failed to bootstrap the administrator: {:?}", e);
                std::process::exit(1);
            }
        }
    }

    let app_routes = routes::create_router(state);

    // Credentials are allowed, so origins, methods and headers must be explicit.
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::warn!("Ignoring invalid CORS origin {:?}: {}", origin, e);
                None
            }
        })
        .collect();
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static("accept"),
            HeaderName::from_static("authorization"),
        ])
        .allow_origin(origins)
        .allow_credentials(true);

    let app = app_routes.layer(cors); // Apply the CORS layer

    let addr = config.socket_addr();
    tracing::info!("The server listens on http://{}", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Failed to bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
