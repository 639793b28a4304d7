mod auth;
mod config;

#[tokio::main]
async fn main() {
    use axum::{Router, routing::get};
    use sqlx::postgres::PgPoolOptions;
    use std::sync::Arc;
    use tower_http::trace::TraceLayer;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    use auth::{AppState, ProviderClient};
    use config::ServerConfig;

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .expect("failed to run migrations");

    let state_max_age = chrono::Duration::minutes(config.flow.state_max_age_minutes());

    // Cleanup stale records on startup
    cleanup(&db_pool, state_max_age).await;

    // Spawn periodic cleanup of expired sessions and unconsumed states
    let cleanup_pool = db_pool.clone();
    let cleanup_interval_secs = config.session.cleanup_interval_seconds;
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(cleanup_interval_secs));
        loop {
            interval.tick().await;
            cleanup(&cleanup_pool, state_max_age).await;
        }
    });

    // Initialize the provider client
    tracing::info!("Discovering identity provider...");
    let provider = ProviderClient::discover(config.provider.clone())
        .await
        .expect("failed to discover identity provider");

    // Create application state
    let app_state = Arc::new(AppState::new(
        db_pool,
        provider,
        config.flow.clone(),
        config.session.clone(),
    ));

    let app = Router::new()
        .route("/auth/oidc", get(auth::flow_endpoint))
        .route("/auth/oidc/connect", get(auth::connect))
        .route("/auth/oidc/verify", get(auth::verify))
        .route("/auth/logout", get(auth::logout))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.listen_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}

/// Deletes expired sessions and unconsumed authorization states.
async fn cleanup(pool: &sqlx::PgPool, state_max_age: chrono::Duration) {
    use wicket_access::StateStore;

    let sessions = auth::db::SessionRepository::new(pool.clone());
    match sessions.delete_expired().await {
        Ok(count) if count > 0 => {
            tracing::debug!(deleted_sessions = count, "cleaned up expired sessions");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "failed to cleanup expired sessions");
        }
    }

    let states = auth::db::PgStateStore::new(pool.clone());
    match states.delete_expired(state_max_age).await {
        Ok(count) if count > 0 => {
            tracing::debug!(deleted_states = count, "cleaned up unconsumed authorization states");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::warn!(error = %e, "failed to cleanup authorization states");
        }
    }
}
