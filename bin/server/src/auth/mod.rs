//! Authentication module for the wicket server.
//!
//! This module wires the flow core to its production collaborators:
//! - `oidc`: the openidconnect-backed provider client and assertion verifier
//! - `db`: Postgres-backed stores for states, token records, previous-login
//!   backups, accounts, sessions, and staged matches
//! - `routes`: the flow endpoint, the connect/verify entry points, and
//!   logout

pub mod db;
pub mod oidc;
pub mod routes;

pub use oidc::{ProviderClient, ProviderConfig, ProviderError, ProviderVerifier};
pub use routes::{connect, flow_endpoint, logout, verify};

use sqlx::PgPool;
use std::sync::Arc;
use wicket_access::{AuthorizationCodeFlow, FlowConfig};

use crate::config::SessionConfig;
use db::{
    PgAccountStore, PgPendingMatchFinder, PgPrevLoginStore, PgStateStore, PgTokenRecordStore,
    TracingEventSink,
};

/// Shared application state.
pub struct AppState {
    /// Database connection pool.
    pub db_pool: PgPool,
    /// The login flow over its production collaborators.
    pub flow: AuthorizationCodeFlow,
    /// Session configuration.
    pub session_config: SessionConfig,
}

impl AppState {
    /// Creates the application state, wiring the flow to the Postgres
    /// stores and the discovered provider client.
    pub fn new(
        db_pool: PgPool,
        provider: ProviderClient,
        flow_config: FlowConfig,
        session_config: SessionConfig,
    ) -> Self {
        let verifier = Arc::new(provider.verifier());
        let flow = AuthorizationCodeFlow::new(
            flow_config,
            Arc::new(provider),
            verifier,
            Arc::new(PgStateStore::new(db_pool.clone())),
            Arc::new(PgTokenRecordStore::new(db_pool.clone())),
            Arc::new(PgPrevLoginStore::new(db_pool.clone())),
            Arc::new(PgAccountStore::new(db_pool.clone())),
            Arc::new(TracingEventSink),
            Arc::new(PgPendingMatchFinder::new(db_pool.clone())),
        );
        Self {
            db_pool,
            flow,
            session_config,
        }
    }
}
