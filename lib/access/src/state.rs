//! Anti-replay state records for outbound authorization requests.
//!
//! Every authorization request registers an [`AuthState`] keyed by an
//! unguessable state token. The callback consumes the record through
//! [`StateStore::take`], which must be a single atomic fetch-and-delete:
//! splitting it into a read and a separate delete opens a replay window in
//! which two concurrent callbacks could both be accepted for one token.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::LoginFlowError;

/// Structured metadata stored alongside a state token.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMetadata {
    /// Where to send the browser after the flow completes, overriding the
    /// configured default.
    #[serde(default)]
    pub redirect: Option<String>,
    /// Link without switching the account's primary authentication method.
    #[serde(default)]
    pub connect_only: bool,
    /// Provider- or caller-specific extension entries.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl StateMetadata {
    /// Parses persisted metadata.
    ///
    /// A malformed payload degrades to the default (empty) metadata instead
    /// of failing the flow; this is the only tolerated anomaly in callback
    /// processing.
    #[must_use]
    pub fn from_json(raw: &str) -> Self {
        match serde_json::from_str(raw) {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::debug!(%error, "malformed state metadata, using empty metadata");
                Self::default()
            }
        }
    }
}

/// A registered authorization request awaiting its callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthState {
    /// Opaque anti-CSRF correlation token, echoed back by the provider.
    pub state: String,
    /// Opaque anti-replay value embedded in the identity assertion.
    pub nonce: String,
    /// Metadata restored when the callback arrives.
    pub metadata: StateMetadata,
    /// When the request was registered.
    pub created_at: DateTime<Utc>,
}

impl AuthState {
    /// Creates a record registered now.
    #[must_use]
    pub fn new(state: String, nonce: String, metadata: StateMetadata) -> Self {
        Self {
            state,
            nonce,
            metadata,
            created_at: Utc::now(),
        }
    }
}

/// Persistence for authorization request states.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Registers a new state record. The state value is unique.
    async fn create(&self, record: AuthState) -> Result<(), LoginFlowError>;

    /// Atomically fetches and deletes the record for a state value.
    ///
    /// Returns `None` when no record exists - including when a previous
    /// callback already consumed it. Lookup and deletion are one operation.
    async fn take(&self, state: &str) -> Result<Option<AuthState>, LoginFlowError>;

    /// Deletes unconsumed records older than `max_age`. Returns how many
    /// were removed.
    async fn delete_expired(&self, max_age: Duration) -> Result<u64, LoginFlowError>;
}
