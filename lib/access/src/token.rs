//! Token records binding external identities to local accounts.
//!
//! A [`TokenRecord`] is the persisted link between a provider-issued
//! identity and a local username, together with the most recent token
//! exchange. One live record per external identity: repeat logins rotate
//! the existing record instead of creating a second one, which also leaves
//! an audit trail of the latest exchange.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use wicket_core::{AccountId, TokenRecordId};

use crate::account::AuthMethod;
use crate::error::LoginFlowError;
use crate::provider::TokenSet;

/// The persisted binding between an external identity and a local account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenRecord {
    /// Record ID.
    pub id: TokenRecordId,
    /// The provider's stable unique identifier for the person.
    pub external_id: String,
    /// The bound local username.
    pub username: String,
    /// The raw authorization code of the most recent exchange.
    pub auth_code: String,
    /// Access token from the most recent exchange.
    pub access_token: String,
    /// Refresh token from the most recent exchange, if issued.
    pub refresh_token: Option<String>,
    /// Raw identity assertion from the most recent exchange.
    pub id_token: String,
    /// When the record was last created or rotated.
    pub updated_at: DateTime<Utc>,
}

/// Backup of an account's authentication method taken before its first
/// switch to the external provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrevLoginRecord {
    /// The account whose method was switched.
    pub account_id: AccountId,
    /// The method in effect before the switch.
    pub method: AuthMethod,
    /// Reference to the credential in effect before the switch.
    pub credential: Option<String>,
}

/// Persistence for token records.
///
/// Creation keyed by external identity must be serialized per identity
/// (unique constraint or equivalent) so concurrent logins for one identity
/// cannot produce duplicate records.
#[async_trait]
pub trait TokenRecordStore: Send + Sync {
    /// Looks up the record for an external identity.
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError>;

    /// Looks up the record bound to a local username.
    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError>;

    /// Creates a record binding an external identity to a username.
    ///
    /// Fails if a record for the external identity already exists; callers
    /// check first.
    async fn create(
        &self,
        external_id: &str,
        username: &str,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<TokenRecord, LoginFlowError>;

    /// Overwrites the token fields and timestamp of an existing record.
    async fn rotate(
        &self,
        id: TokenRecordId,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<(), LoginFlowError>;

    /// Deletes a record. Used only when its bound account no longer exists.
    async fn delete(&self, id: TokenRecordId) -> Result<(), LoginFlowError>;
}

/// Persistence for previous-login backups.
#[async_trait]
pub trait PrevLoginStore: Send + Sync {
    /// Records the backup unless one already exists for the account.
    ///
    /// An existing record is never overwritten: the first backup holds the
    /// account's true original method.
    async fn record_once(&self, record: PrevLoginRecord) -> Result<(), LoginFlowError>;
}
