//! Postgres-backed stores for the login flow.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{FromRow, PgPool};
use std::str::FromStr;
use wicket_core::{AccountId, TokenRecordId};

use wicket_access::{
    AccountRef, AccountStore, AuthMethod, AuthState, EventSink, FlowEvent, LocalAccount,
    LoginFlowError, PendingMatchFinder, PrevLoginRecord, PrevLoginStore, Session, StateStore,
    TokenRecord, TokenRecordStore, TokenSet,
};

/// Row type for authorization state queries.
#[derive(FromRow)]
struct StateRow {
    state: String,
    nonce: String,
    metadata: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl StateRow {
    fn into_auth_state(self) -> AuthState {
        AuthState {
            state: self.state,
            nonce: self.nonce,
            // Malformed persisted metadata degrades to empty metadata.
            metadata: serde_json::from_value(self.metadata).unwrap_or_default(),
            created_at: self.created_at,
        }
    }
}

/// Row type for token record queries.
#[derive(FromRow)]
struct TokenRow {
    id: String,
    external_id: String,
    username: String,
    auth_code: String,
    access_token: String,
    refresh_token: Option<String>,
    id_token: String,
    updated_at: DateTime<Utc>,
}

impl TokenRow {
    fn try_into_record(self) -> Result<TokenRecord, LoginFlowError> {
        let id = TokenRecordId::from_str(&self.id)
            .map_err(|e| LoginFlowError::store(format!("invalid token record id: {}", e)))?;
        Ok(TokenRecord {
            id,
            external_id: self.external_id,
            username: self.username,
            auth_code: self.auth_code,
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            id_token: self.id_token,
            updated_at: self.updated_at,
        })
    }
}

/// Row type for account queries.
#[derive(FromRow)]
struct AccountRow {
    id: String,
    username: String,
    auth_method: String,
    credential: Option<String>,
}

impl AccountRow {
    fn try_into_account(self) -> Result<LocalAccount, LoginFlowError> {
        let id = AccountId::from_str(&self.id)
            .map_err(|e| LoginFlowError::store(format!("invalid account id: {}", e)))?;
        Ok(LocalAccount {
            id,
            username: self.username,
            auth_method: AuthMethod::from(self.auth_method),
            credential: self.credential,
        })
    }
}

/// Store for authorization request states.
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    /// Creates a new state store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn create(&self, record: AuthState) -> Result<(), LoginFlowError> {
        let metadata = serde_json::to_value(&record.metadata).map_err(LoginFlowError::store)?;
        sqlx::query(
            r#"
            INSERT INTO auth_states (state, nonce, metadata, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.state)
        .bind(&record.nonce)
        .bind(metadata)
        .bind(record.created_at)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<AuthState>, LoginFlowError> {
        // One statement: lookup and deletion must not be separable, or two
        // concurrent callbacks could both be accepted for one token.
        let row: Option<StateRow> = sqlx::query_as(
            r#"
            DELETE FROM auth_states
            WHERE state = $1
            RETURNING state, nonce, metadata, created_at
            "#,
        )
        .bind(state)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(row.map(StateRow::into_auth_state))
    }

    async fn delete_expired(&self, max_age: Duration) -> Result<u64, LoginFlowError> {
        let cutoff = Utc::now() - max_age;
        let result = sqlx::query(
            r#"
            DELETE FROM auth_states
            WHERE created_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(result.rows_affected())
    }
}

/// Store for token records.
pub struct PgTokenRecordStore {
    pool: PgPool,
}

impl PgTokenRecordStore {
    /// Creates a new token record store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenRecordStore for PgTokenRecordStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT id, external_id, username, auth_code, access_token, refresh_token, id_token, updated_at
            FROM auth_tokens
            WHERE external_id = $1
            "#,
        )
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        row.map(TokenRow::try_into_record).transpose()
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError> {
        let row: Option<TokenRow> = sqlx::query_as(
            r#"
            SELECT id, external_id, username, auth_code, access_token, refresh_token, id_token, updated_at
            FROM auth_tokens
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        row.map(TokenRow::try_into_record).transpose()
    }

    async fn create(
        &self,
        external_id: &str,
        username: &str,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<TokenRecord, LoginFlowError> {
        let record = TokenRecord {
            id: TokenRecordId::new(),
            external_id: external_id.to_string(),
            username: username.to_string(),
            auth_code: auth_code.to_string(),
            access_token: tokens.access_token.clone(),
            refresh_token: tokens.refresh_token.clone(),
            id_token: tokens.id_token.clone().unwrap_or_default(),
            updated_at: Utc::now(),
        };

        // The unique index on external_id serializes concurrent creation
        // for one identity.
        sqlx::query(
            r#"
            INSERT INTO auth_tokens (id, external_id, username, auth_code, access_token, refresh_token, id_token, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.external_id)
        .bind(&record.username)
        .bind(&record.auth_code)
        .bind(&record.access_token)
        .bind(&record.refresh_token)
        .bind(&record.id_token)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(record)
    }

    async fn rotate(
        &self,
        id: TokenRecordId,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<(), LoginFlowError> {
        sqlx::query(
            r#"
            UPDATE auth_tokens
            SET auth_code = $2,
                access_token = $3,
                refresh_token = $4,
                id_token = COALESCE($5, id_token),
                updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .bind(auth_code)
        .bind(&tokens.access_token)
        .bind(&tokens.refresh_token)
        .bind(&tokens.id_token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }

    async fn delete(&self, id: TokenRecordId) -> Result<(), LoginFlowError> {
        sqlx::query(
            r#"
            DELETE FROM auth_tokens
            WHERE id = $1
            "#,
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }
}

/// Store for previous-login backups.
pub struct PgPrevLoginStore {
    pool: PgPool,
}

impl PgPrevLoginStore {
    /// Creates a new previous-login store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PrevLoginStore for PgPrevLoginStore {
    async fn record_once(&self, record: PrevLoginRecord) -> Result<(), LoginFlowError> {
        // An existing backup holds the account's true original method and
        // is never overwritten.
        sqlx::query(
            r#"
            INSERT INTO prev_logins (account_id, method, credential)
            VALUES ($1, $2, $3)
            ON CONFLICT (account_id) DO NOTHING
            "#,
        )
        .bind(record.account_id.to_string())
        .bind(record.method.as_str())
        .bind(&record.credential)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }
}

/// Postgres-backed account backend.
pub struct PgAccountStore {
    pool: PgPool,
}

impl PgAccountStore {
    /// Creates a new account store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Finds an account by username.
    pub async fn find(&self, username: &str) -> Result<Option<LocalAccount>, LoginFlowError> {
        let row: Option<AccountRow> = sqlx::query_as(
            r#"
            SELECT id, username, auth_method, credential
            FROM accounts
            WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        row.map(AccountRow::try_into_account).transpose()
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn exists(&self, username: &str) -> Result<bool, LoginFlowError> {
        let row: Option<(i32,)> = sqlx::query_as(
            r#"
            SELECT 1 FROM accounts WHERE username = $1
            "#,
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(row.is_some())
    }

    async fn provision(&self, username: &str) -> Result<LocalAccount, LoginFlowError> {
        let account = LocalAccount::new(username, AuthMethod::OpenIdConnect);
        sqlx::query(
            r#"
            INSERT INTO accounts (id, username, auth_method, credential)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(account.id.to_string())
        .bind(&account.username)
        .bind(account.auth_method.as_str())
        .bind(&account.credential)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(account)
    }

    async fn set_auth_method(
        &self,
        username: &str,
        method: AuthMethod,
    ) -> Result<(), LoginFlowError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET auth_method = $2
            WHERE username = $1
            "#,
        )
        .bind(username)
        .bind(method.as_str())
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }

    async fn authenticate(&self, username: &str) -> Result<Option<Session>, LoginFlowError> {
        // The handshake accepts an account only once its method is the
        // external provider.
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT username FROM accounts
            WHERE username = $1 AND auth_method = $2
            "#,
        )
        .bind(username)
        .bind(AuthMethod::OpenIdConnect.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(row.map(|(username,)| Session::new(username)))
    }

    async fn complete_session(&self, session: Session) -> Result<(), LoginFlowError> {
        sqlx::query(
            r#"
            UPDATE accounts
            SET last_login_at = $2
            WHERE username = $1
            "#,
        )
        .bind(&session.username)
        .bind(session.established_at)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }
}

/// Lookup of staged manual identity matches.
pub struct PgPendingMatchFinder {
    pool: PgPool,
}

impl PgPendingMatchFinder {
    /// Creates a new pending match finder.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PendingMatchFinder for PgPendingMatchFinder {
    async fn find(&self, candidate: &str) -> Result<Option<AccountRef>, LoginFlowError> {
        let row: Option<(String, String)> = sqlx::query_as(
            r#"
            SELECT account_id, username
            FROM pending_matches
            WHERE candidate_username = $1
            "#,
        )
        .bind(candidate)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        row.map(|(account_id, username)| {
            let account_id = AccountId::from_str(&account_id)
                .map_err(|e| LoginFlowError::store(format!("invalid account id: {}", e)))?;
            Ok(AccountRef {
                account_id,
                username,
            })
        })
        .transpose()
    }
}

/// A browser session row.
#[derive(Debug, Clone, FromRow)]
pub struct SessionRecord {
    /// Opaque session ID carried by the cookie.
    pub id: String,
    /// The signed-in username.
    pub username: String,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session expires.
    pub expires_at: DateTime<Utc>,
}

impl SessionRecord {
    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

/// Repository for browser session operations.
pub struct SessionRepository {
    pool: PgPool,
}

impl SessionRepository {
    /// Creates a new session repository.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a session for a username, valid for `duration`.
    pub async fn create(
        &self,
        username: &str,
        duration: Duration,
    ) -> Result<SessionRecord, LoginFlowError> {
        let now = Utc::now();
        let record = SessionRecord {
            id: ulid::Ulid::new().to_string(),
            username: username.to_string(),
            created_at: now,
            expires_at: now + duration,
        };

        sqlx::query(
            r#"
            INSERT INTO sessions (id, username, created_at, expires_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(&record.id)
        .bind(&record.username)
        .bind(record.created_at)
        .bind(record.expires_at)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(record)
    }

    /// Finds a session by ID.
    pub async fn find_by_id(&self, id: &str) -> Result<Option<SessionRecord>, LoginFlowError> {
        let row: Option<SessionRecord> = sqlx::query_as(
            r#"
            SELECT id, username, created_at, expires_at
            FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(row)
    }

    /// Deletes a session by ID (logout).
    pub async fn delete(&self, id: &str) -> Result<(), LoginFlowError> {
        sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(())
    }

    /// Deletes expired sessions.
    pub async fn delete_expired(&self) -> Result<u64, LoginFlowError> {
        let result = sqlx::query(
            r#"
            DELETE FROM sessions
            WHERE expires_at < NOW()
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(LoginFlowError::store)?;

        Ok(result.rows_affected())
    }
}

/// Event sink that logs flow notifications.
///
/// Emission never blocks and never fails the flow.
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: FlowEvent) {
        match event {
            FlowEvent::IdentityVerified { state, .. } => {
                tracing::info!(%state, "identity verified without login");
            }
            FlowEvent::AccountConnected { username } => {
                tracing::info!(%username, "account connected to external identity");
            }
            FlowEvent::LoginFailed { username, reason } => {
                tracing::warn!(%username, %reason, "login failed");
            }
        }
    }
}
