//! In-memory storage implementations.
//!
//! Mutex-guarded maps implementing the flow's persistence traits, used by
//! the crate's tests and suitable for local development. The production
//! implementations live in the server crate.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use wicket_core::TokenRecordId;

use crate::account::{
    AccountRef, AccountStore, AuthMethod, EventSink, FlowEvent, LocalAccount, PendingMatchFinder,
    Session,
};
use crate::error::LoginFlowError;
use crate::provider::TokenSet;
use crate::state::{AuthState, StateStore};
use crate::token::{PrevLoginRecord, PrevLoginStore, TokenRecord, TokenRecordStore};

/// In-memory state store.
///
/// `take` removes under the write lock, so consumption is atomic.
#[derive(Default)]
pub struct InMemoryStateStore {
    states: RwLock<HashMap<String, AuthState>>,
}

impl InMemoryStateStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unconsumed records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.states.read().unwrap().len()
    }

    /// Returns true if no records are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn create(&self, record: AuthState) -> Result<(), LoginFlowError> {
        let mut states = self.states.write().unwrap();
        if states.contains_key(&record.state) {
            return Err(LoginFlowError::store("duplicate state token"));
        }
        states.insert(record.state.clone(), record);
        Ok(())
    }

    async fn take(&self, state: &str) -> Result<Option<AuthState>, LoginFlowError> {
        Ok(self.states.write().unwrap().remove(state))
    }

    async fn delete_expired(&self, max_age: Duration) -> Result<u64, LoginFlowError> {
        let cutoff = Utc::now() - max_age;
        let mut states = self.states.write().unwrap();
        let before = states.len();
        states.retain(|_, record| record.created_at >= cutoff);
        Ok((before - states.len()) as u64)
    }
}

/// In-memory token record store.
#[derive(Default)]
pub struct InMemoryTokenRecordStore {
    records: RwLock<HashMap<TokenRecordId, TokenRecord>>,
}

impl InMemoryTokenRecordStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all records.
    #[must_use]
    pub fn records(&self) -> Vec<TokenRecord> {
        self.records.read().unwrap().values().cloned().collect()
    }
}

#[async_trait]
impl TokenRecordStore for InMemoryTokenRecordStore {
    async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|record| record.external_id == external_id)
            .cloned())
    }

    async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<Option<TokenRecord>, LoginFlowError> {
        Ok(self
            .records
            .read()
            .unwrap()
            .values()
            .find(|record| record.username == username)
            .cloned())
    }

    async fn create(
        &self,
        external_id: &str,
        username: &str,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<TokenRecord, LoginFlowError> {
        let mut records = self.records.write().unwrap();
        if records
            .values()
            .any(|record| record.external_id == external_id)
        {
            return Err(LoginFlowError::store(format!(
                "token record for '{external_id}' already exists"
            )));
        }
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
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn rotate(
        &self,
        id: TokenRecordId,
        auth_code: &str,
        tokens: &TokenSet,
    ) -> Result<(), LoginFlowError> {
        let mut records = self.records.write().unwrap();
        let record = records
            .get_mut(&id)
            .ok_or_else(|| LoginFlowError::store(format!("no token record {id}")))?;
        record.auth_code = auth_code.to_string();
        record.access_token = tokens.access_token.clone();
        record.refresh_token = tokens.refresh_token.clone();
        if let Some(id_token) = &tokens.id_token {
            record.id_token = id_token.clone();
        }
        record.updated_at = Utc::now();
        Ok(())
    }

    async fn delete(&self, id: TokenRecordId) -> Result<(), LoginFlowError> {
        self.records.write().unwrap().remove(&id);
        Ok(())
    }
}

/// In-memory previous-login backup store.
#[derive(Default)]
pub struct InMemoryPrevLoginStore {
    records: RwLock<Vec<PrevLoginRecord>>,
}

impl InMemoryPrevLoginStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of all backups.
    #[must_use]
    pub fn records(&self) -> Vec<PrevLoginRecord> {
        self.records.read().unwrap().clone()
    }
}

#[async_trait]
impl PrevLoginStore for InMemoryPrevLoginStore {
    async fn record_once(&self, record: PrevLoginRecord) -> Result<(), LoginFlowError> {
        let mut records = self.records.write().unwrap();
        if !records.iter().any(|r| r.account_id == record.account_id) {
            records.push(record);
        }
        Ok(())
    }
}

/// In-memory account backend.
///
/// The handshake accepts an account only once its method is the external
/// provider, mirroring how the production backend gates provider logins.
#[derive(Default)]
pub struct InMemoryAccountStore {
    accounts: RwLock<HashMap<String, LocalAccount>>,
    sessions: RwLock<Vec<Session>>,
}

impl InMemoryAccountStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an account.
    pub fn insert(&self, account: LocalAccount) {
        self.accounts
            .write()
            .unwrap()
            .insert(account.username.clone(), account);
    }

    /// Removes an account.
    pub fn remove(&self, username: &str) {
        self.accounts.write().unwrap().remove(username);
    }

    /// Returns an account by username.
    #[must_use]
    pub fn get(&self, username: &str) -> Option<LocalAccount> {
        self.accounts.read().unwrap().get(username).cloned()
    }

    /// Snapshot of the sessions completed so far.
    #[must_use]
    pub fn completed_sessions(&self) -> Vec<Session> {
        self.sessions.read().unwrap().clone()
    }
}

#[async_trait]
impl AccountStore for InMemoryAccountStore {
    async fn exists(&self, username: &str) -> Result<bool, LoginFlowError> {
        Ok(self.accounts.read().unwrap().contains_key(username))
    }

    async fn provision(&self, username: &str) -> Result<LocalAccount, LoginFlowError> {
        let account = LocalAccount::new(username, AuthMethod::OpenIdConnect);
        self.insert(account.clone());
        Ok(account)
    }

    async fn set_auth_method(
        &self,
        username: &str,
        method: AuthMethod,
    ) -> Result<(), LoginFlowError> {
        let mut accounts = self.accounts.write().unwrap();
        let account = accounts
            .get_mut(username)
            .ok_or_else(|| LoginFlowError::store(format!("no account '{username}'")))?;
        account.auth_method = method;
        Ok(())
    }

    async fn authenticate(&self, username: &str) -> Result<Option<Session>, LoginFlowError> {
        let accounts = self.accounts.read().unwrap();
        match accounts.get(username) {
            Some(account) if account.auth_method.is_oidc() => {
                Ok(Some(Session::new(username)))
            }
            _ => Ok(None),
        }
    }

    async fn complete_session(&self, session: Session) -> Result<(), LoginFlowError> {
        self.sessions.write().unwrap().push(session);
        Ok(())
    }
}

/// In-memory staged-match lookup.
#[derive(Default)]
pub struct InMemoryPendingMatches {
    matches: RwLock<HashMap<String, AccountRef>>,
}

impl InMemoryPendingMatches {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stages a manual match for a candidate username.
    pub fn stage(&self, candidate: impl Into<String>, matched: AccountRef) {
        self.matches.write().unwrap().insert(candidate.into(), matched);
    }
}

#[async_trait]
impl PendingMatchFinder for InMemoryPendingMatches {
    async fn find(&self, candidate: &str) -> Result<Option<AccountRef>, LoginFlowError> {
        Ok(self.matches.read().unwrap().get(candidate).cloned())
    }
}

/// Event sink that collects emitted events.
#[derive(Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<FlowEvent>>,
}

impl CollectingEventSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events emitted so far.
    #[must_use]
    pub fn events(&self) -> Vec<FlowEvent> {
        self.events.read().unwrap().clone()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event: FlowEvent) {
        self.events.write().unwrap().push(event);
    }
}
