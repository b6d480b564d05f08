//! Identity resolution for connections
//!
//! The coordinator only needs three things from identity: who is behind a
//! connection right now, and load/save of that user's account. Sessions are
//! looked up fresh on every request so a logout takes effect immediately.

use crate::accounts::{AccountStore, UserAccount};
use crate::error::{AuthError, StoreError};
use crate::rate::RatePolicy;
use dashmap::DashMap;
use log::{info, warn};
use std::net::SocketAddr;
use std::sync::Arc;

/// The requesting side of one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Connection {
    pub client_id: u32,
    pub addr: SocketAddr,
}

pub trait IdentityService: Send + Sync {
    fn resolve_current_user(&self, connection: &Connection) -> Option<String>;

    fn load_account(&self, username: &str) -> Result<Option<UserAccount>, StoreError>;

    fn save_account(&self, account: &UserAccount) -> Result<(), StoreError>;

    /// Deletes every account and ends every session
    fn remove_all(&self) -> Result<usize, StoreError>;
}

/// In-memory sessions keyed by connection, over an account store
pub struct SessionDirectory {
    accounts: Arc<dyn AccountStore>,
    sessions: DashMap<u32, String>,
    policy: RatePolicy,
}

impl SessionDirectory {
    pub fn new(accounts: Arc<dyn AccountStore>, policy: RatePolicy) -> Self {
        Self {
            accounts,
            sessions: DashMap::new(),
            policy,
        }
    }

    /// Creates an account without binding it to a connection
    pub fn seed(&self, username: &str, password: &str) -> Result<bool, StoreError> {
        self.accounts
            .create(UserAccount::new(username, password, self.policy.fresh_budget()))
    }

    pub fn register(
        &self,
        connection: &Connection,
        username: &str,
        password: &str,
    ) -> Result<UserAccount, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Missing);
        }

        let account = UserAccount::new(username, password, self.policy.fresh_budget());
        if !self.accounts.create(account.clone())? {
            return Err(AuthError::Exists);
        }

        info!("Registered {} from client {}", username, connection.client_id);
        self.sessions.insert(connection.client_id, username.to_string());
        Ok(account)
    }

    pub fn login(
        &self,
        connection: &Connection,
        username: &str,
        password: &str,
    ) -> Result<UserAccount, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::Missing);
        }

        let account = self
            .accounts
            .get(username)?
            .ok_or(AuthError::InvalidCredentials)?;
        if !account.credential.verify(password) {
            warn!(
                "Failed login for {} from client {}",
                username, connection.client_id
            );
            return Err(AuthError::InvalidCredentials);
        }

        info!("Client {} logged in as {}", connection.client_id, username);
        self.sessions.insert(connection.client_id, username.to_string());
        Ok(account)
    }

    /// Returns true if the connection had a session
    pub fn logout(&self, connection: &Connection) -> bool {
        self.drop_connection(connection.client_id)
    }

    pub fn drop_connection(&self, client_id: u32) -> bool {
        self.sessions.remove(&client_id).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl IdentityService for SessionDirectory {
    fn resolve_current_user(&self, connection: &Connection) -> Option<String> {
        self.sessions
            .get(&connection.client_id)
            .map(|username| username.value().clone())
    }

    fn load_account(&self, username: &str) -> Result<Option<UserAccount>, StoreError> {
        self.accounts.get(username)
    }

    fn save_account(&self, account: &UserAccount) -> Result<(), StoreError> {
        self.accounts.save(account)
    }

    fn remove_all(&self) -> Result<usize, StoreError> {
        self.sessions.clear();
        self.accounts.remove_all()
    }
}
