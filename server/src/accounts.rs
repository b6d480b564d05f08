//! User accounts and their placement accounting

use crate::error::StoreError;
use crate::rate::Budget;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::MAX_CUSTOM_COLORS;

/// Salted SHA-256 of a password, both parts hex encoded
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    salt: String,
    hash: String,
}

impl Credential {
    pub fn derive(password: &str) -> Self {
        let mut salt = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut salt);
        let salt = to_hex(&salt);
        let hash = Self::digest(&salt, password);
        Self { salt, hash }
    }

    pub fn verify(&self, password: &str) -> bool {
        Self::digest(&self.salt, password) == self.hash
    }

    fn digest(salt: &str, password: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(salt.as_bytes());
        hasher.update(password.as_bytes());
        to_hex(&hasher.finalize())
    }
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Recently picked colors, newest first, without duplicates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomColors(Vec<String>);

impl CustomColors {
    /// Moves `color` to the front, evicting the oldest entry past capacity
    pub fn remember(&mut self, color: String) {
        self.0.retain(|existing| *existing != color);
        self.0.insert(0, color);
        self.0.truncate(MAX_CUSTOM_COLORS);
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub username: String,
    pub credential: Credential,
    pub pixels_placed: u64,
    pub last_placed_at: Option<u64>,
    pub custom_colors: CustomColors,
    pub budget: Budget,
}

impl UserAccount {
    pub fn new(username: impl Into<String>, password: &str, budget: Budget) -> Self {
        Self {
            username: username.into(),
            credential: Credential::derive(password),
            pixels_placed: 0,
            last_placed_at: None,
            custom_colors: CustomColors::default(),
            budget,
        }
    }
}

/// Keyed account storage with atomic create and upsert
pub trait AccountStore: Send + Sync {
    fn get(&self, username: &str) -> Result<Option<UserAccount>, StoreError>;

    /// Inserts only if the username is free; returns false when taken
    fn create(&self, account: UserAccount) -> Result<bool, StoreError>;

    fn save(&self, account: &UserAccount) -> Result<(), StoreError>;

    fn remove_all(&self) -> Result<usize, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryAccountStore {
    accounts: DashMap<String, UserAccount>,
}

impl MemoryAccountStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AccountStore for MemoryAccountStore {
    fn get(&self, username: &str) -> Result<Option<UserAccount>, StoreError> {
        Ok(self.accounts.get(username).map(|a| a.value().clone()))
    }

    fn create(&self, account: UserAccount) -> Result<bool, StoreError> {
        match self.accounts.entry(account.username.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(account);
                Ok(true)
            }
        }
    }

    fn save(&self, account: &UserAccount) -> Result<(), StoreError> {
        self.accounts
            .insert(account.username.clone(), account.clone());
        Ok(())
    }

    fn remove_all(&self) -> Result<usize, StoreError> {
        let count = self.accounts.len();
        self.accounts.clear();
        Ok(count)
    }
}
