//! Credential storage boundary for the WrenChat client.
//!
//! The engine only needs to know whether a bearer token exists for the active
//! account before attempting a request; how tokens are persisted is a
//! platform concern behind the `CredentialStore` trait.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("credential not found")]
    Missing,
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
    #[error("credential store backend failure: {0}")]
    Backend(String),
}

/// Keyed storage for bearer tokens, one per (realm, account).
pub trait CredentialStore: Send + Sync {
    fn store_token(&self, realm: &str, account: &str, token: &str)
    -> Result<(), CredentialError>;

    fn token(&self, realm: &str, account: &str) -> Result<String, CredentialError>;

    fn forget_token(&self, realm: &str, account: &str) -> Result<(), CredentialError>;
}

/// Process-local store used by tests and headless tooling.
#[derive(Clone, Default)]
pub struct InMemoryCredentialStore {
    tokens: Arc<RwLock<HashMap<(String, String), String>>>,
}

impl CredentialStore for InMemoryCredentialStore {
    fn store_token(
        &self,
        realm: &str,
        account: &str,
        token: &str,
    ) -> Result<(), CredentialError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| CredentialError::Backend("poisoned lock".to_owned()))?;
        tokens.insert((realm.to_owned(), account.to_owned()), token.to_owned());
        Ok(())
    }

    fn token(&self, realm: &str, account: &str) -> Result<String, CredentialError> {
        let tokens = self
            .tokens
            .read()
            .map_err(|_| CredentialError::Backend("poisoned lock".to_owned()))?;
        tokens
            .get(&(realm.to_owned(), account.to_owned()))
            .cloned()
            .ok_or(CredentialError::Missing)
    }

    fn forget_token(&self, realm: &str, account: &str) -> Result<(), CredentialError> {
        let mut tokens = self
            .tokens
            .write()
            .map_err(|_| CredentialError::Backend("poisoned lock".to_owned()))?;
        if tokens
            .remove(&(realm.to_owned(), account.to_owned()))
            .is_none()
        {
            return Err(CredentialError::Missing);
        }
        Ok(())
    }
}

/// OS keychain-backed store.
#[cfg(feature = "os-keyring")]
#[derive(Default, Clone, Copy)]
pub struct OsKeyringCredentialStore;

#[cfg(feature = "os-keyring")]
impl CredentialStore for OsKeyringCredentialStore {
    fn store_token(
        &self,
        realm: &str,
        account: &str,
        token: &str,
    ) -> Result<(), CredentialError> {
        let entry = keyring::Entry::new(realm, account)
            .map_err(|err| CredentialError::Backend(err.to_string()))?;
        entry
            .set_password(token)
            .map_err(|err| CredentialError::Backend(err.to_string()))
    }

    fn token(&self, realm: &str, account: &str) -> Result<String, CredentialError> {
        let entry = keyring::Entry::new(realm, account)
            .map_err(|err| CredentialError::Backend(err.to_string()))?;
        entry.get_password().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialError::Missing,
            other => CredentialError::Backend(other.to_string()),
        })
    }

    fn forget_token(&self, realm: &str, account: &str) -> Result<(), CredentialError> {
        let entry = keyring::Entry::new(realm, account)
            .map_err(|err| CredentialError::Backend(err.to_string()))?;
        entry.delete_credential().map_err(|err| match err {
            keyring::Error::NoEntry => CredentialError::Missing,
            other => CredentialError::Backend(other.to_string()),
        })
    }
}

/// Store pinned to one realm, so callers only deal in accounts.
#[derive(Clone)]
pub struct RealmCredentialStore<S: CredentialStore> {
    inner: S,
    realm: String,
}

impl<S: CredentialStore> RealmCredentialStore<S> {
    pub fn new(inner: S, realm: impl Into<String>) -> Self {
        Self {
            inner,
            realm: realm.into(),
        }
    }

    pub fn store_token(&self, account: &str, token: &str) -> Result<(), CredentialError> {
        self.inner.store_token(&self.realm, account, token)
    }

    pub fn token(&self, account: &str) -> Result<String, CredentialError> {
        self.inner.token(&self.realm, account)
    }

    pub fn forget_token(&self, account: &str) -> Result<(), CredentialError> {
        self.inner.forget_token(&self.realm, account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_store_round_trips_tokens() {
        let store = InMemoryCredentialStore::default();
        store
            .store_token("wrenchat", "alice", "tok-1")
            .expect("store should work");

        assert_eq!(
            store.token("wrenchat", "alice").expect("token should exist"),
            "tok-1"
        );

        store
            .forget_token("wrenchat", "alice")
            .expect("forget should work");
        assert_eq!(
            store.token("wrenchat", "alice"),
            Err(CredentialError::Missing)
        );
    }

    #[test]
    fn forgetting_an_absent_token_reports_missing() {
        let store = InMemoryCredentialStore::default();
        assert_eq!(
            store.forget_token("wrenchat", "nobody"),
            Err(CredentialError::Missing)
        );
    }

    #[test]
    fn realm_store_isolates_realms() {
        let base = InMemoryCredentialStore::default();
        let staging = RealmCredentialStore::new(base.clone(), "wrenchat-staging");
        let prod = RealmCredentialStore::new(base.clone(), "wrenchat");

        staging
            .store_token("alice", "tok-staging")
            .expect("staging store should work");
        prod.store_token("alice", "tok-prod")
            .expect("prod store should work");

        assert_eq!(
            staging.token("alice").expect("staging token"),
            "tok-staging"
        );
        assert_eq!(prod.token("alice").expect("prod token"), "tok-prod");
    }

    struct OutageStore;

    impl CredentialStore for OutageStore {
        fn store_token(
            &self,
            _realm: &str,
            _account: &str,
            _token: &str,
        ) -> Result<(), CredentialError> {
            Err(CredentialError::Unavailable("keychain locked".to_owned()))
        }

        fn token(&self, _realm: &str, _account: &str) -> Result<String, CredentialError> {
            Err(CredentialError::Unavailable("keychain locked".to_owned()))
        }

        fn forget_token(&self, _realm: &str, _account: &str) -> Result<(), CredentialError> {
            Err(CredentialError::Unavailable("keychain locked".to_owned()))
        }
    }

    #[test]
    fn backend_outage_propagates_through_realm_store() {
        let scoped = RealmCredentialStore::new(OutageStore, "wrenchat");
        assert_eq!(
            scoped.token("alice"),
            Err(CredentialError::Unavailable("keychain locked".to_owned()))
        );
    }
}
