//! Credential source storage
//!
//! Persistence is a collaborator. The verifier only needs lookup by id and
//! by user, an atomic insert for new registrations and an atomic counter update so two
//! concurrent assertions for one credential cannot both succeed on the same
//! counter value.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;

use crate::webauthn::{PublicKeyCredentialSource, WebAuthnError};

/// Storage for registered credential sources
pub trait CredentialSourceRepository: Send + Sync {
    /// # Errors
    /// Returns `Repository` if the store cannot be read
    fn find_by_id(&self, credential_id: &str)
        -> Result<Option<PublicKeyCredentialSource>, WebAuthnError>;

    /// # Errors
    /// Returns `Repository` if the store cannot be read
    fn find_all_for_user(
        &self,
        user_handle: &str,
    ) -> Result<Vec<PublicKeyCredentialSource>, WebAuthnError>;

    /// Insert or replace a credential source
    ///
    /// # Errors
    /// Returns `Repository` if the store cannot be written
    fn save(&self, source: PublicKeyCredentialSource) -> Result<(), WebAuthnError>;

    /// Store a new credential source unless its id is already taken
    ///
    /// Returns `Ok(false)` without writing when the id exists. The check and
    /// the insert must be a single atomic step.
    ///
    /// # Errors
    /// Returns `Repository` if the store cannot be written
    fn save_if_absent(&self, source: PublicKeyCredentialSource) -> Result<bool, WebAuthnError>;

    /// Set the counter to `new` only if it still equals `expected`
    ///
    /// Returns `Ok(false)` when the stored counter changed in between.
    ///
    /// # Errors
    /// Returns `CredentialNotFound` for unknown ids and `Repository` if the
    /// store cannot be written
    fn update_counter(
        &self,
        credential_id: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, WebAuthnError>;
}

/// Thread-safe in-memory repository
#[derive(Debug, Default)]
pub struct InMemoryCredentialSourceRepository {
    sources: RwLock<HashMap<String, PublicKeyCredentialSource>>,
}

fn poisoned<T>(_: T) -> WebAuthnError {
    WebAuthnError::Repository("Credential store lock poisoned".to_string())
}

impl InMemoryCredentialSourceRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored credential sources
    ///
    /// # Errors
    /// Returns `Repository` if the store cannot be read
    pub fn len(&self) -> Result<usize, WebAuthnError> {
        Ok(self.sources.read().map_err(poisoned)?.len())
    }

    /// # Errors
    /// Returns `Repository` if the store cannot be read
    pub fn is_empty(&self) -> Result<bool, WebAuthnError> {
        Ok(self.len()? == 0)
    }
}

impl CredentialSourceRepository for InMemoryCredentialSourceRepository {
    fn find_by_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<PublicKeyCredentialSource>, WebAuthnError> {
        Ok(self
            .sources
            .read()
            .map_err(poisoned)?
            .get(credential_id)
            .cloned())
    }

    fn find_all_for_user(
        &self,
        user_handle: &str,
    ) -> Result<Vec<PublicKeyCredentialSource>, WebAuthnError> {
        let sources = self.sources.read().map_err(poisoned)?;
        let mut found: Vec<_> = sources
            .values()
            .filter(|source| source.user_handle == user_handle)
            .cloned()
            .collect();
        found.sort_by_key(|source| source.created_at);
        Ok(found)
    }

    fn save(&self, source: PublicKeyCredentialSource) -> Result<(), WebAuthnError> {
        self.sources
            .write()
            .map_err(poisoned)?
            .insert(source.credential_id.clone(), source);
        Ok(())
    }

    fn save_if_absent(&self, source: PublicKeyCredentialSource) -> Result<bool, WebAuthnError> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        match sources.entry(source.credential_id.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(source);
                Ok(true)
            }
        }
    }

    fn update_counter(
        &self,
        credential_id: &str,
        expected: u32,
        new: u32,
    ) -> Result<bool, WebAuthnError> {
        let mut sources = self.sources.write().map_err(poisoned)?;
        let source = sources
            .get_mut(credential_id)
            .ok_or(WebAuthnError::CredentialNotFound)?;
        if source.counter != expected {
            return Ok(false);
        }
        source.counter = new;
        source.last_used = Some(Utc::now());
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::{AttestationType, TrustPath};
    use std::sync::Arc;
    use uuid::Uuid;

    fn source(id: &str, user: &str, counter: u32) -> PublicKeyCredentialSource {
        PublicKeyCredentialSource {
            credential_id: id.to_string(),
            credential_type: "public-key".to_string(),
            transports: vec![],
            attestation_type: AttestationType::None,
            attestation_format: "none".to_string(),
            trust_path: TrustPath::Empty,
            aaguid: Uuid::nil(),
            credential_public_key: vec![0xa0],
            user_handle: user.to_string(),
            counter,
            backup_eligible: false,
            backup_state: false,
            uv_initialized: false,
            created_at: Utc::now(),
            last_used: None,
        }
    }

    #[test]
    fn test_save_and_lookup() {
        let repository = InMemoryCredentialSourceRepository::new();
        repository.save(source("a", "alice", 0)).unwrap();
        repository.save(source("b", "alice", 0)).unwrap();
        repository.save(source("c", "bob", 0)).unwrap();

        assert_eq!(repository.len().unwrap(), 3);
        assert_eq!(repository.find_by_id("b").unwrap().unwrap().user_handle, "alice");
        assert!(repository.find_by_id("zzz").unwrap().is_none());
        assert_eq!(repository.find_all_for_user("alice").unwrap().len(), 2);
    }

    #[test]
    fn test_save_if_absent_keeps_existing_source() {
        let repository = InMemoryCredentialSourceRepository::new();
        assert!(repository.save_if_absent(source("a", "alice", 3)).unwrap());
        assert!(!repository.save_if_absent(source("a", "mallory", 0)).unwrap());

        let stored = repository.find_by_id("a").unwrap().unwrap();
        assert_eq!(stored.user_handle, "alice");
        assert_eq!(stored.counter, 3);
    }

    #[test]
    fn test_concurrent_registrations_single_winner() {
        let repository = Arc::new(InMemoryCredentialSourceRepository::new());

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let repository = Arc::clone(&repository);
                std::thread::spawn(move || {
                    repository
                        .save_if_absent(source("a", &format!("user-{i}"), 0))
                        .unwrap()
                })
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(repository.len().unwrap(), 1);
    }

    #[test]
    fn test_counter_compare_and_swap() {
        let repository = InMemoryCredentialSourceRepository::new();
        repository.save(source("a", "alice", 5)).unwrap();

        assert!(!repository.update_counter("a", 4, 6).unwrap());
        assert!(repository.update_counter("a", 5, 6).unwrap());
        let stored = repository.find_by_id("a").unwrap().unwrap();
        assert_eq!(stored.counter, 6);
        assert!(stored.last_used.is_some());

        assert!(matches!(
            repository.update_counter("missing", 0, 1),
            Err(WebAuthnError::CredentialNotFound)
        ));
    }

    #[test]
    fn test_concurrent_updates_single_winner() {
        let repository = Arc::new(InMemoryCredentialSourceRepository::new());
        repository.save(source("a", "alice", 1)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let repository = Arc::clone(&repository);
                std::thread::spawn(move || repository.update_counter("a", 1, 2).unwrap())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
