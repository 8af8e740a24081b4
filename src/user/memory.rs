//! In-memory identity store, used when no database is configured.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::error::{Result, ServerError};
use crate::user::{IdentityStore, User};

/// Users keyed by email. Every mutation runs under the entry lock.
#[derive(Debug, Default)]
pub struct MemoryUserRepository {
    users: DashMap<String, User>,
    emails: DashMap<i64, String>,
    sequence: AtomicI64,
}

impl MemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn update<T>(&self, id: i64, f: impl FnOnce(&mut User) -> T) -> Result<T> {
        let email = self
            .emails
            .get(&id)
            .map(|email| email.value().clone())
            .ok_or(ServerError::NotFound)?;

        match self.users.get_mut(&email) {
            Some(mut user) if user.id == id => Ok(f(user.value_mut())),
            _ => Err(ServerError::NotFound),
        }
    }
}

#[async_trait]
impl IdentityStore for MemoryUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.get(email).map(|user| user.clone()))
    }

    async fn create(&self, user: &User) -> Result<User> {
        match self.users.entry(user.email.clone()) {
            Entry::Occupied(_) => Err(ServerError::DuplicateEmail),
            Entry::Vacant(entry) => {
                let mut user = user.clone();
                user.id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
                self.emails.insert(user.id, user.email.clone());
                entry.insert(user.clone());
                Ok(user)
            },
        }
    }

    async fn replace_unverified(&self, user: &User) -> Result<bool> {
        self.update(user.id, |stored| {
            if stored.is_verified {
                return false;
            }
            stored.password = user.password.clone();
            stored.first_name = user.first_name.clone();
            stored.last_name = user.last_name.clone();
            stored.phone_number = user.phone_number.clone();
            stored.confirmation_code = user.confirmation_code.clone();
            true
        })
    }

    async fn set_code(&self, id: i64, code: &str) -> Result<()> {
        self.update(id, |user| user.confirmation_code = Some(code.to_owned()))
    }

    async fn mark_verified(&self, id: i64, code: &str) -> Result<bool> {
        self.update(id, |user| {
            if user.confirmation_code.as_deref() != Some(code) {
                return false;
            }
            user.is_verified = true;
            user.confirmation_code = None;
            true
        })
    }

    async fn set_password(&self, id: i64, password: &str) -> Result<()> {
        self.update(id, |user| user.password = password.to_owned())
    }

    async fn reset_password(&self, id: i64, password: &str) -> Result<()> {
        self.update(id, |user| {
            user.password = password.to_owned();
            user.confirmation_code = None;
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        User::new(email, "hash".to_owned(), "Aigerim", "Nurlanovna", None)
    }

    #[tokio::test]
    async fn test_create_and_find() {
        let store = MemoryUserRepository::new();
        let first = store.create(&user("a@example.kz")).await.unwrap();
        let second = store.create(&user("b@example.kz")).await.unwrap();

        assert_ne!(first.id, second.id);
        assert_eq!(
            store.find_by_email("a@example.kz").await.unwrap(),
            Some(first)
        );
        assert_eq!(store.find_by_email("c@example.kz").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_duplicate_email() {
        let store = MemoryUserRepository::new();
        store.create(&user("a@example.kz")).await.unwrap();

        assert!(matches!(
            store.create(&user("a@example.kz")).await,
            Err(ServerError::DuplicateEmail)
        ));
    }

    #[tokio::test]
    async fn test_mark_verified() {
        let store = MemoryUserRepository::new();
        let created = store.create(&user("a@example.kz")).await.unwrap();
        store.set_code(created.id, "123456").await.unwrap();

        assert!(!store.mark_verified(created.id, "654321").await.unwrap());
        assert!(store.mark_verified(created.id, "123456").await.unwrap());
        // Consumed.
        assert!(!store.mark_verified(created.id, "123456").await.unwrap());

        let found = store.find_by_email("a@example.kz").await.unwrap().unwrap();
        assert!(found.is_verified);
        assert!(found.confirmation_code.is_none());
    }

    #[tokio::test]
    async fn test_set_code_keeps_other_fields() {
        let store = MemoryUserRepository::new();
        let created = store.create(&user("a@example.kz")).await.unwrap();
        store.set_code(created.id, "123456").await.unwrap();
        store.mark_verified(created.id, "123456").await.unwrap();

        // A stale reader only touches the code.
        store.set_code(created.id, "111111").await.unwrap();
        let found = store.find_by_email("a@example.kz").await.unwrap().unwrap();
        assert!(found.is_verified);
        assert_eq!(found.confirmation_code.as_deref(), Some("111111"));
    }

    #[tokio::test]
    async fn test_replace_unverified() {
        let store = MemoryUserRepository::new();
        let mut created = store.create(&user("a@example.kz")).await.unwrap();
        created.first_name = "Dana".to_owned();
        created.confirmation_code = Some("123456".to_owned());

        assert!(store.replace_unverified(&created).await.unwrap());
        assert!(store.mark_verified(created.id, "123456").await.unwrap());

        created.first_name = "Aliya".to_owned();
        assert!(!store.replace_unverified(&created).await.unwrap());
        let found = store.find_by_email("a@example.kz").await.unwrap().unwrap();
        assert_eq!(found.first_name, "Dana");
    }

    #[tokio::test]
    async fn test_passwords() {
        let store = MemoryUserRepository::new();
        let created = store.create(&user("a@example.kz")).await.unwrap();
        store.set_code(created.id, "123456").await.unwrap();

        store.set_password(created.id, "hash2").await.unwrap();
        let found = store.find_by_email("a@example.kz").await.unwrap().unwrap();
        assert_eq!(found.password, "hash2");
        assert!(found.confirmation_code.is_some());

        store.reset_password(created.id, "hash3").await.unwrap();
        let found = store.find_by_email("a@example.kz").await.unwrap().unwrap();
        assert_eq!(found.password, "hash3");
        assert!(found.confirmation_code.is_none());
    }

    #[tokio::test]
    async fn test_unknown_id() {
        let store = MemoryUserRepository::new();

        assert!(matches!(
            store.set_code(42, "123456").await,
            Err(ServerError::NotFound)
        ));
        assert!(matches!(
            store.mark_verified(42, "123456").await,
            Err(ServerError::NotFound)
        ));
    }
}
