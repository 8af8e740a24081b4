mod memory;
mod repository;

pub use memory::*;
pub use repository::*;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// User as saved on database.
#[derive(
    Clone, Debug, Default, PartialEq, Serialize, Deserialize, sqlx::FromRow,
)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub email: String,
    #[serde(skip)]
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
    pub is_verified: bool,
    #[serde(skip)]
    pub confirmation_code: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// Create an unverified user. `password` must already be hashed.
    pub fn new(
        email: &str,
        password: String,
        first_name: &str,
        last_name: &str,
        phone_number: Option<String>,
    ) -> Self {
        Self {
            email: normalize_email(email),
            password,
            first_name: first_name.trim().to_owned(),
            last_name: last_name.trim().to_owned(),
            phone_number,
            created_at: Utc::now(),
            ..Default::default()
        }
    }
}

/// Emails are compared trimmed and lower-cased.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Port for user persistence operations.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Find a user by (normalized) email.
    async fn find_by_email(&self, email: &str) -> Result<Option<User>>;

    /// Insert a new user and return it with its assigned `id`.
    ///
    /// Fails with `DuplicateEmail` when the email is already taken.
    async fn create(&self, user: &User) -> Result<User>;

    /// Overwrite password, profile and pending code of `user` as long as
    /// the stored account is still unverified.
    ///
    /// Returns `false` when the account got verified in the meantime.
    async fn replace_unverified(&self, user: &User) -> Result<bool>;

    /// Replace the pending confirmation code.
    async fn set_code(&self, id: i64, code: &str) -> Result<()>;

    /// Verify the account if `code` is still the pending one, consuming it.
    ///
    /// Returns `false` when the pending code differs.
    async fn mark_verified(&self, id: i64, code: &str) -> Result<bool>;

    /// Replace the password hash.
    async fn set_password(&self, id: i64, password: &str) -> Result<()>;

    /// Replace the password hash and drop the pending code.
    async fn reset_password(&self, id: i64, password: &str) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user() {
        let user = User::new(
            "  Aigerim@Example.KZ ",
            "$argon2id$...".to_owned(),
            " Aigerim",
            "Nurlanovna ",
            None,
        );

        assert_eq!(user.email, "aigerim@example.kz");
        assert_eq!(user.first_name, "Aigerim");
        assert_eq!(user.last_name, "Nurlanovna");
        assert!(!user.is_verified);
        assert!(user.confirmation_code.is_none());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let user = User {
            password: "$argon2id$hash".to_owned(),
            confirmation_code: Some("123456".to_owned()),
            ..Default::default()
        };

        let json = serde_json::to_value(&user).unwrap();
        assert!(json.get("password").is_none());
        assert!(json.get("confirmationCode").is_none());
        assert_eq!(json["isVerified"], false);
    }
}
