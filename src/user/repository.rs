//! Handle database requests.

use async_trait::async_trait;
use sqlx::{Pool, Postgres};

use crate::error::{Result, ServerError};
use crate::user::{IdentityStore, User};

#[derive(Clone, Debug)]
pub struct PgUserRepository {
    pool: Pool<Postgres>,
}

impl PgUserRepository {
    /// Create a new [`PgUserRepository`].
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl IdentityStore for PgUserRepository {
    async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"SELECT id, email, password, first_name, last_name, phone_number,
                    is_verified, confirmation_code, created_at
                FROM users WHERE email = $1"#,
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn create(&self, user: &User) -> Result<User> {
        let inserted = sqlx::query_as::<_, User>(
            r#"INSERT INTO users (email, password, first_name, last_name, phone_number, is_verified, confirmation_code)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id, email, password, first_name, last_name, phone_number,
                    is_verified, confirmation_code, created_at"#,
        )
        .bind(&user.email)
        .bind(&user.password)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(user.is_verified)
        .bind(&user.confirmation_code)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                ServerError::DuplicateEmail
            },
            _ => err.into(),
        })?;

        Ok(inserted)
    }

    async fn replace_unverified(&self, user: &User) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE users
                SET password = $1, first_name = $2, last_name = $3,
                    phone_number = $4, confirmation_code = $5
                WHERE id = $6 AND is_verified = FALSE"#,
        )
        .bind(&user.password)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone_number)
        .bind(&user.confirmation_code)
        .bind(user.id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_code(&self, id: i64, code: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE users SET confirmation_code = $1 WHERE id = $2")
                .bind(code)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }

    async fn mark_verified(&self, id: i64, code: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"UPDATE users SET is_verified = TRUE, confirmation_code = NULL
                WHERE id = $1 AND confirmation_code = $2"#,
        )
        .bind(id)
        .bind(code)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_password(&self, id: i64, password: &str) -> Result<()> {
        let result = sqlx::query("UPDATE users SET password = $1 WHERE id = $2")
            .bind(password)
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }

    async fn reset_password(&self, id: i64, password: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE users SET password = $1, confirmation_code = NULL WHERE id = $2",
        )
        .bind(password)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }
}
