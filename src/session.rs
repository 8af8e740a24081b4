//! Account verification and session lifecycle.
//!
//! [`SessionService`] is the only component that knows about every other
//! one: controllers call it, it calls the stores, the mailer and the token
//! manager.

use std::sync::Arc;
use std::time::Duration;

use validator::{ValidationError, ValidationErrors};

use crate::clock::Clock;
use crate::code::CodeIssuer;
use crate::crypto::PasswordManager;
use crate::error::{Result, ServerError};
use crate::mail::{EmailSender, RESET_SUBJECT, VERIFICATION_SUBJECT, code_body};
use crate::revocation::RevocationStore;
use crate::token::{TokenError, TokenManager, TokenPair};
use crate::user::{IdentityStore, User, normalize_email};

/// Upper bound on a single email dispatch.
const MAIL_TIMEOUT: Duration = Duration::from_secs(3);

/// Data required to register an account.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone_number: Option<String>,
}

pub struct SessionService {
    users: Arc<dyn IdentityStore>,
    mailer: Arc<dyn EmailSender>,
    revocations: Arc<dyn RevocationStore>,
    passwords: PasswordManager,
    tokens: TokenManager,
    codes: CodeIssuer,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(
        users: Arc<dyn IdentityStore>,
        mailer: Arc<dyn EmailSender>,
        revocations: Arc<dyn RevocationStore>,
        passwords: PasswordManager,
        tokens: TokenManager,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            users,
            mailer,
            revocations,
            passwords,
            tokens,
            codes: CodeIssuer,
            clock,
        }
    }

    /// Lifetime of access tokens, in seconds.
    pub fn access_ttl(&self) -> u64 {
        self.tokens.access_ttl()
    }

    fn hash(&self, password: &str) -> Result<String> {
        self.passwords
            .hash_password(password)
            .map_err(|err| ServerError::internal("failed to hash password", err))
    }

    async fn find(&self, email: &str) -> Result<User> {
        self.users
            .find_by_email(&normalize_email(email))
            .await?
            .ok_or(ServerError::NotFound)
    }

    /// Mail failures never fail the calling flow, nor hold it past
    /// [`MAIL_TIMEOUT`].
    async fn dispatch(&self, user: &User, subject: &str, code: &str) {
        let body = code_body(code);
        match tokio::time::timeout(
            MAIL_TIMEOUT,
            self.mailer.send(&user.email, subject, &body),
        )
        .await
        {
            Ok(Ok(())) => {},
            Ok(Err(err)) => {
                tracing::error!(user_id = user.id, error = %err, %subject, "failed to send email");
            },
            Err(_) => {
                tracing::error!(user_id = user.id, %subject, "email dispatch timed out");
            },
        }
    }

    /// Register an account and send its verification code.
    ///
    /// An unverified account with the same email is registered again.
    pub async fn signup(&self, account: NewAccount) -> Result<()> {
        let email = normalize_email(&account.email);
        let existing = self.users.find_by_email(&email).await?;

        if existing.as_ref().is_some_and(|user| user.is_verified) {
            return Err(ServerError::DuplicateEmail);
        }

        let password = self.hash(&account.password)?;

        let (user, code) = match existing {
            Some(mut user) => {
                user.password = password;
                user.first_name = account.first_name.trim().to_owned();
                user.last_name = account.last_name.trim().to_owned();
                user.phone_number = account.phone_number;
                let code = self.codes.issue(&mut user);
                // Verified while the password was hashed.
                if !self.users.replace_unverified(&user).await? {
                    return Err(ServerError::DuplicateEmail);
                }

                tracing::debug!(user_id = user.id, "unverified account registered again");
                (user, code)
            },
            None => {
                let mut user = User::new(
                    &email,
                    password,
                    &account.first_name,
                    &account.last_name,
                    account.phone_number,
                );
                let code = self.codes.issue(&mut user);
                let user = self.users.create(&user).await?;

                tracing::info!(user_id = user.id, "account created");
                (user, code)
            },
        };

        metrics::counter!("auth_codes_issued_total", "purpose" => "verification")
            .increment(1);
        self.dispatch(&user, VERIFICATION_SUBJECT, &code).await;

        Ok(())
    }

    /// Mark the account as verified when `code` matches.
    pub async fn verify_email(&self, email: &str, code: &str) -> Result<()> {
        let user = self.find(email).await?;

        if !self.codes.check(&user, code)
            || !self.users.mark_verified(user.id, code).await?
        {
            return Err(ServerError::CodeMismatch);
        }

        tracing::info!(user_id = user.id, "email verified");

        Ok(())
    }

    /// Issue and send a new verification code.
    pub async fn resend_code(&self, email: &str) -> Result<()> {
        let mut user = self.find(email).await?;
        let code = self.codes.issue(&mut user);
        self.users.set_code(user.id, &code).await?;

        metrics::counter!("auth_codes_issued_total", "purpose" => "verification")
            .increment(1);
        self.dispatch(&user, VERIFICATION_SUBJECT, &code).await;

        Ok(())
    }

    /// Check credentials and open a session.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(TokenPair, User)> {
        let Some(user) =
            self.users.find_by_email(&normalize_email(email)).await?
        else {
            metrics::counter!("auth_login_total", "outcome" => "bad_credentials")
                .increment(1);
            return Err(ServerError::BadCredentials);
        };

        if !self.passwords.verify(&user.password, password) {
            metrics::counter!("auth_login_total", "outcome" => "bad_credentials")
                .increment(1);
            return Err(ServerError::BadCredentials);
        }

        if !user.is_verified {
            metrics::counter!("auth_login_total", "outcome" => "unverified")
                .increment(1);
            return Err(ServerError::Unverified);
        }

        let pair = self.tokens.issue(&user.email)?;
        metrics::counter!("auth_login_total", "outcome" => "success").increment(1);
        tracing::info!(user_id = user.id, "user logged in");

        Ok((pair, user))
    }

    /// Revoke `token` until it expires.
    pub async fn logout(&self, token: &str) -> Result<()> {
        let claims = self
            .tokens
            .verify(token)
            .map_err(|_| ServerError::MissingToken)?;

        // Already unusable.
        if claims.exp <= self.clock.now() {
            return Ok(());
        }

        self.revocations.revoke(token, claims.exp).await?;
        metrics::counter!("auth_tokens_revoked_total").increment(1);

        Ok(())
    }

    /// Trade a refresh token for a new access token.
    ///
    /// The refresh token is returned unchanged.
    pub async fn refresh(&self, refresh_token: &str) -> Result<TokenPair> {
        let email = self
            .tokens
            .validate_refresh(refresh_token)
            .map_err(ServerError::InvalidRefreshToken)?;

        if self
            .revocations
            .is_revoked(refresh_token, self.clock.now())
            .await?
        {
            return Err(ServerError::InvalidRefreshToken(TokenError::Revoked));
        }

        if self.users.find_by_email(&email).await?.is_none() {
            return Err(ServerError::InvalidRefreshToken(TokenError::Malformed));
        }

        Ok(TokenPair {
            access_token: self.tokens.issue_access(&email)?,
            refresh_token: refresh_token.to_owned(),
        })
    }

    /// Send a password reset code to a verified account.
    pub async fn forgot_password(&self, email: &str) -> Result<()> {
        let mut user = self.find(email).await?;

        if !user.is_verified {
            return Err(ServerError::Unverified);
        }

        let code = self.codes.issue(&mut user);
        self.users.set_code(user.id, &code).await?;

        metrics::counter!("auth_codes_issued_total", "purpose" => "reset")
            .increment(1);
        self.dispatch(&user, RESET_SUBJECT, &code).await;

        Ok(())
    }

    /// Check a reset code without consuming it.
    pub async fn verify_reset_code(&self, email: &str, code: &str) -> Result<()> {
        let user = self.find(email).await?;

        if !self.codes.check(&user, code) {
            return Err(ServerError::CodeMismatch);
        }

        Ok(())
    }

    /// Replace the password of the account and drop its pending code.
    ///
    /// The reset code is not checked again here.
    pub async fn update_password(&self, email: &str, password: &str) -> Result<()> {
        let user = self.find(email).await?;
        let password = self.hash(password)?;
        self.users.reset_password(user.id, &password).await?;

        tracing::info!(user_id = user.id, "password reset");

        Ok(())
    }

    /// Resolve the user behind an access token.
    pub async fn authenticate(&self, token: &str) -> Result<User> {
        let email = self.tokens.validate_access(token)?;

        if self.revocations.is_revoked(token, self.clock.now()).await? {
            return Err(TokenError::Revoked.into());
        }

        self.users
            .find_by_email(&email)
            .await?
            .ok_or(ServerError::Unauthorized)
    }

    /// Change the password of an authenticated user.
    pub async fn change_password(
        &self,
        user: &User,
        old_password: &str,
        new_password: &str,
    ) -> Result<()> {
        if !self.passwords.verify(&user.password, old_password) {
            let mut errors = ValidationErrors::new();
            errors.add(
                "oldPassword",
                ValidationError::new("password")
                    .with_message("Password does not match.".into()),
            );
            return Err(errors.into());
        }

        let password = self.hash(new_password)?;
        self.users.set_password(user.id, &password).await?;

        tracing::info!(user_id = user.id, "password changed");

        Ok(())
    }
}
