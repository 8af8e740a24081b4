//! HTTP controllers.
pub mod auth;
pub mod status;
pub mod users;

use std::sync::LazyLock;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::{HeaderMap, header};
use regex_lite::Regex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use validator::{Validate, ValidationError};

use crate::error::ServerError;

const BEARER: &str = "Bearer ";
const SPECIAL_CHARACTERS: &str = "@$!%*?&_#";

static JWT: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-]{2,}(?:\.[A-Za-z0-9_-]{2,}){2}$").ok()
});

/// JSON body checked with [`validator`].
#[derive(Debug, Clone, Copy, Default)]
pub struct Valid<T>(pub T);

impl<T, S> FromRequest<S> for Valid<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        value.validate()?;
        Ok(Valid(value))
    }
}

/// Plain `{ "message": ... }` response.
#[derive(Debug, Serialize)]
pub struct Message {
    pub message: String,
}

impl Message {
    pub fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_owned(),
        })
    }
}

/// Extract a JWT-shaped bearer token from `Authorization`.
pub fn bearer(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix(BEARER)?
        .trim();

    JWT.as_ref()
        .is_some_and(|jwt| jwt.is_match(token))
        .then_some(token)
}

/// Password policy: upper and lower case letters, a digit and a special
/// character out of `@$!%*?&_#`, nothing else.
pub fn validate_password(password: &str) -> Result<(), ValidationError> {
    let mut upper = false;
    let mut lower = false;
    let mut digit = false;
    let mut special = false;

    for c in password.chars() {
        match c {
            'A'..='Z' => upper = true,
            'a'..='z' => lower = true,
            '0'..='9' => digit = true,
            c if SPECIAL_CHARACTERS.contains(c) => special = true,
            _ => return Err(ValidationError::new("invalid_character")),
        }
    }

    if upper && lower && digit && special {
        Ok(())
    } else {
        Err(ValidationError::new("weak_password"))
    }
}
