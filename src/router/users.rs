//! Users-related HTTP API. Authorization required.

use axum::extract::State;
use axum::routing::{get, patch};
use axum::{Extension, Json, Router, middleware};
use serde::Deserialize;
use validator::Validate;

use crate::AppState;
use crate::error::Result;
use crate::router::{Message, Valid};
use crate::user::User;

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PasswordBody {
    #[validate(length(min = 1, message = "Current password is required."))]
    old_password: String,
    #[validate(
        length(
            min = 8,
            max = 255,
            message = "Password must contain at least 8 characters."
        ),
        custom(
            function = "crate::router::validate_password",
            message = "Password is too weak."
        )
    )]
    new_password: String,
}

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // `GET /users/@me` returns current profile.
        .route("/@me", get(me))
        // `PATCH /users/@me/password` changes password.
        .route("/@me/password", patch(change_password))
        .route_layer(middleware::from_fn_with_state(
            state,
            crate::middleware::require_session,
        ))
}

async fn me(Extension(user): Extension<User>) -> Json<User> {
    Json(user)
}

async fn change_password(
    State(state): State<AppState>,
    Extension(user): Extension<User>,
    Valid(body): Valid<PasswordBody>,
) -> Result<Json<Message>> {
    state
        .sessions
        .change_password(&user, &body.old_password, &body.new_password)
        .await?;

    Ok(Message::new("Password updated successfully."))
}
