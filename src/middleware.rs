//! Middlewares for routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::bearer;

/// Resolve the bearer access token into a [`crate::user::User`] extension.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response> {
    let token = bearer(req.headers())
        .map(str::to_owned)
        .ok_or(ServerError::Unauthorized)?;

    let user = state.sessions.authenticate(&token).await?;
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}
