//! Registration, login and password recovery endpoints under `/auth`.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::AppState;
use crate::error::{Result, ServerError};
use crate::router::{Message, Valid, bearer};
use crate::session::NewAccount;
use crate::token::TokenError;
use crate::user::User;

pub const TOKEN_TYPE: &str = "Bearer";

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SignupBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
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
    password: String,
    #[validate(length(min = 1, max = 50, message = "First name is required."))]
    first_name: String,
    #[validate(length(min = 1, max = 50, message = "Last name is required."))]
    last_name: String,
    #[validate(length(min = 5, max = 20, message = "Phone number is invalid."))]
    phone_number: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct CodeBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
    #[validate(length(equal = 6, message = "Code must contain 6 digits."))]
    code: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
    #[validate(length(min = 1, message = "Password is required."))]
    password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct PasswordBody {
    #[validate(email(message = "Email must be formatted."))]
    email: String,
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
    password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_in: u64,
    #[serde(flatten)]
    pub user: User,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/signup", post(signup))
        .route("/verify-email", post(verify_email))
        .route("/resendCode", post(resend_code))
        .route("/login", post(login))
        .route("/logout", post(logout))
        .route("/refresh-token", post(refresh_token))
        .route("/forgot-password", post(forgot_password))
        .route("/verify-code", post(verify_code))
        .route("/update-password", post(update_password))
}

async fn signup(
    State(state): State<AppState>,
    Valid(body): Valid<SignupBody>,
) -> Result<(StatusCode, Json<Message>)> {
    state
        .sessions
        .signup(NewAccount {
            email: body.email,
            password: body.password,
            first_name: body.first_name,
            last_name: body.last_name,
            phone_number: body.phone_number,
        })
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Message::new("A verification code has been sent to your email."),
    ))
}

async fn verify_email(
    State(state): State<AppState>,
    Valid(body): Valid<CodeBody>,
) -> Result<(StatusCode, Json<Message>)> {
    state.sessions.verify_email(&body.email, &body.code).await?;

    Ok((StatusCode::CREATED, Message::new("Email verified successfully.")))
}

async fn resend_code(
    State(state): State<AppState>,
    Valid(body): Valid<EmailBody>,
) -> Result<Json<Message>> {
    state.sessions.resend_code(&body.email).await?;

    Ok(Message::new("A new verification code has been sent."))
}

async fn login(
    State(state): State<AppState>,
    Valid(body): Valid<LoginBody>,
) -> Result<Json<LoginResponse>> {
    let (pair, user) = state.sessions.login(&body.email, &body.password).await?;

    Ok(Json(LoginResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
        token_type: TOKEN_TYPE.to_owned(),
        expires_in: state.sessions.access_ttl(),
        user,
    }))
}

async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Message>> {
    let token = bearer(&headers).ok_or(ServerError::MissingToken)?;
    state.sessions.logout(token).await?;

    Ok(Message::new("Logged out successfully."))
}

async fn refresh_token(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<RefreshResponse>> {
    let token = bearer(&headers)
        .ok_or(ServerError::InvalidRefreshToken(TokenError::Malformed))?;
    let pair = state.sessions.refresh(token).await?;

    Ok(Json(RefreshResponse {
        access_token: pair.access_token,
        refresh_token: pair.refresh_token,
    }))
}

async fn forgot_password(
    State(state): State<AppState>,
    Valid(body): Valid<EmailBody>,
) -> Result<Json<Message>> {
    state.sessions.forgot_password(&body.email).await?;

    Ok(Message::new("A reset code has been sent to your email."))
}

async fn verify_code(
    State(state): State<AppState>,
    Valid(body): Valid<CodeBody>,
) -> Result<Json<Message>> {
    state
        .sessions
        .verify_reset_code(&body.email, &body.code)
        .await?;

    Ok(Message::new("Code verified."))
}

async fn update_password(
    State(state): State<AppState>,
    Valid(body): Valid<PasswordBody>,
) -> Result<Json<Message>> {
    state
        .sessions
        .update_password(&body.email, &body.password)
        .await?;

    Ok(Message::new("Password updated successfully."))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Method, Request, header};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::testing::{PASSWORD, harness, state};
    use crate::{app, make_request};

    const EMAIL: &str = "aigerim@example.kz";

    fn signup_body() -> String {
        json!({
            "email": EMAIL,
            "password": PASSWORD,
            "firstName": "Aigerim",
            "lastName": "Nurlanovna",
        })
        .to_string()
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    async fn with_bearer(
        app: Router,
        path: &str,
        token: &str,
    ) -> axum::response::Response {
        app.oneshot(
            Request::builder()
                .method(Method::POST)
                .uri(path)
                .header(header::AUTHORIZATION, format!("Bearer {token}"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_signup_verify_login() {
        let h = harness();
        let app = app(state(&h));

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/signup",
            signup_body(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let code = h.outbox.last_code(EMAIL).unwrap();
        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/verify-email",
            json!({ "email": EMAIL, "code": code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CREATED);

        let response = make_request(
            app,
            Method::POST,
            "/auth/login",
            json!({ "email": EMAIL, "password": PASSWORD }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert!(!body["accessToken"].as_str().unwrap().is_empty());
        assert_eq!(body["tokenType"], TOKEN_TYPE);
        assert_eq!(body["email"], EMAIL);
        assert_eq!(body["firstName"], "Aigerim");
        assert_eq!(body["isVerified"], true);
        assert!(body.get("user").is_none());
        assert!(body.get("password").is_none());
    }

    #[tokio::test]
    async fn test_signup_reports_every_invalid_field() {
        let h = harness();
        let response = make_request(
            app(state(&h)),
            Method::POST,
            "/auth/signup",
            json!({
                "email": "not-an-email",
                "password": "weak",
                "firstName": "",
                "lastName": "Nurlanovna",
            })
            .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = json_body(response).await;
        let fields: Vec<&str> = body["errors"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|error| error["field"].as_str())
            .collect();
        assert!(fields.contains(&"email"));
        assert!(fields.contains(&"password"));
        assert!(fields.contains(&"firstName"));
        assert!(h.outbox.sent().is_empty());
    }

    #[tokio::test]
    async fn test_signup_conflict() {
        let h = harness();
        crate::testing::verified_user(&h, EMAIL).await;

        let response = make_request(
            app(state(&h)),
            Method::POST,
            "/auth/signup",
            signup_body(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn test_login_failures() {
        let h = harness();
        let app = app(state(&h));

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/signup",
            signup_body(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let login = |password: &str, email: &str| {
            json!({ "email": email, "password": password }).to_string()
        };

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/login",
            login(PASSWORD, EMAIL),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/login",
            login("Wrong-Passw0rd", EMAIL),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = make_request(
            app,
            Method::POST,
            "/auth/login",
            login(PASSWORD, "nobody@example.kz"),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_verify_email_failures() {
        let h = harness();
        let app = app(state(&h));

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/verify-email",
            json!({ "email": EMAIL, "code": "123456" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        make_request(app.clone(), Method::POST, "/auth/signup", signup_body())
            .await;
        let code = h.outbox.last_code(EMAIL).unwrap();
        let wrong = if code == "123456" { "654321" } else { "123456" };

        let response = make_request(
            app,
            Method::POST,
            "/auth/verify-email",
            json!({ "email": EMAIL, "code": wrong }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_logout_rejects_token() {
        let h = harness();
        let app = app(state(&h));
        let pair = crate::testing::verified_user(&h, EMAIL).await;

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/users/@me")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {}", pair.access_token),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response =
            with_bearer(app.clone(), "/auth/logout", &pair.access_token).await;
        assert_eq!(response.status(), StatusCode::OK);

        // Ten minutes before expiry.
        h.clock.advance(h.sessions.access_ttl() - 600);
        let response = app
            .oneshot(
                Request::builder()
                    .uri("/users/@me")
                    .header(
                        header::AUTHORIZATION,
                        format!("Bearer {}", pair.access_token),
                    )
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_without_token() {
        let h = harness();
        let response =
            make_request(app(state(&h)), Method::POST, "/auth/logout", String::new())
                .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_refresh_token() {
        let h = harness();
        let app = app(state(&h));
        let pair = crate::testing::verified_user(&h, EMAIL).await;

        let response =
            with_bearer(app.clone(), "/auth/refresh-token", &pair.refresh_token)
                .await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["refreshToken"], pair.refresh_token.as_str());

        let response =
            with_bearer(app.clone(), "/auth/refresh-token", &pair.access_token)
                .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        h.clock.advance(60 * 60 * 24 * 15);
        let response =
            with_bearer(app, "/auth/refresh-token", &pair.refresh_token).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = json_body(response).await;
        assert!(body.get("accessToken").is_none());
    }

    #[tokio::test]
    async fn test_password_recovery() {
        let h = harness();
        let app = app(state(&h));
        crate::testing::verified_user(&h, EMAIL).await;

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/forgot-password",
            json!({ "email": EMAIL }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let code = h.outbox.last_code(EMAIL).unwrap();
        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/verify-code",
            json!({ "email": EMAIL, "code": code }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/update-password",
            json!({ "email": EMAIL, "password": "weak" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/update-password",
            json!({ "email": EMAIL, "password": "N3w_Password" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = make_request(
            app,
            Method::POST,
            "/auth/login",
            json!({ "email": EMAIL, "password": "N3w_Password" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_forgot_password_unknown_and_unverified() {
        let h = harness();
        let app = app(state(&h));

        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/forgot-password",
            json!({ "email": EMAIL }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        make_request(app.clone(), Method::POST, "/auth/signup", signup_body())
            .await;
        let response = make_request(
            app.clone(),
            Method::POST,
            "/auth/forgot-password",
            json!({ "email": EMAIL }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let response = make_request(
            app,
            Method::POST,
            "/auth/resendCode",
            json!({ "email": EMAIL }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
