//! GitHub OAuth login flow.
//!
//! Three routes: `/auth/github/login` redirects the browser to GitHub,
//! `/auth/github/callback` exchanges the returned code for an access
//! token, resolves the user profile, and sets the `session` cookie, and
//! `/auth/github/get_user` reports the claims behind the current cookie.
//! Every failure along the exchange turns into a JSON error body instead
//! of a redirect, so the frontend can surface it.

use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::auth::{AuthError, TokenOutcome};
use crate::server::{session_cookie, AppState};

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

/// Budget for each round trip to GitHub.
const EXCHANGE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
enum OAuthError {
    #[error("github oauth is not configured")]
    NotConfigured,

    #[error("github oauth took too much time")]
    Timeout,

    #[error("github oauth request failed: {0}")]
    Exchange(String),

    #[error("access token not found in github response")]
    MissingAccessToken,

    #[error("failed to issue session token: {0}")]
    Issue(#[from] AuthError),
}

fn map_reqwest(e: reqwest::Error) -> OAuthError {
    if e.is_timeout() {
        OAuthError::Timeout
    } else {
        OAuthError::Exchange(e.to_string())
    }
}

/// `GET /auth/github/login`: redirect the browser into GitHub's flow.
pub async fn github_login(State(state): State<AppState>) -> Response {
    let Some(client_id) = state.secrets.github_client_id.as_deref() else {
        return error_body(&OAuthError::NotConfigured.to_string());
    };
    Redirect::temporary(&authorize_url(client_id)).into_response()
}

fn authorize_url(client_id: &str) -> String {
    format!(
        "{GITHUB_AUTHORIZE_URL}?client_id={client_id}\
         &scope=read%3Auser%20user%3Aemail&allow_signup=false"
    )
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    code: Option<String>,
}

/// `GET /auth/github/callback`: finish the flow and set the cookie.
pub async fn github_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
) -> Response {
    let Some(code) = params.code else {
        return error_body("missing 'code' query parameter");
    };

    match exchange_and_issue(&state, &code).await {
        Ok(token) => {
            let cookie = session_set_cookie(&token, state.validator.ttl());
            let home = format!(
                "{}/",
                state.config.gateway.frontend_url.trim_end_matches('/')
            );
            (
                AppendHeaders([(SET_COOKIE, cookie)]),
                Redirect::temporary(&home),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "github oauth exchange failed");
            error_body(&e.to_string())
        }
    }
}

/// `GET /auth/github/get_user`: claims behind the current `session` cookie.
pub async fn get_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let Some(token) = session_cookie(&headers) else {
        return error_body("no session");
    };
    match state.validator.validate(&token) {
        TokenOutcome::Valid(claims) => {
            Json(json!({ "success": true, "user": claims })).into_response()
        }
        TokenOutcome::Expired | TokenOutcome::Invalid => error_body("invalid or expired token"),
    }
}

fn error_body(error: &str) -> Response {
    Json(json!({ "success": false, "error": error })).into_response()
}

fn session_set_cookie(token: &str, ttl: Duration) -> String {
    format!(
        "session={token}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        ttl.as_secs()
    )
}

#[derive(Debug, Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    primary: bool,
    verified: bool,
}

/// Runs the code-for-token exchange and mints a session token.
async fn exchange_and_issue(state: &AppState, code: &str) -> Result<String, OAuthError> {
    let (Some(client_id), Some(client_secret)) = (
        state.secrets.github_client_id.as_deref(),
        state.secrets.github_client_secret.as_deref(),
    ) else {
        return Err(OAuthError::NotConfigured);
    };

    let response: AccessTokenResponse = state
        .http
        .post(GITHUB_TOKEN_URL)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(&[
            ("client_id", client_id),
            ("client_secret", client_secret),
            ("code", code),
        ])
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await
        .map_err(map_reqwest)?
        .error_for_status()
        .map_err(map_reqwest)?
        .json()
        .await
        .map_err(map_reqwest)?;

    let access_token = response
        .access_token
        .ok_or(OAuthError::MissingAccessToken)?;

    let user: GithubUser = github_get(state, GITHUB_USER_URL, &access_token)
        .await?
        .json()
        .await
        .map_err(map_reqwest)?;

    // Email scope can be granted without any verified primary address;
    // the claim just stays empty then.
    let email = match github_get(state, GITHUB_EMAILS_URL, &access_token).await {
        Ok(response) => response
            .json::<Vec<GithubEmail>>()
            .await
            .ok()
            .and_then(|emails| {
                emails
                    .into_iter()
                    .find(|e| e.primary && e.verified)
                    .map(|e| e.email)
            }),
        Err(e) => {
            tracing::debug!(error = %e, "email lookup failed, issuing token without email");
            None
        }
    };

    let name = user.name.unwrap_or_else(|| user.login.clone());
    Ok(state.validator.issue(&user.login, Some(name), email)?)
}

async fn github_get(
    state: &AppState,
    url: &str,
    access_token: &str,
) -> Result<reqwest::Response, OAuthError> {
    state
        .http
        .get(url)
        .header(
            reqwest::header::AUTHORIZATION,
            format!("token {access_token}"),
        )
        .header(reqwest::header::ACCEPT, "application/vnd.github.v3+json")
        .timeout(EXCHANGE_TIMEOUT)
        .send()
        .await
        .map_err(map_reqwest)?
        .error_for_status()
        .map_err(map_reqwest)
}
