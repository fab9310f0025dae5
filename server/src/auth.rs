// Copyright (c) 2025 sbksba
//
// This software is licensed under the terms of the MIT License.
// See the LICENSE file in the project root for the full license text.
use crate::config::BootstrapAdmin;
use crate::database::{SessionStore, UserStore};
use crate::handlers::AppError;
use crate::routes::AppState;

use anyhow::Result;
use axum::extract::FromRequestParts;
use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use chrono::{DateTime, Duration, Local, Utc};
use common::{Actor, NewUser, Role, User, UserId};
use tracing::{debug, info};
use uuid::Uuid;

/// Cookie carrying the session token.
pub const ACCESS_TOKEN_COOKIE: &str = "accessToken";

/// How long an issued token stays valid.
pub const SESSION_TTL_HOURS: i64 = 24;

/// The authenticated caller, resolved from the presented session token.
#[derive(Debug, Clone)]
pub struct CurrentActor {
    pub actor: Actor,
    pub token: String,
}

impl FromRequestParts<AppState> for CurrentActor {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers).ok_or_else(|| {
            AppError::new(
                StatusCode::UNAUTHORIZED,
                "Token not found, please login first.",
            )
        })?;

        let user = state
            .store
            .find_session_user(&token, state.clock.now_utc())
            .await?
            .ok_or_else(|| {
                AppError::new(StatusCode::UNAUTHORIZED, "Invalid or expired session.")
            })?;

        debug!("Request authenticated as user {} ({})", user.id, user.role);
        Ok(CurrentActor {
            actor: Actor::from(&user),
            token,
        })
    }
}

/// Reads the token from `Authorization: Bearer`, falling back to the cookie.
pub fn session_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, value)| *name == ACCESS_TOKEN_COOKIE && !value.is_empty())
        .map(|(_, value)| value.to_string())
}

/// Creates a new opaque session token for `user_id`, valid for a day from `now`.
pub async fn issue_session<S>(store: &S, user_id: UserId, now: DateTime<Utc>) -> Result<String>
where
    S: SessionStore + ?Sized,
{
    let token = Uuid::new_v4().simple().to_string();
    let expires_at = now + Duration::hours(SESSION_TTL_HOURS);
    store.create_session(&token, user_id, expires_at).await?;
    info!("Issued session for user {} until {}", user_id, expires_at);
    Ok(token)
}

/// `Set-Cookie` value that makes the browser drop the session cookie.
pub fn clear_session_cookie() -> String {
    format!("{ACCESS_TOKEN_COOKIE}=; Path=/; Max-Age=0; HttpOnly; SameSite=Lax")
}

/// Creates the first administrator when no user exists yet.
///
/// Returns the administrator and its session token, or `None` when users
/// already exist.
pub async fn bootstrap_admin<S>(
    store: &S,
    admin: &BootstrapAdmin,
    now: DateTime<Utc>,
) -> Result<Option<(User, String)>>
where
    S: UserStore + SessionStore + ?Sized,
{
    if store.count_users().await? > 0 {
        return Ok(None);
    }

    let Some(user) = store
        .insert_user(NewUser {
            emp_id: 1,
            name: admin.name.clone(),
            email: admin.email.clone(),
            role: Role::Admin,
            reports_to: None,
            joining_date: Local::now().date_naive(),
        })
        .await?
    else {
        return Ok(None);
    };
    let token = issue_session(store, user.id, now).await?;
    Ok(Some((user, token)))
}
