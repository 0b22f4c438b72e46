use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use casework_auth::{AuthError, SessionTokens};
use casework_backend::{Backend, Filter, Row, from_row, select_by_id};
use casework_contracts::requests::LoginRequest;
use casework_contracts::{USER_PROFILES_TABLE, UserProfile};
use serde::Serialize;
use serde_json::Value;

use super::{
    ApiError, AppState, internal_error, invalid_json, invalid_request, json_error, now_rfc3339,
    upstream_error, written,
};
use crate::metrics;

#[derive(Debug, Serialize)]
struct SessionUser {
    id: String,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct SessionProfile {
    full_name: Option<String>,
    role: String,
    can_field_intake: bool,
    can_access_dashboard: bool,
}

#[derive(Debug, Serialize)]
struct LoginResponse {
    user: SessionUser,
    profile: SessionProfile,
    session: SessionTokens,
}

fn forbidden(message: &str) -> ApiError {
    json_error(StatusCode::FORBIDDEN, "ERR_FORBIDDEN", message, None)
}

fn sign_in_error(err: AuthError) -> ApiError {
    if err.is_invalid_credentials() {
        return json_error(
            StatusCode::UNAUTHORIZED,
            "ERR_UNAUTHORIZED",
            "invalid email or password",
            None,
        );
    }
    tracing::warn!(error = %err, "login.provider_failed");
    json_error(
        StatusCode::INTERNAL_SERVER_ERROR,
        "ERR_UPSTREAM",
        "identity provider request failed",
        Some(err.message),
    )
}

pub(super) async fn login(
    State(state): State<AppState>,
    req: Result<Json<LoginRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req.map_err(invalid_json)?;
    let credentials = req.validate().map_err(invalid_request)?;

    let signed_in = state
        .identity
        .sign_in_with_password(&credentials.email, &credentials.password)
        .await
        .map_err(sign_in_error)?;
    let user_id = signed_in.user.id;

    let row = select_by_id(state.backend.elevated(), USER_PROFILES_TABLE, &user_id)
        .await
        .map_err(|err| upstream_error("failed to load user profile", &err))?
        .ok_or_else(|| {
            tracing::warn!(user_id = %user_id, "login.profile_missing");
            forbidden("no profile exists for this account")
        })?;
    let profile = from_row::<UserProfile>(row).map_err(|err| {
        tracing::error!(user_id = %user_id, error = %err, "user profile row failed to decode");
        internal_error()
    })?;
    if !profile.is_active {
        tracing::info!(user_id = %user_id, "login.inactive_profile");
        return Err(forbidden("account is deactivated"));
    }

    stamp_last_login(state.backend.clone(), user_id.clone());

    tracing::info!(user_id = %user_id, role = %profile.role, "login.succeeded");
    Ok(written(LoginResponse {
        user: SessionUser {
            id: user_id,
            email: signed_in.user.email,
        },
        profile: SessionProfile {
            full_name: profile.full_name,
            role: profile.role,
            can_field_intake: profile.can_field_intake,
            can_access_dashboard: profile.can_access_dashboard,
        },
        session: signed_in.session,
    }))
}

/// Runs after the response is decided; failures only get logged.
fn stamp_last_login(backend: Backend, user_id: String) {
    tokio::spawn(async move {
        let mut patch = Row::new();
        patch.insert("last_login".to_string(), Value::String(now_rfc3339()));

        let result = backend
            .elevated()
            .update(
                USER_PROFILES_TABLE,
                &[Filter::eq("id", user_id.as_str())],
                patch,
            )
            .await;
        if let Err(err) = result {
            tracing::warn!(user_id = %user_id, error = %err, "login.last_login_failed");
            metrics::inc_best_effort_failure("last_login");
        }
    });
}
