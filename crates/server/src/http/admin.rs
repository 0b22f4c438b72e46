//! Staff account provisioning across the identity provider and `user_profiles`.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use casework_backend::Select;
use casework_contracts::USER_PROFILES_TABLE;
use casework_contracts::requests::CreateUserRequest;

use super::{
    ApiError, AppState, created, data, encode_row, invalid_json, invalid_request, json_error,
    upstream_error,
};
use crate::metrics;

pub(super) async fn list_users(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .backend
        .elevated()
        .select(&Select::from(USER_PROFILES_TABLE).order_asc("full_name"))
        .await
        .map_err(|err| upstream_error("failed to load users", &err))?;
    Ok(data(rows))
}

/// Creates the identity account first, then the profile row. A failed
/// profile insert deletes the identity account again.
pub(super) async fn create_user(
    State(state): State<AppState>,
    req: Result<Json<CreateUserRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req.map_err(invalid_json)?;
    let account = req.validate().map_err(invalid_request)?;

    let user = state
        .identity
        .admin_create_user(&account.email, &account.password, &account.full_name)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "admin.identity_create_failed");
            if err.is_rejected() {
                return json_error(
                    StatusCode::BAD_REQUEST,
                    "ERR_INVALID_REQUEST",
                    "identity provider rejected the account",
                    Some(err.message),
                );
            }
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_UPSTREAM",
                "failed to create identity account",
                Some(err.message),
            )
        })?;

    let profile = account.profile_row(&user.id);
    let insert = match encode_row(&profile) {
        Ok(row) => state
            .backend
            .elevated()
            .insert(USER_PROFILES_TABLE, row)
            .await
            .map_err(|err| err.details()),
        Err(_) => Err("profile row could not be encoded".to_string()),
    };

    let stored = match insert {
        Ok(stored) => stored,
        Err(details) => {
            tracing::warn!(user_id = %user.id, error = %details, "admin.profile_insert_failed");
            return Err(compensate(&state, &user.id, details).await);
        }
    };

    tracing::info!(
        user_id = %user.id,
        role = account.role.as_str(),
        "admin.user_created"
    );
    Ok(created(stored))
}

/// Deletes the identity account whose profile insert failed and builds the
/// error the caller sees.
async fn compensate(state: &AppState, user_id: &str, details: String) -> ApiError {
    match state.identity.admin_delete_user(user_id).await {
        Ok(()) => {
            metrics::observe_compensation("success");
            tracing::info!(user_id, "admin.identity_account_rolled_back");
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_UPSTREAM",
                "failed to create user profile",
                Some(details),
            )
        }
        Err(err) => {
            metrics::observe_compensation("failed");
            tracing::error!(
                user_id,
                error = %err,
                "admin.orphaned_identity_account"
            );
            json_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "ERR_COMPENSATION_FAILED",
                "failed to create user profile and to remove the identity account",
                Some(details),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use casework_backend::memory::Operation;
    use serde_json::{Value, json};

    use super::super::test_support::spawn_app;
    use super::*;

    #[tokio::test]
    async fn create_user_provisions_account_and_profile() {
        let app = spawn_app().await;

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({
                "email": "New.Worker@Example.org",
                "password": "secret1",
                "full_name": "New Worker"
            }))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("json body");
        let profile = &body["data"];
        assert_eq!(profile["email"], "new.worker@example.org");
        assert_eq!(profile["role"], "field_worker");
        assert_eq!(profile["is_active"], true);
        assert_eq!(profile["can_field_intake"], true);
        assert_eq!(profile["can_access_dashboard"], false);

        let id = profile["id"].as_str().unwrap_or_default();
        assert!(app.identity.contains_user(id));
        assert_eq!(app.identity.full_name(id).as_deref(), Some("New Worker"));
    }

    #[tokio::test]
    async fn short_password_fails_before_any_external_call() {
        let app = spawn_app().await;

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({"email": "a@example.org", "password": "12345", "full_name": "A"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(app.identity.calls(), 0);
        assert_eq!(app.elevated.calls(), 0);
    }

    #[tokio::test]
    async fn provider_refusal_is_a_bad_request_with_its_message() {
        let app = spawn_app().await;
        app.identity.add_user("taken@example.org", "secret1");

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({"email": "Taken@example.org", "password": "secret1", "full_name": "T"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_INVALID_REQUEST");
        assert_eq!(
            body["details"],
            "A user with this email address has already been registered"
        );
        assert!(app.elevated.rows(USER_PROFILES_TABLE).is_empty());
        assert_eq!(app.identity.user_count(), 1);
    }

    #[tokio::test]
    async fn provider_outage_is_an_upstream_error() {
        let app = spawn_app().await;
        app.identity.set_unavailable(true);

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({"email": "a@example.org", "password": "secret1", "full_name": "A"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_UPSTREAM");
        assert!(body["details"].is_string());
        assert!(app.elevated.rows(USER_PROFILES_TABLE).is_empty());
    }

    #[tokio::test]
    async fn profile_failure_deletes_identity_account() {
        let app = spawn_app().await;
        app.elevated.fail_on(Operation::Insert, USER_PROFILES_TABLE);

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({"email": "a@example.org", "password": "secret1", "full_name": "A"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_UPSTREAM");
        assert_eq!(app.identity.user_count(), 0);
    }

    #[tokio::test]
    async fn failed_compensation_is_a_distinct_fault() {
        let app = spawn_app().await;
        app.elevated.fail_on(Operation::Insert, USER_PROFILES_TABLE);
        app.identity.fail_delete(true);

        let response = app
            .client
            .post(app.url("/admin/users"))
            .json(&json!({"email": "a@example.org", "password": "secret1", "full_name": "A"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_COMPENSATION_FAILED");
        assert_eq!(app.identity.user_count(), 1);
    }

    #[tokio::test]
    async fn list_users_sorted_by_name() {
        let app = spawn_app().await;
        app.elevated
            .seed(USER_PROFILES_TABLE, json!({"id": "u1", "full_name": "Zoe"}));
        app.elevated
            .seed(USER_PROFILES_TABLE, json!({"id": "u2", "full_name": "Abe"}));

        let body: Value = app
            .client
            .get(app.url("/admin/users"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"][0]["full_name"], "Abe");
        assert_eq!(body["data"][1]["full_name"], "Zoe");
    }
}
