//! Field visits, case events, and the worker directory.

use std::collections::{BTreeSet, HashMap};

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use casework_backend::{BackendError, Filter, Persistence, Row, Select, from_rows, select_by_id};
use casework_contracts::requests::{
    CaseEventFilter, CaseEventInput, FieldVisitInput, VisitListQuery, sanitize_visit_patch,
};
use casework_contracts::{
    CASE_EVENTS_TABLE, FIELD_VISITS_TABLE, Role, USER_PROFILES_TABLE, UserProfile,
};
use serde::Serialize;
use serde_json::{Value, json};

use super::{
    ApiError, AppState, created, data, encode_row, internal_error, invalid_json, invalid_query,
    invalid_request, not_found, now_rfc3339, upstream_error, written,
};

pub(super) async fn create_case_event(
    State(state): State<AppState>,
    req: Result<Json<CaseEventInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = req.map_err(invalid_json)?;
    let event = input.validate(&now_rfc3339()).map_err(invalid_request)?;

    let stored = state
        .backend
        .restricted()
        .insert(CASE_EVENTS_TABLE, encode_row(&event)?)
        .await
        .map_err(|err| upstream_error("failed to create case event", &err))?;

    tracing::info!(
        applicant_id = %event.applicant_id,
        event_type = event.event_type.as_str(),
        "case_event.created"
    );
    Ok(created(stored))
}

pub(super) async fn list_case_events(
    State(state): State<AppState>,
    query: Result<Query<CaseEventFilter>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(filter) = query.map_err(invalid_query)?;
    let filter = filter.normalized();

    let mut select = Select::from(CASE_EVENTS_TABLE).order_desc("event_date");
    if let Some(applicant_id) = filter.applicant_id.as_deref() {
        select = select.eq("applicant_id", applicant_id);
    }
    if let Some(client_id) = filter.client_id.as_deref() {
        select = select.eq("client_id", client_id);
    }

    let rows = state
        .backend
        .restricted()
        .select(&select)
        .await
        .map_err(|err| upstream_error("failed to load case events", &err))?;
    Ok(data(rows))
}

pub(super) async fn dashboard_visits(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = state.backend.elevated();
    let rows = backend
        .select(&Select::from(FIELD_VISITS_TABLE).order_desc("visit_date"))
        .await
        .map_err(|err| upstream_error("failed to load field visits", &err))?;

    let rows = attach_workers(backend, rows)
        .await
        .map_err(|err| upstream_error("failed to load visit workers", &err))?;
    Ok(data(rows))
}

pub(super) async fn list_worker_visits(
    State(state): State<AppState>,
    query: Result<Query<VisitListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(invalid_query)?;
    let (user_id, limit) = query.validate().map_err(invalid_request)?;

    let rows = state
        .backend
        .elevated()
        .select(
            &Select::from(FIELD_VISITS_TABLE)
                .eq("staff_member", user_id.as_str())
                .order_desc("visit_date")
                .limit(limit),
        )
        .await
        .map_err(|err| upstream_error("failed to load visits", &err))?;
    Ok(data(rows))
}

pub(super) async fn create_visit(
    State(state): State<AppState>,
    req: Result<Json<FieldVisitInput>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(input) = req.map_err(invalid_json)?;
    let visit = input.validate(&now_rfc3339()).map_err(invalid_request)?;

    let stored = state
        .backend
        .elevated()
        .insert(FIELD_VISITS_TABLE, encode_row(&visit)?)
        .await
        .map_err(|err| upstream_error("failed to log visit", &err))?;

    tracing::info!(
        staff_member = %visit.staff_member,
        outcome = visit.outcome.as_str(),
        "field_visit.created"
    );
    Ok(created(stored))
}

pub(super) async fn get_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let row = select_by_id(state.backend.elevated(), FIELD_VISITS_TABLE, &id)
        .await
        .map_err(|err| upstream_error("failed to load visit", &err))?
        .ok_or_else(|| not_found("visit not found"))?;
    Ok(data(row))
}

pub(super) async fn update_visit(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = req.map_err(invalid_json)?;
    let patch = sanitize_visit_patch(body, &now_rfc3339()).map_err(invalid_request)?;

    let updated = state
        .backend
        .elevated()
        .update(FIELD_VISITS_TABLE, &[Filter::eq("id", id.as_str())], patch)
        .await
        .map_err(|err| upstream_error("failed to update visit", &err))?;

    let row = updated
        .into_iter()
        .next()
        .ok_or_else(|| not_found("visit not found"))?;
    Ok(written(row))
}

/// Roles listed in the worker directory.
const DIRECTORY_ROLES: [Role; 3] = [Role::Staff, Role::Admin, Role::Volunteer];

#[derive(Debug, Serialize)]
struct WorkerSummary {
    id: String,
    full_name: Option<String>,
    email: Option<String>,
    role: String,
}

pub(super) async fn list_workers(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let rows = state
        .backend
        .elevated()
        .select(
            &Select::from(USER_PROFILES_TABLE)
                .eq("is_active", true)
                .filter(Filter::is_in("role", DIRECTORY_ROLES.map(Role::as_str)))
                .order_asc("full_name"),
        )
        .await
        .map_err(|err| upstream_error("failed to load workers", &err))?;

    let profiles = from_rows::<UserProfile>(rows).map_err(|err| {
        tracing::error!(error = %err, "user profile row failed to decode");
        internal_error()
    })?;

    let workers = profiles
        .into_iter()
        .map(|profile| WorkerSummary {
            id: profile.id,
            full_name: profile.full_name,
            email: profile.email,
            role: profile.role,
        })
        .collect::<Vec<_>>();
    Ok(data(workers))
}

/// Adds a `worker` object (`full_name`, `email`) to each visit row, looked up
/// by `staff_member` in one query. Unknown workers get `null`.
pub(super) async fn attach_workers(
    backend: &dyn Persistence,
    rows: Vec<Row>,
) -> Result<Vec<Row>, BackendError> {
    let staff_ids = rows
        .iter()
        .filter_map(|row| row.get("staff_member").and_then(Value::as_str))
        .map(|id| id.to_string())
        .collect::<BTreeSet<_>>();

    let mut workers = HashMap::new();
    if !staff_ids.is_empty() {
        let profiles = backend
            .select(&Select::from(USER_PROFILES_TABLE).filter(Filter::is_in("id", staff_ids)))
            .await?;
        for profile in profiles {
            let Some(id) = profile.get("id").and_then(Value::as_str) else {
                continue;
            };
            workers.insert(
                id.to_string(),
                json!({
                    "full_name": profile.get("full_name").cloned().unwrap_or(Value::Null),
                    "email": profile.get("email").cloned().unwrap_or(Value::Null),
                }),
            );
        }
    }

    Ok(rows
        .into_iter()
        .map(|mut row| {
            let worker = row
                .get("staff_member")
                .and_then(Value::as_str)
                .and_then(|id| workers.get(id))
                .cloned()
                .unwrap_or(Value::Null);
            row.insert("worker".to_string(), worker);
            row
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::super::test_support::spawn_app;
    use super::*;

    #[tokio::test]
    async fn case_event_create_defaults_date_and_marks_milestones() {
        let app = spawn_app().await;

        let response = app
            .client
            .post(app.url("/case-events"))
            .json(&json!({
                "applicant_id": "app-1",
                "event_type": "milestone",
                "title": "Title cleared"
            }))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["data"]["is_milestone"], true);
        assert!(body["data"]["event_date"].is_string());

        let response = app
            .client
            .post(app.url("/case-events"))
            .json(&json!({"applicant_id": "app-1", "event_type": "note"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(app.restricted.rows(CASE_EVENTS_TABLE).len(), 1);
    }

    #[tokio::test]
    async fn case_events_filter_by_applicant_and_client() {
        let app = spawn_app().await;
        app.restricted.seed(
            CASE_EVENTS_TABLE,
            json!({"applicant_id": "a1", "client_id": "c1", "event_date": "2026-01-01"}),
        );
        app.restricted.seed(
            CASE_EVENTS_TABLE,
            json!({"applicant_id": "a1", "event_date": "2026-03-01"}),
        );
        app.restricted
            .seed(CASE_EVENTS_TABLE, json!({"applicant_id": "a2"}));

        let body: Value = app
            .client
            .get(app.url("/case-events?applicant_id=a1"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"].as_array().map(Vec::len), Some(2));
        assert_eq!(body["data"][0]["event_date"], "2026-03-01");

        let body: Value = app
            .client
            .get(app.url("/case-events?applicant_id=a1&client_id=c1"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));

        let body: Value = app
            .client
            .get(app.url("/case-events"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn worker_visit_lifecycle() {
        let app = spawn_app().await;

        let response = app
            .client
            .post(app.url("/worker/visits"))
            .json(&json!({
                "staff_member": "w1",
                "outcome": "engagement",
                "contact_name": "Pat",
                "follow_up_needed": true
            }))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("json body");
        let visit_id = body["data"]["id"].as_str().unwrap_or_default().to_string();
        assert_eq!(body["data"]["visit_type"], "in_person");

        let body: Value = app
            .client
            .get(app.url("/worker/visits?userId=w1&limit=500"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"][0]["id"], visit_id.as_str());

        let response = app
            .client
            .get(app.url("/worker/visits"))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let response = app
            .client
            .patch(app.url(&format!("/worker/visits/{}", visit_id)))
            .json(&json!({"admin_notes": "checked", "staff_member": "w2"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["data"]["admin_notes"], "checked");
        assert_eq!(body["data"]["staff_member"], "w1");

        let body: Value = app
            .client
            .get(app.url(&format!("/worker/visits/{}", visit_id)))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"]["admin_notes"], "checked");
    }

    #[tokio::test]
    async fn visit_patch_with_only_disallowed_fields_mutates_nothing() {
        let app = spawn_app().await;
        app.elevated.seed(
            FIELD_VISITS_TABLE,
            json!({"id": "v1", "staff_member": "w1", "outcome": "attempt"}),
        );
        let calls_before = app.elevated.calls();

        let response = app
            .client
            .patch(app.url("/worker/visits/v1"))
            .json(&json!({"staff_member": "w2"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["error"], "no valid fields to update");
        assert_eq!(app.elevated.calls(), calls_before);
        assert_eq!(app.elevated.rows(FIELD_VISITS_TABLE)[0]["staff_member"], "w1");
    }

    #[tokio::test]
    async fn dashboard_lists_all_visits_with_worker_names() {
        let app = spawn_app().await;
        app.elevated.seed(
            USER_PROFILES_TABLE,
            json!({"id": "w1", "full_name": "Wendy", "email": "wendy@example.org"}),
        );
        app.elevated.seed(
            FIELD_VISITS_TABLE,
            json!({"id": "v1", "staff_member": "w1", "visit_date": "2026-01-02"}),
        );
        app.elevated.seed(
            FIELD_VISITS_TABLE,
            json!({"id": "v2", "staff_member": "w1", "visit_date": "2026-04-02"}),
        );

        let body: Value = app
            .client
            .get(app.url("/dashboard/field-visits"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"][0]["id"], "v2");
        assert_eq!(body["data"][1]["worker"]["full_name"], "Wendy");
    }

    #[tokio::test]
    async fn workers_are_active_directory_roles_sorted_by_name() {
        let app = spawn_app().await;
        for (id, name, role, active) in [
            ("u1", "Zed", "staff", true),
            ("u2", "Amy", "volunteer", true),
            ("u3", "Bob", "admin", false),
            ("u4", "Cat", "field_worker", true),
        ] {
            app.elevated.seed(
                USER_PROFILES_TABLE,
                json!({"id": id, "full_name": name, "role": role, "is_active": active,
                       "email": format!("{}@example.org", id)}),
            );
        }

        let body: Value = app
            .client
            .get(app.url("/workers"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        let names = body["data"]
            .as_array()
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| r["full_name"].as_str().map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        assert_eq!(names, vec!["Amy", "Zed"]);
        assert_eq!(body["data"][0]["role"], "volunteer");
    }
}
