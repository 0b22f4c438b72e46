//! Public intake and the case-record endpoints over `applications`.

use axum::Json;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::IntoResponse;
use casework_backend::{Filter, Row, Select, select_by_id};
use casework_contracts::APPLICATIONS_TABLE;
use casework_contracts::requests::{
    ApplicationListQuery, IntakeForm, SubmissionMeta, sanitize_application_patch,
};
use serde::Serialize;
use serde_json::Value;

use super::{
    ApiError, AppState, created, data, encode_row, invalid_json, invalid_query, invalid_request,
    not_found, now_rfc3339, upstream_error, written,
};

#[derive(Debug, Serialize)]
struct ApplicationList {
    data: Vec<Row>,
    count: usize,
}

pub(super) async fn create_application(
    State(state): State<AppState>,
    headers: HeaderMap,
    req: Result<Json<IntakeForm>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(form) = req.map_err(invalid_json)?;
    let meta = SubmissionMeta {
        ip_address: client_ip(&headers),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.to_string()),
    };
    let applicant = form.into_new_applicant(meta).map_err(invalid_request)?;

    let stored = state
        .backend
        .restricted()
        .insert(APPLICATIONS_TABLE, encode_row(&applicant)?)
        .await
        .map_err(|err| upstream_error("failed to submit application", &err))?;

    let application_id = stored
        .get("id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    tracing::info!(
        application_id,
        source = applicant.source.as_str(),
        "application.created"
    );
    Ok(created(stored))
}

pub(super) async fn list_applications(
    State(state): State<AppState>,
    query: Result<Query<ApplicationListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(invalid_query)?;
    let status = query.validate().map_err(invalid_request)?;

    let mut select = Select::from(APPLICATIONS_TABLE)
        .order_desc("created_at")
        .limit(state.config.list_limit);
    if let Some(status) = status {
        select = select.eq("status", status.as_str());
    }

    let rows = state
        .backend
        .restricted()
        .select(&select)
        .await
        .map_err(|err| upstream_error("failed to load applications", &err))?;

    Ok(Json(ApplicationList {
        count: rows.len(),
        data: rows,
    }))
}

pub(super) async fn get_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let row = select_by_id(state.backend.restricted(), APPLICATIONS_TABLE, &id)
        .await
        .map_err(|err| upstream_error("failed to load application", &err))?
        .ok_or_else(|| not_found("application not found"))?;
    Ok(data(row))
}

pub(super) async fn update_application(
    State(state): State<AppState>,
    Path(id): Path<String>,
    req: Result<Json<Value>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = req.map_err(invalid_json)?;
    let patch = sanitize_application_patch(body, &now_rfc3339()).map_err(invalid_request)?;

    let updated = state
        .backend
        .restricted()
        .update(APPLICATIONS_TABLE, &[Filter::eq("id", id.as_str())], patch)
        .await
        .map_err(|err| upstream_error("failed to update application", &err))?;

    let row = updated
        .into_iter()
        .next()
        .ok_or_else(|| not_found("application not found"))?;
    Ok((StatusCode::OK, written(row)))
}

/// First `x-forwarded-for` hop, then `x-real-ip`, then `unknown`.
fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim())
        .filter(|v| !v.is_empty());

    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    };

    forwarded
        .or_else(real_ip)
        .unwrap_or("unknown")
        .to_string()
}
