use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use casework_backend::{Filter, Row, Select, select_by_id};
use casework_contracts::requests::{SearchQuery, normalize_search_query};
use casework_contracts::{APPLICATIONS_TABLE, FIELD_VISITS_TABLE, VisitOutcome};
use serde::Serialize;
use serde_json::Value;

use super::field::attach_workers;
use super::{ApiError, AppState, data, invalid_query, not_found, upstream_error};

const SEARCH_COLUMNS: [&str; 4] = ["full_name", "property_address", "phone", "email"];

pub(super) async fn search(
    State(state): State<AppState>,
    query: Result<Query<SearchQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(invalid_query)?;
    let Some(needle) = normalize_search_query(query.q.as_deref()) else {
        return Ok(data(Vec::<Row>::new()));
    };

    let rows = state
        .backend
        .restricted()
        .select(
            &Select::from(APPLICATIONS_TABLE)
                .filter(Filter::ilike_any(&SEARCH_COLUMNS, &needle))
                .order_desc("created_at")
                .limit(state.config.search_limit),
        )
        .await
        .map_err(|err| upstream_error("failed to search applicants", &err))?;

    Ok(data(rows))
}

#[derive(Debug, Default, PartialEq, Eq, Serialize)]
struct VisitStats {
    total: usize,
    engagements: usize,
    attempts: usize,
}

impl VisitStats {
    fn from_rows(rows: &[Row]) -> Self {
        let mut stats = Self {
            total: rows.len(),
            ..Self::default()
        };
        for row in rows {
            match row
                .get("outcome")
                .and_then(Value::as_str)
                .and_then(VisitOutcome::parse)
            {
                Some(VisitOutcome::Engagement) => stats.engagements += 1,
                Some(VisitOutcome::Attempt) => stats.attempts += 1,
                None => {}
            }
        }
        stats
    }
}

#[derive(Debug, Serialize)]
struct VisitHistory {
    applicant: Row,
    visits: Vec<Row>,
    stats: VisitStats,
}

pub(super) async fn visit_history(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let backend = state.backend.elevated();

    let applicant = select_by_id(backend, APPLICATIONS_TABLE, &id)
        .await
        .map_err(|err| upstream_error("failed to load applicant", &err))?
        .ok_or_else(|| not_found("applicant not found"))?;

    let visits = backend
        .select(
            &Select::from(FIELD_VISITS_TABLE)
                .eq("applicant_id", id.as_str())
                .order_desc("visit_date"),
        )
        .await
        .map_err(|err| upstream_error("failed to load applicant visits", &err))?;

    let stats = VisitStats::from_rows(&visits);
    let visits = attach_workers(backend, visits)
        .await
        .map_err(|err| upstream_error("failed to load visit workers", &err))?;

    Ok(data(VisitHistory {
        applicant,
        visits,
        stats,
    }))
}
