//! Folds a duplicate applicant into a master record.
//!
//! The merge runs as an ordered list of steps. A required step that fails
//! aborts the merge; steps that already ran stay applied because the backend
//! offers no multi-statement transaction. Best-effort steps are logged and
//! skipped on failure.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use casework_backend::{
    BackendError, Filter, Persistence, Row, Select, from_row, from_rows, select_by_id,
};
use casework_contracts::requests::{MergePlan, MergeRequest};
use casework_contracts::{
    APPLICATION_DOCUMENTS_TABLE, APPLICATIONS_TABLE, Applicant, CASE_EVENTS_TABLE, CLIENTS_TABLE,
    Client, FIELD_VISITS_TABLE,
};
use serde_json::Value;

use super::{
    ApiError, AppState, internal_error, invalid_json, invalid_request, json_error, not_found,
    now_rfc3339, upstream_error, written,
};
use crate::metrics;

const MERGE_SEPARATOR: &str = "--- Merged from duplicate record ---";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepPolicy {
    Required,
    BestEffort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MergeStep {
    RepointVisits,
    RepointEvents,
    RepointDocuments,
    MigrateClient,
    WriteComments,
    DeleteDuplicate,
}

impl MergeStep {
    const ORDER: [MergeStep; 6] = [
        MergeStep::RepointVisits,
        MergeStep::RepointEvents,
        MergeStep::RepointDocuments,
        MergeStep::MigrateClient,
        MergeStep::WriteComments,
        MergeStep::DeleteDuplicate,
    ];

    fn as_str(self) -> &'static str {
        match self {
            MergeStep::RepointVisits => "repoint_visits",
            MergeStep::RepointEvents => "repoint_events",
            MergeStep::RepointDocuments => "repoint_documents",
            MergeStep::MigrateClient => "migrate_client",
            MergeStep::WriteComments => "write_comments",
            MergeStep::DeleteDuplicate => "delete_duplicate",
        }
    }

    fn policy(self) -> StepPolicy {
        match self {
            MergeStep::MigrateClient | MergeStep::WriteComments => StepPolicy::BestEffort,
            _ => StepPolicy::Required,
        }
    }
}

/// Joins master and duplicate comments. A side that is blank after trimming
/// counts as absent; when both are blank the master's text is kept as-is.
fn merge_comments(master: Option<&str>, duplicate: Option<&str>) -> String {
    fn present(text: Option<&str>) -> Option<&str> {
        text.filter(|t| !t.trim().is_empty())
    }

    match (present(master), present(duplicate)) {
        (Some(master), Some(duplicate)) => {
            format!("{}\n\n{}\n{}", master, MERGE_SEPARATOR, duplicate)
        }
        (Some(master), None) => master.to_string(),
        (None, Some(duplicate)) => duplicate.to_string(),
        (None, None) => master.unwrap_or_default().to_string(),
    }
}

struct Merge<'a> {
    backend: &'a dyn Persistence,
    plan: &'a MergePlan,
    master: &'a Applicant,
    duplicate: &'a Applicant,
}

impl Merge<'_> {
    async fn run(&self, step: MergeStep) -> Result<(), BackendError> {
        match step {
            MergeStep::RepointVisits => self.repoint(FIELD_VISITS_TABLE, "applicant_id").await,
            MergeStep::RepointEvents => self.repoint(CASE_EVENTS_TABLE, "applicant_id").await,
            MergeStep::RepointDocuments => {
                self.repoint(APPLICATION_DOCUMENTS_TABLE, "application_id")
                    .await
            }
            MergeStep::MigrateClient => self.migrate_client().await,
            MergeStep::WriteComments => self.write_comments().await,
            MergeStep::DeleteDuplicate => {
                self.backend
                    .delete(
                        APPLICATIONS_TABLE,
                        &[Filter::eq("id", self.plan.duplicate_id.as_str())],
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn repoint(&self, table: &str, column: &str) -> Result<(), BackendError> {
        let mut patch = Row::new();
        patch.insert(
            column.to_string(),
            Value::String(self.plan.master_id.clone()),
        );
        let moved = self
            .backend
            .update(
                table,
                &[Filter::eq(column, self.plan.duplicate_id.as_str())],
                patch,
            )
            .await?;
        tracing::debug!(table, moved = moved.len(), "merge.repointed");
        Ok(())
    }

    /// The duplicate's client moves over only when the master has none.
    async fn migrate_client(&self) -> Result<(), BackendError> {
        let master_clients = self
            .backend
            .select(
                &Select::from(CLIENTS_TABLE)
                    .eq("applicant_id", self.plan.master_id.as_str())
                    .limit(1),
            )
            .await?;
        if !master_clients.is_empty() {
            return Ok(());
        }

        let duplicate_clients = self
            .backend
            .select(
                &Select::from(CLIENTS_TABLE)
                    .eq("applicant_id", self.plan.duplicate_id.as_str())
                    .limit(1),
            )
            .await?;
        let Some(client) = from_rows::<Client>(duplicate_clients)?.into_iter().next() else {
            return Ok(());
        };

        let mut patch = Row::new();
        patch.insert(
            "applicant_id".to_string(),
            Value::String(self.plan.master_id.clone()),
        );
        self.backend
            .update(CLIENTS_TABLE, &[Filter::eq("id", client.id.as_str())], patch)
            .await?;
        tracing::info!(client_id = %client.id, "merge.client_migrated");
        Ok(())
    }

    async fn write_comments(&self) -> Result<(), BackendError> {
        let original = self.master.comments.as_deref();
        let merged = merge_comments(original, self.duplicate.comments.as_deref());
        if merged == original.unwrap_or_default() {
            return Ok(());
        }

        let mut patch = Row::new();
        patch.insert("comments".to_string(), Value::String(merged));
        patch.insert("updated_at".to_string(), Value::String(now_rfc3339()));
        self.backend
            .update(
                APPLICATIONS_TABLE,
                &[Filter::eq("id", self.plan.master_id.as_str())],
                patch,
            )
            .await?;
        Ok(())
    }
}

fn decode_applicant(row: Row) -> Result<Applicant, ApiError> {
    from_row::<Applicant>(row).map_err(|err| {
        tracing::error!(error = %err, "applicant row failed to decode");
        internal_error()
    })
}

pub(super) async fn merge_applicants(
    State(state): State<AppState>,
    Path(master_id): Path<String>,
    req: Result<Json<MergeRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = req.map_err(invalid_json)?;
    let plan = req.validate(&master_id).map_err(|err| {
        metrics::observe_merge("rejected");
        invalid_request(err)
    })?;
    let backend = state.backend.elevated();

    let master = select_by_id(backend, APPLICATIONS_TABLE, &plan.master_id)
        .await
        .map_err(|err| upstream_error("failed to load master applicant", &err))?
        .ok_or_else(|| not_found("master applicant not found"))?;
    let duplicate = select_by_id(backend, APPLICATIONS_TABLE, &plan.duplicate_id)
        .await
        .map_err(|err| upstream_error("failed to load duplicate applicant", &err))?
        .ok_or_else(|| not_found("duplicate applicant not found"))?;
    let (master, duplicate) = (decode_applicant(master)?, decode_applicant(duplicate)?);

    let merge = Merge {
        backend,
        plan: &plan,
        master: &master,
        duplicate: &duplicate,
    };

    let mut skipped = Vec::new();
    for step in MergeStep::ORDER {
        let Err(err) = merge.run(step).await else {
            continue;
        };
        match step.policy() {
            StepPolicy::BestEffort => {
                tracing::warn!(
                    master_id = %plan.master_id,
                    duplicate_id = %plan.duplicate_id,
                    step = step.as_str(),
                    error = %err,
                    "merge.step_skipped"
                );
                metrics::inc_best_effort_failure(step.as_str());
                skipped.push(step.as_str());
            }
            StepPolicy::Required => {
                tracing::error!(
                    master_id = %plan.master_id,
                    duplicate_id = %plan.duplicate_id,
                    step = step.as_str(),
                    error = %err,
                    "merge.failed"
                );
                metrics::observe_merge("failed");
                return Err(json_error(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "ERR_UPSTREAM",
                    format!("merge failed at step {}", step.as_str()),
                    Some(err.details()),
                ));
            }
        }
    }

    let merged = select_by_id(backend, APPLICATIONS_TABLE, &plan.master_id)
        .await
        .map_err(|err| upstream_error("failed to reload master applicant", &err))?
        .ok_or_else(|| not_found("master applicant not found"))?;

    metrics::observe_merge(if skipped.is_empty() {
        "success"
    } else {
        "degraded"
    });
    tracing::info!(
        master_id = %plan.master_id,
        duplicate_id = %plan.duplicate_id,
        skipped = ?skipped,
        "merge.completed"
    );
    Ok(written(merged))
}
