//! [`Persistence`] over the hosted backend's REST table API and storage API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::RequestBuilder;
use serde_json::Value;

use crate::{BackendError, Filter, Persistence, Row, Select};

#[derive(Debug, Clone)]
pub struct RestConfig {
    pub base_url: String,
    pub api_key: String,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct RestBackend {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(BackendError::Http)?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key,
            http,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authed(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("apikey", self.api_key.as_str())
            .bearer_auth(self.api_key.as_str())
    }

    async fn send(&self, request: RequestBuilder) -> Result<reqwest::Response, BackendError> {
        let response = self.authed(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(BackendError::Rejected {
            status: status.as_u16(),
            message: error_message(&body).unwrap_or_else(|| {
                status
                    .canonical_reason()
                    .unwrap_or("backend request failed")
                    .to_string()
            }),
        })
    }

    async fn send_for_rows(&self, request: RequestBuilder) -> Result<Vec<Row>, BackendError> {
        let value = self
            .send(request)
            .await?
            .json::<Value>()
            .await
            .map_err(|err| BackendError::Decode(err.to_string()))?;
        rows_from_value(value)
    }
}

#[async_trait]
impl Persistence for RestBackend {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError> {
        let mut params = vec![("select".to_string(), "*".to_string())];
        params.extend(filter_params(&query.filters));
        if let Some(order) = query.order.as_ref() {
            let direction = if order.ascending { "asc" } else { "desc" };
            params.push(("order".to_string(), format!("{}.{}", order.column, direction)));
        }
        if let Some(limit) = query.limit {
            params.push(("limit".to_string(), limit.to_string()));
        }

        self.send_for_rows(self.http.get(self.table_url(&query.table)).query(&params))
            .await
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError> {
        let rows = self
            .send_for_rows(
                self.http
                    .post(self.table_url(table))
                    .header("Prefer", "return=representation")
                    .json(&Value::Object(row)),
            )
            .await?;

        rows.into_iter()
            .next()
            .ok_or_else(|| BackendError::Decode(format!("insert into {} returned no row", table)))
    }

    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError> {
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(format!(
                "refusing unfiltered update on {}",
                table
            )));
        }

        self.send_for_rows(
            self.http
                .patch(self.table_url(table))
                .query(&filter_params(filters))
                .header("Prefer", "return=representation")
                .json(&Value::Object(patch)),
        )
        .await
    }

    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, BackendError> {
        if filters.is_empty() {
            return Err(BackendError::InvalidQuery(format!(
                "refusing unfiltered delete on {}",
                table
            )));
        }

        let rows = self
            .send_for_rows(
                self.http
                    .delete(self.table_url(table))
                    .query(&filter_params(filters))
                    .header("Prefer", "return=representation"),
            )
            .await?;
        Ok(rows.len())
    }

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError> {
        let url = format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path);
        self.send(
            self.http
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, content_type)
                .header("x-upsert", "false")
                .body(bytes),
        )
        .await?;
        Ok(())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url, bucket, path
        )
    }

    async fn ping(&self) -> Result<(), BackendError> {
        self.send(self.http.get(format!("{}/rest/v1/", self.base_url)))
            .await?;
        Ok(())
    }
}

/// Encodes filters as table-API query parameters (`col=eq.v`, `col=in.(...)`, `or=(...)`).
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq { column, value } => match value {
                Value::Null => (column.clone(), "is.null".to_string()),
                other => (column.clone(), format!("eq.{}", scalar(other))),
            },
            Filter::In { column, values } => {
                let list = values
                    .iter()
                    .map(|v| quote_list_value(&scalar(v)))
                    .collect::<Vec<_>>()
                    .join(",");
                (column.clone(), format!("in.({})", list))
            }
            Filter::IlikeAny { columns, needle } => {
                // `*` is the ilike wildcard on the wire and has no escape.
                let (operator, pattern) = if needle.contains('*') {
                    ("imatch", escape_regex(needle))
                } else {
                    ("ilike", format!("*{}*", escape_like(needle)))
                };
                let pattern = quote_list_value(&pattern);
                let terms = columns
                    .iter()
                    .map(|column| format!("{}.{}.{}", column, operator, pattern))
                    .collect::<Vec<_>>()
                    .join(",");
                ("or".to_string(), format!("({})", terms))
            }
        })
        .collect()
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Double-quotes a value inside an `in.(...)` list or `or=(...)` tree.
fn quote_list_value(raw: &str) -> String {
    let escaped = raw.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Makes LIKE metacharacters in user input match literally.
fn escape_like(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len());
    for ch in needle.chars() {
        match ch {
            '\\' | '%' | '_' => {
                out.push('\\');
                out.push(ch);
            }
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes regex metacharacters so an `imatch` pattern is a literal substring.
fn escape_regex(needle: &str) -> String {
    let mut out = String::with_capacity(needle.len() * 2);
    for ch in needle.chars() {
        if "\\.^$*+?()[]{}|".contains(ch) {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

fn rows_from_value(value: Value) -> Result<Vec<Row>, BackendError> {
    let Value::Array(items) = value else {
        return Err(BackendError::Decode(
            "expected a JSON array of rows".to_string(),
        ));
    };

    items
        .into_iter()
        .map(|item| match item {
            Value::Object(row) => Ok(row),
            _ => Err(BackendError::Decode("row is not a JSON object".to_string())),
        })
        .collect()
}

fn error_message(body: &str) -> Option<String> {
    let body = body.trim();
    if body.is_empty() {
        return None;
    }

    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return Some(body.chars().take(512).collect());
    };

    ["message", "error_description", "msg", "error"]
        .iter()
        .find_map(|key| value.get(*key).and_then(|v| v.as_str()))
        .map(|s| s.to_string())
        .or_else(|| Some(body.chars().take(512).collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_params_encode_eq_in_and_null() {
        let params = filter_params(&[
            Filter::eq("status", "pending"),
            Filter::eq("is_active", true),
            Filter::eq("assigned_to", Value::Null),
            Filter::is_in("id", ["a", "b\"c"]),
        ]);

        assert_eq!(
            params,
            vec![
                ("status".to_string(), "eq.pending".to_string()),
                ("is_active".to_string(), "eq.true".to_string()),
                ("assigned_to".to_string(), "is.null".to_string()),
                ("id".to_string(), "in.(\"a\",\"b\\\"c\")".to_string()),
            ]
        );
    }

    #[test]
    fn ilike_any_builds_quoted_or_tree_with_escaped_wildcards() {
        let params = filter_params(&[Filter::ilike_any(&["full_name", "email"], "50%_a,b")]);
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, "or");
        assert_eq!(
            params[0].1,
            "(full_name.ilike.\"*50\\\\%\\\\_a,b*\",email.ilike.\"*50\\\\%\\\\_a,b*\")"
        );
    }

    #[test]
    fn needle_with_star_matches_it_literally() {
        let params = filter_params(&[Filter::ilike_any(&["full_name"], "a*b.c")]);
        assert_eq!(
            params,
            vec![(
                "or".to_string(),
                "(full_name.imatch.\"a\\\\*b\\\\.c\")".to_string()
            )]
        );
        assert_eq!(escape_regex("(x)|y?"), "\\(x\\)\\|y\\?");
    }

    #[test]
    fn error_message_prefers_structured_fields() {
        assert_eq!(
            error_message(r#"{"message":"duplicate key","code":"23505"}"#).as_deref(),
            Some("duplicate key")
        );
        assert_eq!(
            error_message(r#"{"error":"Bucket not found"}"#).as_deref(),
            Some("Bucket not found")
        );
        assert_eq!(error_message("plain failure").as_deref(), Some("plain failure"));
        assert_eq!(error_message("  "), None);
    }

    #[test]
    fn rows_from_value_requires_array_of_objects() {
        assert!(rows_from_value(serde_json::json!([{"id": "a"}])).is_ok());
        assert!(rows_from_value(serde_json::json!({"id": "a"})).is_err());
        assert!(rows_from_value(serde_json::json!([1])).is_err());
    }
}
