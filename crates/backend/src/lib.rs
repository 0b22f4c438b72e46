//! Persistence gateway for the hosted backend.
//!
//! Handlers never talk to the database or object storage directly; they go
//! through a [`Persistence`] implementation picked from a two-tier [`Backend`]
//! handle. The restricted tier is bound by row-level access policy, the
//! elevated tier uses the service role and bypasses it.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod memory;
pub mod rest;

pub type Row = Map<String, Value>;

#[derive(Debug)]
pub enum BackendError {
    Timeout,
    Http(reqwest::Error),
    Rejected { status: u16, message: String },
    InvalidQuery(String),
    Decode(String),
}

impl BackendError {
    /// Storage refused to overwrite an existing object.
    pub fn is_conflict(&self) -> bool {
        matches!(self, BackendError::Rejected { status: 409, .. })
    }

    /// Message safe to hand back to API callers as `details`.
    pub fn details(&self) -> String {
        match self {
            BackendError::Timeout => "backend request timed out".to_string(),
            BackendError::Http(err) => format!("backend unreachable: {}", err),
            BackendError::Rejected { message, .. } => message.clone(),
            BackendError::InvalidQuery(message) => message.clone(),
            BackendError::Decode(message) => message.clone(),
        }
    }
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendError::Timeout => write!(f, "backend request timed out"),
            BackendError::Http(err) => write!(f, "backend HTTP error: {}", err),
            BackendError::Rejected { status, message } => {
                write!(f, "backend rejected request ({}): {}", status, message)
            }
            BackendError::InvalidQuery(message) => write!(f, "invalid backend query: {}", message),
            BackendError::Decode(message) => write!(f, "backend response decode error: {}", message),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<reqwest::Error> for BackendError {
    fn from(value: reqwest::Error) -> Self {
        if value.is_timeout() {
            BackendError::Timeout
        } else {
            BackendError::Http(value)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { column: String, value: Value },
    In { column: String, values: Vec<Value> },
    /// Case-insensitive substring match against any of the columns.
    IlikeAny { columns: Vec<String>, needle: String },
}

impl Filter {
    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Filter::Eq {
            column: column.to_string(),
            value: value.into(),
        }
    }

    pub fn is_in<V: Into<Value>>(column: &str, values: impl IntoIterator<Item = V>) -> Self {
        Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ilike_any(columns: &[&str], needle: &str) -> Self {
        Filter::IlikeAny {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            needle: needle.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub ascending: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Select {
    pub table: String,
    pub filters: Vec<Filter>,
    pub order: Option<Order>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn from(table: &str) -> Self {
        Self {
            table: table.to_string(),
            filters: Vec::new(),
            order: None,
            limit: None,
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Filter::eq(column, value))
    }

    pub fn order_asc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending: true,
        });
        self
    }

    pub fn order_desc(mut self, column: &str) -> Self {
        self.order = Some(Order {
            column: column.to_string(),
            ascending: false,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[async_trait]
pub trait Persistence: Send + Sync + 'static {
    async fn select(&self, query: &Select) -> Result<Vec<Row>, BackendError>;

    /// Inserts one row and returns it as stored (with generated columns).
    async fn insert(&self, table: &str, row: Row) -> Result<Row, BackendError>;

    /// Applies `patch` to every matching row and returns the updated rows.
    async fn update(
        &self,
        table: &str,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, BackendError>;

    /// Deletes every matching row and returns how many were removed.
    async fn delete(&self, table: &str, filters: &[Filter]) -> Result<usize, BackendError>;

    async fn upload(
        &self,
        bucket: &str,
        path: &str,
        bytes: Vec<u8>,
        content_type: &str,
    ) -> Result<(), BackendError>;

    fn public_url(&self, bucket: &str, path: &str) -> String;

    async fn ping(&self) -> Result<(), BackendError>;
}

#[derive(Clone)]
pub struct Backend {
    restricted: Arc<dyn Persistence>,
    elevated: Arc<dyn Persistence>,
}

impl Backend {
    pub fn new(restricted: Arc<dyn Persistence>, elevated: Arc<dyn Persistence>) -> Self {
        Self {
            restricted,
            elevated,
        }
    }

    pub fn restricted(&self) -> &dyn Persistence {
        self.restricted.as_ref()
    }

    pub fn elevated(&self) -> &dyn Persistence {
        self.elevated.as_ref()
    }
}

pub async fn select_by_id(
    persistence: &dyn Persistence,
    table: &str,
    id: &str,
) -> Result<Option<Row>, BackendError> {
    let rows = persistence
        .select(&Select::from(table).eq("id", id).limit(1))
        .await?;
    Ok(rows.into_iter().next())
}

pub fn to_row<T: Serialize>(value: &T) -> Result<Row, BackendError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(row)) => Ok(row),
        Ok(_) => Err(BackendError::Decode("row must serialize to an object".to_string())),
        Err(err) => Err(BackendError::Decode(err.to_string())),
    }
}

pub fn from_row<T: DeserializeOwned>(row: Row) -> Result<T, BackendError> {
    serde_json::from_value(Value::Object(row)).map_err(|err| BackendError::Decode(err.to_string()))
}

pub fn from_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, BackendError> {
    rows.into_iter().map(from_row).collect()
}
