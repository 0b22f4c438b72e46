//! Multipart uploads into object storage plus their metadata rows.

use std::collections::HashMap;

use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use casework_backend::{BackendError, Persistence, Select};
use casework_contracts::requests::{DocumentListQuery, PhotoListQuery, ValidationError};
use casework_contracts::storage::{
    DEFAULT_PHOTO_TYPE, document_storage_path, file_extension, is_safe_path_segment,
    photo_storage_path, sanitize_document_type,
};
use casework_contracts::{APPLICATION_DOCUMENTS_TABLE, VISIT_PHOTOS_TABLE};
use serde::Serialize;

use super::{
    ApiError, AppState, created, data, encode_row, invalid_query, invalid_request, json_error,
    now_millis, upstream_error,
};

const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";
const UPLOAD_ATTEMPTS: i64 = 3;

struct UploadedFile {
    file_name: String,
    content_type: String,
    bytes: Vec<u8>,
}

/// A fully buffered multipart body: at most one `file` part plus text fields.
#[derive(Default)]
struct UploadForm {
    file: Option<UploadedFile>,
    fields: HashMap<String, String>,
}

impl UploadForm {
    async fn read(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = UploadForm::default();
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let Some(name) = field.name().map(str::to_string) else {
                continue;
            };

            if name == "file" {
                let file_name = field
                    .file_name()
                    .map(|n| n.trim().to_string())
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| "upload".to_string());
                let content_type = field
                    .content_type()
                    .unwrap_or(FALLBACK_CONTENT_TYPE)
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.file = Some(UploadedFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    /// First non-blank value among `names`.
    fn field(&self, names: &[&str]) -> Option<&str> {
        names
            .iter()
            .filter_map(|name| self.fields.get(*name))
            .map(|value| value.trim())
            .find(|value| !value.is_empty())
    }

    fn parent_id(&self, names: &[&str], label: &'static str) -> Result<String, ValidationError> {
        let id = self
            .field(names)
            .ok_or_else(|| ValidationError::new(label, format!("{} is required", label)))?;
        if !is_safe_path_segment(id) {
            return Err(ValidationError::new(label, format!("{} is malformed", label)));
        }
        Ok(id.to_string())
    }

    fn take_file(&mut self) -> Result<UploadedFile, ValidationError> {
        self.file
            .take()
            .filter(|file| !file.bytes.is_empty())
            .ok_or_else(|| ValidationError::new("file", "a non-empty file is required"))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        return json_error(
            status,
            "ERR_PAYLOAD_TOO_LARGE",
            "upload exceeds the size limit",
            None,
        );
    }
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        "invalid multipart body",
        Some(err.body_text()),
    )
}

fn multipart_rejection(rejection: MultipartRejection) -> ApiError {
    json_error(
        StatusCode::BAD_REQUEST,
        "ERR_INVALID_REQUEST",
        "expected a multipart/form-data body",
        Some(rejection.body_text()),
    )
}

/// Stores the file under `path_for(timestamp)`, moving to the next
/// millisecond when an object already sits at that path.
async fn upload_unique(
    backend: &dyn Persistence,
    bucket: &str,
    file: &UploadedFile,
    started_ms: i64,
    path_for: impl Fn(i64) -> String,
) -> Result<String, BackendError> {
    let mut attempt = 0;
    loop {
        let path = path_for(started_ms + attempt);
        match backend
            .upload(bucket, &path, file.bytes.clone(), &file.content_type)
            .await
        {
            Ok(()) => return Ok(path),
            Err(err) if err.is_conflict() && attempt + 1 < UPLOAD_ATTEMPTS => {
                tracing::debug!(storage_path = %path, "upload.path_taken");
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Debug, Serialize)]
struct NewDocument {
    application_id: String,
    file_name: String,
    file_url: String,
    storage_path: String,
    file_size: usize,
    mime_type: String,
    document_type: String,
}

pub(super) async fn upload_document(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = UploadForm::read(multipart.map_err(multipart_rejection)?).await?;
    let application_id = form
        .parent_id(&["applicationId", "application_id"], "applicationId")
        .map_err(invalid_request)?;
    let file = form.take_file().map_err(invalid_request)?;
    let document_type = sanitize_document_type(form.field(&["document_type", "documentType"]));

    let bucket = state.config.documents_bucket.as_str();
    let extension = file_extension(&file.file_name);
    let backend = state.backend.elevated();

    let path = upload_unique(backend, bucket, &file, now_millis(), |ts| {
        document_storage_path(&application_id, ts, &document_type, &extension)
    })
    .await
    .map_err(|err| upstream_error("failed to store document", &err))?;
    let file_size = file.bytes.len();

    let document = NewDocument {
        application_id,
        file_name: file.file_name,
        file_url: backend.public_url(bucket, &path),
        storage_path: path,
        file_size,
        mime_type: file.content_type,
        document_type,
    };
    let stored = backend
        .insert(APPLICATION_DOCUMENTS_TABLE, encode_row(&document)?)
        .await
        .map_err(|err| {
            tracing::warn!(storage_path = %document.storage_path, "document.orphaned_object");
            upstream_error("failed to record document", &err)
        })?;

    tracing::info!(
        application_id = %document.application_id,
        document_type = %document.document_type,
        file_size,
        "document.uploaded"
    );
    Ok(created(stored))
}

pub(super) async fn list_documents(
    State(state): State<AppState>,
    query: Result<Query<DocumentListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(invalid_query)?;
    let application_id = query.validate().map_err(invalid_request)?;

    let rows = state
        .backend
        .restricted()
        .select(
            &Select::from(APPLICATION_DOCUMENTS_TABLE)
                .eq("application_id", application_id.as_str())
                .order_asc("created_at"),
        )
        .await
        .map_err(|err| upstream_error("failed to load documents", &err))?;
    Ok(data(rows))
}

#[derive(Debug, Serialize)]
struct NewPhoto {
    visit_id: String,
    file_name: String,
    file_url: String,
    storage_path: String,
    file_size: usize,
    mime_type: String,
    photo_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    caption: Option<String>,
}

pub(super) async fn upload_photo(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = UploadForm::read(multipart.map_err(multipart_rejection)?).await?;
    let visit_id = form
        .parent_id(&["visitId", "visit_id"], "visitId")
        .map_err(invalid_request)?;
    let file = form.take_file().map_err(invalid_request)?;
    if !file.content_type.starts_with("image/") {
        return Err(invalid_request(ValidationError::new(
            "file",
            "photo must be an image",
        )));
    }
    let photo_type = form
        .field(&["photo_type", "photoType"])
        .unwrap_or(DEFAULT_PHOTO_TYPE)
        .to_string();
    let caption = form.field(&["caption"]).map(str::to_string);

    let bucket = state.config.photos_bucket.as_str();
    let extension = file_extension(&file.file_name);
    let backend = state.backend.elevated();

    let path = upload_unique(backend, bucket, &file, now_millis(), |ts| {
        photo_storage_path(&visit_id, ts, &extension)
    })
    .await
    .map_err(|err| upstream_error("failed to store photo", &err))?;
    let file_size = file.bytes.len();

    let photo = NewPhoto {
        visit_id,
        file_name: file.file_name,
        file_url: backend.public_url(bucket, &path),
        storage_path: path,
        file_size,
        mime_type: file.content_type,
        photo_type,
        caption,
    };
    let stored = backend
        .insert(VISIT_PHOTOS_TABLE, encode_row(&photo)?)
        .await
        .map_err(|err| {
            tracing::warn!(storage_path = %photo.storage_path, "photo.orphaned_object");
            upstream_error("failed to record photo", &err)
        })?;

    tracing::info!(visit_id = %photo.visit_id, file_size, "photo.uploaded");
    Ok(created(stored))
}

pub(super) async fn list_photos(
    State(state): State<AppState>,
    query: Result<Query<PhotoListQuery>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(query) = query.map_err(invalid_query)?;
    let visit_id = query.validate().map_err(invalid_request)?;

    let rows = state
        .backend
        .elevated()
        .select(
            &Select::from(VISIT_PHOTOS_TABLE)
                .eq("visit_id", visit_id.as_str())
                .order_asc("created_at"),
        )
        .await
        .map_err(|err| upstream_error("failed to load photos", &err))?;
    Ok(data(rows))
}

#[cfg(test)]
mod tests {
    use casework_backend::memory::{MemoryBackend, Operation};
    use reqwest::multipart::{Form, Part};
    use serde_json::{Value, json};

    use super::super::test_support::spawn_app;
    use super::*;

    fn file_part(bytes: &[u8], name: &str, mime: &str) -> Part {
        Part::bytes(bytes.to_vec())
            .file_name(name.to_string())
            .mime_str(mime)
            .expect("valid mime")
    }

    fn deed() -> UploadedFile {
        UploadedFile {
            file_name: "deed.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            bytes: vec![2, 3],
        }
    }

    #[tokio::test]
    async fn taken_path_moves_to_the_next_millisecond() {
        let store = MemoryBackend::new();
        store
            .upload("docs", "a1/1000-deed.pdf", vec![1], "application/pdf")
            .await
            .expect("first upload");

        let path = upload_unique(&store, "docs", &deed(), 1000, |ts| {
            document_storage_path("a1", ts, "deed", "pdf")
        })
        .await
        .expect("second upload");
        assert_eq!(path, "a1/1001-deed.pdf");
        assert_eq!(
            store.object("docs", "a1/1000-deed.pdf").map(|o| o.bytes),
            Some(vec![1])
        );
        assert_eq!(
            store.object("docs", "a1/1001-deed.pdf").map(|o| o.bytes),
            Some(vec![2, 3])
        );
    }

    #[tokio::test]
    async fn conflicts_give_up_after_a_few_attempts() {
        let store = MemoryBackend::new();
        for ts in 1000..1000 + UPLOAD_ATTEMPTS {
            store
                .upload("photos", &photo_storage_path("v1", ts, "jpg"), vec![1], "image/jpeg")
                .await
                .expect("seed upload");
        }

        let err = upload_unique(&store, "photos", &deed(), 1000, |ts| {
            photo_storage_path("v1", ts, "jpg")
        })
        .await
        .expect_err("every path is taken");
        assert!(err.is_conflict());
        assert_eq!(store.object_count(), UPLOAD_ATTEMPTS as usize);
    }

    #[tokio::test]
    async fn document_upload_stores_object_and_row() {
        let app = spawn_app().await;

        let form = Form::new()
            .text("applicationId", "app-1")
            .text("document_type", "Tax Bill!")
            .part("file", file_part(b"%PDF-1.4", "Bill.PDF", "application/pdf"));
        let response = app
            .client
            .post(app.url("/applications/documents"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("json body");
        let document = &body["data"];
        assert_eq!(document["application_id"], "app-1");
        assert_eq!(document["document_type"], "tax_bill");
        assert_eq!(document["file_name"], "Bill.PDF");
        assert_eq!(document["file_size"], 8);

        let path = document["storage_path"].as_str().unwrap_or_default();
        assert!(path.starts_with("app-1/"));
        assert!(path.ends_with("-tax_bill.pdf"));
        assert!(
            document["file_url"]
                .as_str()
                .unwrap_or_default()
                .ends_with(&format!("/application-documents/{}", path))
        );

        let object = app
            .elevated
            .object("application-documents", path)
            .expect("object stored");
        assert_eq!(object.bytes, b"%PDF-1.4".to_vec());
        assert_eq!(object.content_type, "application/pdf");

        let body: Value = app
            .client
            .get(app.url("/applications/documents?applicationId=app-1"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"].as_array().map(Vec::len), Some(1));
    }

    #[tokio::test]
    async fn document_upload_requires_application_and_file() {
        let app = spawn_app().await;

        let form = Form::new().part("file", file_part(b"x", "a.txt", "text/plain"));
        let response = app
            .client
            .post(app.url("/applications/documents"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let form = Form::new()
            .text("applicationId", "../etc")
            .part("file", file_part(b"x", "a.txt", "text/plain"));
        let response = app
            .client
            .post(app.url("/applications/documents"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let form = Form::new()
            .text("applicationId", "app-1")
            .part("file", file_part(b"", "empty.pdf", "application/pdf"));
        let response = app
            .client
            .post(app.url("/applications/documents"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let response = app
            .client
            .post(app.url("/applications/documents"))
            .json(&json!({"applicationId": "app-1"}))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let response = app
            .client
            .get(app.url("/applications/documents"))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
        assert_eq!(app.elevated.object_count(), 0);
    }

    #[tokio::test]
    async fn storage_failure_is_reported_with_details() {
        let app = spawn_app().await;
        app.elevated.fail_on(Operation::Upload, "application-documents");

        let form = Form::new()
            .text("applicationId", "app-1")
            .part("file", file_part(b"data", "a.pdf", "application/pdf"));
        let response = app
            .client
            .post(app.url("/applications/documents"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["code"], "ERR_UPSTREAM");
        assert!(body["details"].is_string());
        assert!(app.elevated.rows(APPLICATION_DOCUMENTS_TABLE).is_empty());
    }

    #[tokio::test]
    async fn photo_upload_accepts_images_only() {
        let app = spawn_app().await;

        let form = Form::new()
            .text("visitId", "v1")
            .part("file", file_part(b"not an image", "notes.txt", "text/plain"));
        let response = app
            .client
            .post(app.url("/worker/photos"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);

        let form = Form::new()
            .text("visitId", "v1")
            .text("caption", "Front porch")
            .part("file", file_part(&[0xff, 0xd8, 0xff], "porch.JPG", "image/jpeg"));
        let response = app
            .client
            .post(app.url("/worker/photos"))
            .multipart(form)
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::CREATED);
        let body: Value = response.json().await.expect("json body");
        assert_eq!(body["data"]["photo_type"], "site");
        assert_eq!(body["data"]["caption"], "Front porch");
        let path = body["data"]["storage_path"].as_str().unwrap_or_default();
        assert!(path.starts_with("v1/"));
        assert!(path.ends_with(".jpg"));
        assert!(app.elevated.object("visit-photos", path).is_some());

        let body: Value = app
            .client
            .get(app.url("/worker/photos?visitId=v1"))
            .send()
            .await
            .expect("request should succeed")
            .json()
            .await
            .expect("json body");
        assert_eq!(body["data"][0]["caption"], "Front porch");

        let response = app
            .client
            .get(app.url("/worker/photos"))
            .send()
            .await
            .expect("request should succeed");
        assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    }
}
