//! Object-storage naming rules for uploaded documents and visit photos.

pub const DEFAULT_DOCUMENT_TYPE: &str = "other";
pub const DEFAULT_PHOTO_TYPE: &str = "site";
const FALLBACK_EXTENSION: &str = "bin";
const MAX_EXTENSION_LEN: usize = 10;
const MAX_DOCUMENT_TYPE_LEN: usize = 48;

/// `{applicationId}/{timestamp}-{type}.{ext}`
pub fn document_storage_path(
    application_id: &str,
    timestamp_ms: i64,
    document_type: &str,
    extension: &str,
) -> String {
    format!(
        "{}/{}-{}.{}",
        application_id, timestamp_ms, document_type, extension
    )
}

/// `{visitId}/{timestamp}.{ext}`
pub fn photo_storage_path(visit_id: &str, timestamp_ms: i64, extension: &str) -> String {
    format!("{}/{}.{}", visit_id, timestamp_ms, extension)
}

pub fn sanitize_document_type(raw: Option<&str>) -> String {
    let cleaned = raw
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|ch| if ch == ' ' { '_' } else { ch })
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
        .take(MAX_DOCUMENT_TYPE_LEN)
        .collect::<String>();

    if cleaned.is_empty() {
        DEFAULT_DOCUMENT_TYPE.to_string()
    } else {
        cleaned
    }
}

pub fn file_extension(file_name: &str) -> String {
    let Some((stem, ext)) = file_name.trim().rsplit_once('.') else {
        return FALLBACK_EXTENSION.to_string();
    };

    let ext = ext.to_ascii_lowercase();
    let valid = !stem.is_empty()
        && !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|ch| ch.is_ascii_alphanumeric());

    if valid {
        ext
    } else {
        FALLBACK_EXTENSION.to_string()
    }
}

/// Ids become the first storage path segment, so they must not escape it.
pub fn is_safe_path_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment.len() <= 128
        && segment
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_'))
}
