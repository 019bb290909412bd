//! Route handler functions for the viewer endpoints.

use std::io::ErrorKind;
use std::path::Path as FsPath;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use nichoir_core::types::{ImageRecord, RecordId};

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: u64 = 20;
const MAX_LIMIT: u64 = 100;
/// Thumbnails rendered on the gallery page.
const GALLERY_SIZE: u64 = 50;

// =============================================================================
// Query parameter types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct ListParams {
    pub limit: Option<u64>,
}

// =============================================================================
// Response types
// =============================================================================

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageSummary {
    pub id: RecordId,
    pub file_name: String,
    pub captured_at: DateTime<Utc>,
    pub telemetry_level: Option<f64>,
    pub comment: Option<String>,
    /// Relative URL of the image bytes.
    pub url: String,
}

impl From<ImageRecord> for ImageSummary {
    fn from(record: ImageRecord) -> Self {
        let file_name = FsPath::new(&record.file_path)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            url: format!("/images/{}", record.id),
            id: record.id,
            file_name,
            captured_at: record.captured_at,
            telemetry_level: record.telemetry_level,
            comment: record.comment,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImageListResponse {
    pub images: Vec<ImageSummary>,
    /// Records in the store, not just in this page.
    pub total: u64,
    pub limit: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub total_images: u64,
}

// =============================================================================
// Handler functions
// =============================================================================

/// GET /images - newest-first listing.
pub async fn list_images(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ImageListResponse>, ApiError> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    if limit == 0 {
        return Err(ApiError::BadRequest("'limit' must be at least 1".to_string()));
    }
    let limit = limit.min(MAX_LIMIT);

    let records = state.repository.list_recent(limit)?;
    let total = state.repository.count()?;

    Ok(Json(ImageListResponse {
        images: records.into_iter().map(ImageSummary::from).collect(),
        total,
        limit,
    }))
}

/// GET /images/{id} - raw image bytes.
///
/// 404 when the id is unknown or its file disappeared since ingestion.
pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<RecordId>,
) -> Result<Response, ApiError> {
    let record = state
        .repository
        .find_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Image {} not found", id)))?;

    let bytes = match tokio::fs::read(&record.file_path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::warn!(id, path = %record.file_path, "Image record points at a missing file");
            return Err(ApiError::NotFound(format!("Image file for {} is missing", id)));
        }
        Err(e) => {
            return Err(ApiError::Internal(format!(
                "Failed to read {}: {}",
                record.file_path, e
            )))
        }
    };

    Ok(([(header::CONTENT_TYPE, content_type_for(&record.file_path))], bytes).into_response())
}

/// GET /health - health check.
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let total_images = state.repository.count().unwrap_or(0);

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_images,
    }))
}

/// GET / - HTML gallery of the latest images.
pub async fn gallery(State(state): State<AppState>) -> Result<Html<String>, ApiError> {
    let records = state.repository.list_recent(GALLERY_SIZE)?;
    Ok(Html(render_gallery(&records)))
}

/// MIME type guessed from the file extension.
pub fn content_type_for(path: &str) -> &'static str {
    let ext = FsPath::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}

fn render_gallery(records: &[ImageRecord]) -> String {
    let mut html = String::from(
        "<!DOCTYPE html>\n<html><head><meta charset=\"utf-8\"><title>Nichoir</title>\
         <style>body{font-family:sans-serif;margin:2em}\
         figure{display:inline-block;margin:.5em;width:320px}\
         img{width:100%}figcaption{font-size:.85em;color:#444}</style>\
         </head><body><h1>Nichoir</h1>\n",
    );

    if records.is_empty() {
        html.push_str("<p>No images yet.</p>\n");
    }

    for record in records {
        let level = record
            .telemetry_level
            .map(|l| format!("{:.2}", l))
            .unwrap_or_else(|| "n/a".to_string());
        let comment = record.comment.as_deref().unwrap_or("");
        html.push_str(&format!(
            "<figure><a href=\"/images/{id}\"><img src=\"/images/{id}\" loading=\"lazy\" alt=\"image {id}\"></a>\
             <figcaption>#{id} &middot; {at} &middot; level {level}<br>{comment}</figcaption></figure>\n",
            id = record.id,
            at = record.captured_at.format("%Y-%m-%d %H:%M:%S UTC"),
            level = level,
            comment = escape_html(comment),
        ));
    }

    html.push_str("</body></html>\n");
    html
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_content_type_for() {
        assert_eq!(content_type_for("/data/image_1.jpg"), "image/jpeg");
        assert_eq!(content_type_for("/data/image_1.JPEG"), "image/jpeg");
        assert_eq!(content_type_for("/data/image_1.png"), "image/png");
        assert_eq!(content_type_for("/data/image_1"), "application/octet-stream");
        assert_eq!(content_type_for("/data/image_1.raw"), "application/octet-stream");
    }

    #[test]
    fn test_escape_html() {
        assert_eq!(
            escape_html("<b>\"nest\" & 'eggs'</b>"),
            "&lt;b&gt;&quot;nest&quot; &amp; &#39;eggs&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn test_summary_from_record() {
        let record = ImageRecord {
            id: 7,
            file_path: "/var/nichoir/images/image_20250412_073005_000000.jpg".into(),
            captured_at: Utc.with_ymd_and_hms(2025, 4, 12, 7, 30, 5).unwrap(),
            telemetry_level: Some(3.7),
            comment: Some("Image auto".into()),
        };
        let summary = ImageSummary::from(record);
        assert_eq!(summary.file_name, "image_20250412_073005_000000.jpg");
        assert_eq!(summary.url, "/images/7");
        assert_eq!(summary.telemetry_level, Some(3.7));
    }

    #[test]
    fn test_render_gallery_escapes_comments() {
        let record = ImageRecord {
            id: 1,
            file_path: "/tmp/a.jpg".into(),
            captured_at: Utc.with_ymd_and_hms(2025, 4, 12, 7, 30, 5).unwrap(),
            telemetry_level: None,
            comment: Some("<script>".into()),
        };
        let html = render_gallery(&[record]);
        assert!(html.contains("/images/1"));
        assert!(html.contains("level n/a"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
    }

    #[test]
    fn test_render_empty_gallery() {
        assert!(render_gallery(&[]).contains("No images yet."));
    }
}
