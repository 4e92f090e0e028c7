//! Building mocked responses.

use std::path::{Path, PathBuf};
use std::time::Duration;

use axum::{
    body::Body,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use quickops_core::{FileDisposition, MockRule};
use serde_json::{Value, json};

/// Header naming the rule that produced a mocked response.
pub const MOCK_HEADER: &str = "x-quickops-mock";

/// How long reading a mock data file may take.
pub const FILE_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// A 200 carrying `value`. Strings are sent as-is so non-JSON content types
/// work; everything else is serialized as JSON.
pub fn mocked(rule: &MockRule, value: &Value) -> Response {
    let body = match value {
        Value::String(s) => s.clone().into_bytes(),
        other => match serde_json::to_vec(other) {
            Ok(bytes) => bytes,
            Err(e) => return error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        },
    };
    let content_type = if rule.content_type.trim().is_empty() {
        "application/json"
    } else {
        rule.content_type.trim()
    };
    with_mock_header(
        (
            StatusCode::OK,
            [(header::CONTENT_TYPE, content_type.to_string())],
            body,
        )
            .into_response(),
        rule,
    )
}

/// Bytes of a local file with a guessed content type.
pub fn file(rule: &MockRule, path: &Path, bytes: Vec<u8>, disposition: FileDisposition) -> Response {
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().replace('"', ""))
        .unwrap_or_else(|| "download".to_string());
    let response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, guess_content_type(path))
        .header(
            header::CONTENT_DISPOSITION,
            format!("{}; filename=\"{}\"", disposition.as_str(), filename),
        )
        .body(Body::from(bytes));
    match response {
        Ok(response) => with_mock_header(response, rule),
        Err(e) => error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

/// JSON error body `{"error": "..."}`.
pub fn error(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        [(header::CONTENT_TYPE, "application/json")],
        json!({ "error": message.into() }).to_string(),
    )
        .into_response()
}

fn with_mock_header(mut response: Response, rule: &MockRule) -> Response {
    if let Ok(value) = HeaderValue::from_str(&rule.id) {
        response.headers_mut().insert(MOCK_HEADER, value);
    }
    response
}

/// Resolve a rule's file path: absolute paths as-is, relative ones against
/// the mock directory (itself relative to the root) or the root.
pub fn resolve_path(root: &Path, mock_dir: Option<&str>, path: &str) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match mock_dir.map(str::trim).filter(|d| !d.is_empty()) {
        Some(dir) => root.join(dir).join(path),
        None => root.join(path),
    }
}

pub fn guess_content_type(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "json" => "application/json",
        "txt" | "log" => "text/plain; charset=utf-8",
        "html" | "htm" => "text/html; charset=utf-8",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "csv" => "text/csv",
        "xml" => "application/xml",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "xlsx" => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "mp4" => "video/mp4",
        "mp3" => "audio/mpeg",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_path() {
        let root = Path::new("/ws");
        assert_eq!(
            resolve_path(root, Some("mocks"), "users.json"),
            Path::new("/ws/mocks/users.json")
        );
        assert_eq!(
            resolve_path(root, None, "data/users.json"),
            Path::new("/ws/data/users.json")
        );
        assert_eq!(
            resolve_path(root, Some(" "), "users.json"),
            Path::new("/ws/users.json")
        );
        assert_eq!(
            resolve_path(root, Some("mocks"), "/abs/x.json"),
            Path::new("/abs/x.json")
        );
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a/report.PDF")), "application/pdf");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }

    #[test]
    fn test_mocked_sets_rule_header_and_type() {
        let mut rule = MockRule::new("r1", "p", "GET", "/x");
        rule.content_type = "text/plain".to_string();
        let res = mocked(&rule, &Value::String("hi".to_string()));
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(res.headers()[MOCK_HEADER], "r1");
        assert_eq!(res.headers()[header::CONTENT_TYPE], "text/plain");
    }
}
