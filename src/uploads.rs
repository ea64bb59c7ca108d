use std::collections::HashMap;

use axum::{
    extract::{multipart::MultipartError, Multipart},
    http::StatusCode,
};
use bytes::Bytes;
use tracing::warn;

use crate::error::ApiError;

/// One uploaded file from a multipart body.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: Option<String>,
    pub content_type: String,
    pub body: Bytes,
}

/// Over-limit bodies become 413; any other read failure is a malformed body.
fn read_error(e: MultipartError, field: Option<&str>) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        warn!(error = %e, field = ?field, "upload exceeds body limit");
        return ApiError::PayloadTooLarge("Uploaded file is too large".into());
    }
    warn!(error = %e, field = ?field, "malformed multipart body");
    ApiError::bad_request("Malformed multipart body")
}

/// A drained multipart body: text fields plus at most one file per accepted file field.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    files: HashMap<String, UploadedFile>,
}

impl MultipartForm {
    /// Reads every part. Parts carrying a filename are files and must be
    /// named in `file_fields`; a second file under the same name is rejected.
    pub async fn read(mut mp: Multipart, file_fields: &[&str]) -> Result<Self, ApiError> {
        let mut form = Self::default();
        loop {
            let field = match mp.next_field().await {
                Ok(Some(f)) => f,
                Ok(None) => break,
                Err(e) => return Err(read_error(e, None)),
            };
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };

            if let Some(file_name) = field.file_name().map(str::to_owned) {
                if !file_fields.contains(&name.as_str()) {
                    return Err(ApiError::bad_request(format!("Unexpected file field: {}", name)));
                }
                if form.files.contains_key(&name) {
                    return Err(ApiError::bad_request(format!(
                        "Only one {} file is allowed",
                        name
                    )));
                }
                let content_type = field
                    .content_type()
                    .map(str::to_owned)
                    .unwrap_or_else(|| "application/octet-stream".into());
                let body = field
                    .bytes()
                    .await
                    .map_err(|e| read_error(e, Some(&name)))?;
                if body.is_empty() {
                    continue;
                }
                form.files.insert(
                    name,
                    UploadedFile {
                        file_name: Some(file_name),
                        content_type,
                        body,
                    },
                );
            } else {
                let text = field
                    .text()
                    .await
                    .map_err(|e| read_error(e, Some(&name)))?;
                form.fields.insert(name, text);
            }
        }
        Ok(form)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn take_file(&mut self, name: &str) -> Option<UploadedFile> {
        self.files.remove(name)
    }
}
