//! Multipart form parsing for `POST /api/jobs`.

use super::error::AppError;
use axum::extract::multipart::MultipartError;
use axum::extract::Multipart;

/// Fields of an upload form.
#[derive(Debug, Default)]
pub struct UploadForm {
    pub filename: String,
    pub data: Vec<u8>,
    /// Raw `pdf_mode` value; parsed by the caller.
    pub pdf_mode: Option<String>,
}

/// Read the `file` and `pdf_mode` fields. Unknown fields are skipped.
pub async fn parse_upload(mut multipart: Multipart) -> Result<UploadForm, AppError> {
    let mut form = UploadForm::default();
    let mut saw_file = false;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name().unwrap_or_default() {
            "file" => {
                form.filename = field.file_name().unwrap_or_default().to_string();
                form.data = field.bytes().await.map_err(multipart_error)?.to_vec();
                saw_file = true;
            }
            "pdf_mode" => {
                let value = field.text().await.map_err(multipart_error)?;
                let value = value.trim();
                if !value.is_empty() {
                    form.pdf_mode = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    if !saw_file {
        return Err(AppError::bad_request("multipart field 'file' is required"));
    }
    Ok(form)
}

fn multipart_error(e: MultipartError) -> AppError {
    let status = e.status();
    AppError::new(
        status,
        if status == axum::http::StatusCode::PAYLOAD_TOO_LARGE {
            "payload_too_large"
        } else {
            "invalid_submission"
        },
        format!("Failed to read upload: {}", e.body_text()),
    )
}
