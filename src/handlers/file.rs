use axum::{
    body::Body,
    extract::{Multipart, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Extension, Form, Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CallerIdentity, ClaimForm, ClaimedFile, Upload};
use crate::AppState;

/// Deposit one or more files
/// POST /api/v1/files
pub async fn deposit_files(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    multipart: Multipart,
) -> Result<Response> {
    let (uploads, raw_tags) = read_deposit_parts(multipart).await?;

    let report = state
        .vault
        .deposit_batch(&identity, uploads, &raw_tags)
        .await?;

    if report.all_saved() {
        Ok(Json(ApiResponse::success(report)).into_response())
    } else {
        let body = ApiResponse::with_code(400, "Some files were not saved", report);
        Ok((StatusCode::BAD_REQUEST, Json(body)).into_response())
    }
}

/// Collect `files` parts and `tags` fields from a deposit upload
async fn read_deposit_parts(mut multipart: Multipart) -> Result<(Vec<Upload>, Vec<String>)> {
    let mut uploads = Vec::new();
    let mut raw_tags = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        AppError::BadRequest(format!("Failed to process multipart: {}", e))
    })? {
        let name = field.name().unwrap_or("").to_string();

        match name.as_str() {
            "files" => {
                let file_name = field.file_name().map(|s| s.to_string());
                let content_type = field.content_type().map(|s| s.to_string());
                let data = field.bytes().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read file: {}", e))
                })?;
                uploads.push(Upload {
                    file_name,
                    content_type,
                    data,
                });
            }
            "tags" => {
                let text = field.text().await.map_err(|e| {
                    AppError::BadRequest(format!("Failed to read tags: {}", e))
                })?;
                if !text.is_empty() {
                    raw_tags.push(text);
                }
            }
            _ => {}
        }
    }

    Ok((uploads, raw_tags))
}

/// Claim (remove and download) one file
/// POST /api/v1/files/claim
pub async fn claim_file(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Form(form): Form<ClaimForm>,
) -> Result<Response> {
    tracing::debug!(user_id = identity.user_id, "Claim requested");
    let claimed = state.vault.claim(form).await?;
    claim_response(claimed)
}

fn claim_response(claimed: ClaimedFile) -> Result<Response> {
    let ClaimedFile { file, data } = claimed;

    let content_type = HeaderValue::from_str(&file.file_type)
        .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream"));
    let fallback_name: String = file
        .name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let encoded_name = urlencoding::encode(&file.name);

    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, data.len())
        .header(
            header::CONTENT_DISPOSITION,
            format!(
                "attachment; filename=\"{}\"; filename*=UTF-8''{}",
                fallback_name, encoded_name
            ),
        )
        .header("Content-Description", "File Transfer")
        .header("Content-Transfer-Encoding", "binary")
        .header("X-Vault-File-Id", file.id.as_str())
        .header("X-Vault-Owner", file.owner_id.to_string())
        .header("X-Vault-Tags", urlencoding::encode(&file.tags.join(",")).as_ref())
        .body(Body::from(data))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}
