use axum::{
    extract::{Path, State},
    Extension, Json,
};

use crate::error::{ApiResponse, AppError, Result};
use crate::models::{CallerIdentity, FileTypePolicy, StoredFile, UpdateFileTypeRequest, UsageResponse};
use crate::AppState;

/// Check if caller is privileged
fn require_admin(identity: &CallerIdentity) -> Result<()> {
    if !identity.is_admin() {
        return Err(AppError::Forbidden(
            "Admin access required".to_string(),
        ));
    }
    Ok(())
}

/// List live files (metadata only)
/// GET /api/v1/admin/files
pub async fn list_files(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<ApiResponse<Vec<StoredFile>>>> {
    require_admin(&identity)?;
    let files = state.vault.list_files().await?;
    Ok(Json(ApiResponse::success(files)))
}

/// List file type policies
/// GET /api/v1/admin/file-types
pub async fn list_file_types(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<ApiResponse<Vec<FileTypePolicy>>>> {
    require_admin(&identity)?;
    let types = state.vault.list_file_types().await?;
    Ok(Json(ApiResponse::success(types)))
}

/// Update a file type policy
/// PUT /api/v1/admin/file-types/:id
pub async fn update_file_type(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
    Path(id): Path<String>,
    Json(req): Json<UpdateFileTypeRequest>,
) -> Result<Json<ApiResponse<FileTypePolicy>>> {
    require_admin(&identity)?;
    let policy = state.vault.update_file_type(&id, req).await?;
    Ok(Json(ApiResponse::success(policy)))
}

/// Aggregate usage against the vault quota
/// GET /api/v1/admin/usage
pub async fn usage(
    State(state): State<AppState>,
    Extension(identity): Extension<CallerIdentity>,
) -> Result<Json<ApiResponse<UsageResponse>>> {
    require_admin(&identity)?;
    let usage = state.vault.usage().await?;
    Ok(Json(ApiResponse::success(usage)))
}
