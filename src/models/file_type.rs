use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Per-type policy, keyed by the declared content type
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct FileTypePolicy {
    pub id: String,
    pub allowed_size: i64,
    pub is_banned: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Update file type request
#[derive(Debug, Default, Deserialize)]
pub struct UpdateFileTypeRequest {
    pub allowed_size: Option<i64>,
    pub is_banned: Option<bool>,
}
