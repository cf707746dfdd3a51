use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Stored file model - one deposited, encrypted payload
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize)]
pub struct StoredFile {
    /// Blob address on the content store
    pub id: String,
    pub name: String,
    pub owner_id: i64,
    pub file_type: String,
    /// Plaintext size
    pub size: i64,
    pub created_at: String,
    #[sqlx(skip)]
    pub tags: Vec<String>,
}

/// Row to insert on deposit
#[derive(Debug, Clone)]
pub struct NewStoredFile {
    pub id: String,
    pub name: String,
    pub owner_id: i64,
    pub file_type: String,
    pub size: i64,
    pub tags: Vec<String>,
    pub created_at: String,
}

impl NewStoredFile {
    pub fn into_stored(self) -> StoredFile {
        StoredFile {
            id: self.id,
            name: self.name,
            owner_id: self.owner_id,
            file_type: self.file_type,
            size: self.size,
            created_at: self.created_at,
            tags: self.tags,
        }
    }
}

/// One uploaded part awaiting deposit
#[derive(Debug, Clone)]
pub struct Upload {
    pub file_name: Option<String>,
    pub content_type: Option<String>,
    pub data: bytes::Bytes,
}

/// Outcome of a single item in a batch deposit
#[derive(Debug, Clone, Serialize)]
pub struct DepositItemResult {
    pub name: String,
    pub saved: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub message: String,
}

/// Batch deposit report
#[derive(Debug, Clone, Serialize)]
pub struct DepositReport {
    pub items: Vec<DepositItemResult>,
}

impl DepositReport {
    pub fn all_saved(&self) -> bool {
        self.items.iter().all(|item| item.saved)
    }
}

/// Claim form fields, delimited by spaces or commas
#[derive(Debug, Default, Deserialize)]
pub struct ClaimForm {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub tags: Option<String>,
}

/// A claimed file: plaintext plus the metadata of the row it came from
#[derive(Debug, Clone)]
pub struct ClaimedFile {
    pub file: StoredFile,
    pub data: bytes::Bytes,
}

/// Vault usage response
#[derive(Debug, Serialize)]
pub struct UsageResponse {
    pub used_bytes: i64,
    pub limit_bytes: i64,
    pub remaining_bytes: i64,
}
