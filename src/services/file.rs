use std::sync::Arc;
use tracing::Span;

use crate::config::VaultConfig;
use crate::crypto::VaultKey;
use crate::db::Database;
use crate::error::{AppError, Result};
use crate::models::{
    CallerIdentity, ClaimForm, ClaimedFile, DepositItemResult, DepositReport, FileTypePolicy,
    StoredFile, UpdateFileTypeRequest, Upload, UsageResponse,
};
use crate::services::vault::{DepositRequest, VaultRepository, VaultSettings};
use crate::storage::{BlobStore, LocalStorage};
use crate::store::SqliteMetadataStore;

const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Split raw form values on spaces and commas, dropping empties and duplicates
pub fn split_list<S: AsRef<str>>(raw: &[S]) -> Vec<String> {
    let mut items: Vec<String> = Vec::new();
    for value in raw {
        for piece in value.as_ref().split([' ', ',']) {
            let piece = piece.trim();
            if !piece.is_empty() && !items.iter().any(|existing| existing == piece) {
                items.push(piece.to_string());
            }
        }
    }
    items
}

/// Vault service: request-shaped entry points over the repository
pub struct VaultService {
    repository: Arc<VaultRepository>,
}

impl VaultService {
    pub fn new(repository: VaultRepository) -> Self {
        Self {
            repository: Arc::new(repository),
        }
    }

    /// Wire the repository to SQLite and the local blob root
    pub fn open(db: Database, config: &VaultConfig, span: Span) -> Self {
        let blobs = LocalStorage::new(&config.file_path);
        tracing::info!(
            parent: &span,
            storage = blobs.storage_type(),
            root = ?blobs.base_path(),
            "Content store ready"
        );
        let repository = VaultRepository::new(
            Arc::new(SqliteMetadataStore::new(db)),
            Arc::new(blobs),
            VaultKey::from_secret(config.encrypt_key.as_bytes()),
            VaultSettings::from_config(config),
            span,
        );
        Self::new(repository)
    }

    /// Deposit every upload independently and report per item.
    ///
    /// Each item runs on its own task, so a dropped request still finishes or compensates it.
    pub async fn deposit_batch(
        &self,
        identity: &CallerIdentity,
        uploads: Vec<Upload>,
        raw_tags: &[String],
    ) -> Result<DepositReport> {
        if uploads.is_empty() {
            return Err(AppError::BadRequest("No file provided".to_string()));
        }

        let tags = split_list(raw_tags);
        let mut items = Vec::with_capacity(uploads.len());

        for upload in uploads {
            let Some(name) = upload.file_name.filter(|n| !n.trim().is_empty()) else {
                items.push(DepositItemResult {
                    name: String::new(),
                    saved: false,
                    id: None,
                    message: "Missing file name".to_string(),
                });
                continue;
            };

            let request = DepositRequest {
                payload: upload.data,
                declared_type: upload
                    .content_type
                    .filter(|t| !t.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
                display_name: name.clone(),
                owner_id: identity.user_id,
                tags: tags.clone(),
            };

            let repository = self.repository.clone();
            let outcome = tokio::spawn(async move { repository.deposit(request).await })
                .await
                .map_err(|e| AppError::Internal(format!("Deposit task failed: {}", e)))
                .and_then(|result| result);

            match outcome {
                Ok(file) => items.push(DepositItemResult {
                    name,
                    saved: true,
                    id: Some(file.id),
                    message: "File saved".to_string(),
                }),
                Err(e) => {
                    tracing::warn!(name = %name, error = %e, "Deposit failed");
                    items.push(DepositItemResult {
                        name,
                        saved: false,
                        id: None,
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(DepositReport { items })
    }

    /// Claim one file.
    ///
    /// Runs on its own task so the claim finishes even if the caller goes away.
    pub async fn claim(&self, form: ClaimForm) -> Result<ClaimedFile> {
        let names = split_list(form.name.as_slice());
        let tags = split_list(form.tags.as_slice());
        let repository = self.repository.clone();

        tokio::spawn(async move { repository.claim(&names, &tags).await })
            .await
            .map_err(|e| AppError::Internal(format!("Claim task failed: {}", e)))?
    }

    pub async fn list_files(&self) -> Result<Vec<StoredFile>> {
        self.repository.list_files().await
    }

    pub async fn list_file_types(&self) -> Result<Vec<FileTypePolicy>> {
        self.repository.list_file_types().await
    }

    pub async fn update_file_type(
        &self,
        type_id: &str,
        req: UpdateFileTypeRequest,
    ) -> Result<FileTypePolicy> {
        if req.allowed_size.is_none() && req.is_banned.is_none() {
            return Err(AppError::BadRequest("Nothing to update".to_string()));
        }
        self.repository
            .update_file_type(type_id, req.allowed_size, req.is_banned)
            .await
    }

    pub async fn usage(&self) -> Result<UsageResponse> {
        self.repository.usage().await
    }
}
