use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::models::FileTypePolicy;
use crate::store::MetadataStore;

/// Per-type size ceiling and ban check. Unseen types are registered with the default ceiling.
#[derive(Clone)]
pub struct PolicyValidator {
    store: Arc<dyn MetadataStore>,
    default_allowed_size: i64,
}

impl PolicyValidator {
    pub fn new(store: Arc<dyn MetadataStore>, default_allowed_size: i64) -> Self {
        Self {
            store,
            default_allowed_size,
        }
    }

    pub async fn validate(&self, declared_type: &str, size: i64) -> Result<FileTypePolicy> {
        let policy = self
            .store
            .register_file_type(declared_type, self.default_allowed_size)
            .await
            .map_err(|e| {
                tracing::error!(file_type = %declared_type, error = %e, "Can't register file type");
                AppError::PolicyUnknownType(declared_type.to_string())
            })?;

        if policy.is_banned {
            return Err(AppError::PolicyBanned(policy.id));
        }
        if size > policy.allowed_size {
            return Err(AppError::PolicySizeExceeded {
                file_type: policy.id,
                size,
                allowed: policy.allowed_size,
            });
        }
        Ok(policy)
    }
}
