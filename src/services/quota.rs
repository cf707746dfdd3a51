use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::store::MetadataStore;

/// Aggregate size admission guard.
///
/// Advisory only: the read of the current total is not isolated from concurrent
/// deposits, so simultaneous uploads can overshoot the limit.
#[derive(Clone)]
pub struct QuotaTracker {
    store: Arc<dyn MetadataStore>,
    limit: i64,
}

impl QuotaTracker {
    pub fn new(store: Arc<dyn MetadataStore>, limit: i64) -> Self {
        Self { store, limit }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    pub async fn current_size(&self) -> Result<i64> {
        Ok(self.store.aggregate_size().await?)
    }

    pub async fn check(&self, proposed: i64) -> Result<()> {
        let current = self.current_size().await?;
        if current.saturating_add(proposed) > self.limit {
            return Err(AppError::QuotaExceeded {
                current,
                proposed,
                limit: self.limit,
            });
        }
        Ok(())
    }
}
