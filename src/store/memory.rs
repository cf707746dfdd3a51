//! In-memory metadata store with fault injection for exercising the vault's
//! saga logic away from the SQLite driver.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::models::{FileTypePolicy, NewStoredFile, StoredFile};
use crate::store::{ClaimTransaction, MetadataStore, StoreError, StoreErrorKind, StoreResult};

#[derive(Default)]
struct State {
    files: BTreeMap<String, StoredFile>,
    file_types: BTreeMap<String, FileTypePolicy>,
    fail_inserts: usize,
    forced_conflicts: usize,
    fail_registrations: bool,
    claim_stall: Option<Duration>,
    insert_stall: Option<Duration>,
    commit_stall: Option<Duration>,
    claims_begun: usize,
}

#[derive(Clone, Default)]
pub struct MemoryMetadataStore {
    state: Arc<Mutex<State>>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` inserts fail.
    pub fn fail_next_inserts(&self, count: usize) {
        self.state.lock().unwrap().fail_inserts = count;
    }

    /// Make the next `count` claim commits report a serialization conflict.
    pub fn force_conflicts(&self, count: usize) {
        self.state.lock().unwrap().forced_conflicts = count;
    }

    /// Make every `take_one` sleep before touching the rows.
    pub fn stall_claims(&self, delay: Duration) {
        self.state.lock().unwrap().claim_stall = Some(delay);
    }

    /// Make every `insert_file` sleep before touching the rows.
    pub fn stall_inserts(&self, delay: Duration) {
        self.state.lock().unwrap().insert_stall = Some(delay);
    }

    /// Make every claim commit sleep before applying its delete.
    pub fn stall_commits(&self, delay: Duration) {
        self.state.lock().unwrap().commit_stall = Some(delay);
    }

    pub fn fail_registrations(&self) {
        self.state.lock().unwrap().fail_registrations = true;
    }

    pub fn set_banned(&self, type_id: &str, allowed_size: i64) {
        let mut state = self.state.lock().unwrap();
        state
            .file_types
            .insert(type_id.to_string(), policy(type_id, allowed_size, true));
    }

    pub fn file_count(&self) -> usize {
        self.state.lock().unwrap().files.len()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().unwrap().files.contains_key(id)
    }

    pub fn claims_begun(&self) -> usize {
        self.state.lock().unwrap().claims_begun
    }

    pub fn file_type(&self, type_id: &str) -> Option<FileTypePolicy> {
        self.state.lock().unwrap().file_types.get(type_id).cloned()
    }
}

fn policy(type_id: &str, allowed_size: i64, is_banned: bool) -> FileTypePolicy {
    FileTypePolicy {
        id: type_id.to_string(),
        allowed_size,
        is_banned,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

fn oldest<'a>(files: impl Iterator<Item = &'a StoredFile>) -> Option<StoredFile> {
    files
        .min_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)))
        .cloned()
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn register_file_type(
        &self,
        type_id: &str,
        default_allowed_size: i64,
    ) -> StoreResult<FileTypePolicy> {
        let mut state = self.state.lock().unwrap();
        if state.fail_registrations {
            return Err(StoreError::new(StoreErrorKind::Unavailable, "registration disabled"));
        }
        Ok(state
            .file_types
            .entry(type_id.to_string())
            .or_insert_with(|| policy(type_id, default_allowed_size, false))
            .clone())
    }

    async fn list_file_types(&self) -> StoreResult<Vec<FileTypePolicy>> {
        Ok(self.state.lock().unwrap().file_types.values().cloned().collect())
    }

    async fn update_file_type(
        &self,
        type_id: &str,
        allowed_size: Option<i64>,
        is_banned: Option<bool>,
    ) -> StoreResult<FileTypePolicy> {
        let mut state = self.state.lock().unwrap();
        let entry = state
            .file_types
            .get_mut(type_id)
            .ok_or_else(|| StoreError::new(StoreErrorKind::NotFound, "file type not found"))?;
        if let Some(size) = allowed_size {
            entry.allowed_size = size;
        }
        if let Some(banned) = is_banned {
            entry.is_banned = banned;
        }
        Ok(entry.clone())
    }

    async fn aggregate_size(&self) -> StoreResult<i64> {
        Ok(self.state.lock().unwrap().files.values().map(|f| f.size).sum())
    }

    async fn insert_file(&self, file: &NewStoredFile) -> StoreResult<StoredFile> {
        let stall = self.state.lock().unwrap().insert_stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.fail_inserts > 0 {
            state.fail_inserts -= 1;
            return Err(StoreError::new(StoreErrorKind::Unavailable, "injected insert failure"));
        }
        if state.files.contains_key(&file.id) {
            return Err(StoreError::new(StoreErrorKind::Constraint, "duplicate id"));
        }
        let stored = file.clone().into_stored();
        state.files.insert(stored.id.clone(), stored.clone());
        Ok(stored)
    }

    async fn list_files(&self) -> StoreResult<Vec<StoredFile>> {
        let state = self.state.lock().unwrap();
        let mut files: Vec<StoredFile> = state.files.values().cloned().collect();
        files.sort_by(|a, b| (&a.created_at, &a.id).cmp(&(&b.created_at, &b.id)));
        Ok(files)
    }

    async fn begin_claim(&self) -> StoreResult<Box<dyn ClaimTransaction>> {
        self.state.lock().unwrap().claims_begun += 1;
        Ok(Box::new(MemoryClaimTransaction {
            state: self.state.clone(),
            pending: None,
        }))
    }
}

/// Optimistic transaction: the delete is buffered and validated at commit,
/// where a row already taken by someone else is a serialization conflict.
struct MemoryClaimTransaction {
    state: Arc<Mutex<State>>,
    pending: Option<String>,
}

#[async_trait]
impl ClaimTransaction for MemoryClaimTransaction {
    async fn take_one(
        &mut self,
        names: &[String],
        tags: &[String],
    ) -> StoreResult<Option<StoredFile>> {
        let stall = self.state.lock().unwrap().claim_stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let state = self.state.lock().unwrap();
        let filtered = oldest(state.files.values().filter(|f| {
            (tags.is_empty() || f.tags.iter().any(|t| tags.contains(t)))
                && (names.is_empty() || names.contains(&f.name))
        }));
        let candidate = filtered.or_else(|| oldest(state.files.values()));
        self.pending = candidate.as_ref().map(|f| f.id.clone());
        Ok(candidate)
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let stall = self.state.lock().unwrap().commit_stall;
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        if state.forced_conflicts > 0 {
            state.forced_conflicts -= 1;
            return Err(StoreError::conflict("injected conflict"));
        }
        if let Some(id) = self.pending.take() {
            if state.files.remove(&id).is_none() {
                return Err(StoreError::conflict(format!("file {} already claimed", id)));
            }
        }
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        self.pending = None;
        Ok(())
    }
}
