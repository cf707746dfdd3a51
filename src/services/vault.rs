use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{Instrument, Span};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::crypto::{self, VaultKey};
use crate::error::{AppError, IntegrityFault, Result};
use crate::models::{ClaimedFile, FileTypePolicy, NewStoredFile, StoredFile, UsageResponse};
use crate::services::policy::PolicyValidator;
use crate::services::quota::QuotaTracker;
use crate::services::retry::RetryPolicy;
use crate::services::saga::{BlobWriteGuard, ClaimResolution, Compensation, DepositStage};
use crate::storage::BlobStore;
use crate::store::MetadataStore;

/// Vault tuning knobs
#[derive(Debug, Clone)]
pub struct VaultSettings {
    pub max_files_size_bytes: i64,
    pub default_allowed_size_bytes: i64,
    pub retry: RetryPolicy,
    pub transaction_timeout: Duration,
}

impl VaultSettings {
    pub fn from_config(config: &VaultConfig) -> Self {
        Self {
            max_files_size_bytes: config.max_files_size_bytes,
            default_allowed_size_bytes: config.default_allowed_size_bytes,
            retry: RetryPolicy::exponential(
                config.claim_retry_limit,
                Duration::from_millis(config.claim_retry_base_ms),
            )
            .with_max_delay(Duration::from_millis(config.claim_retry_max_delay_ms)),
            transaction_timeout: Duration::from_millis(config.transaction_timeout_ms),
        }
    }
}

/// A payload to deposit
#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub payload: Bytes,
    pub declared_type: String,
    pub display_name: String,
    pub owner_id: i64,
    pub tags: Vec<String>,
}

/// Deposit and claim over the metadata store and the content store
pub struct VaultRepository {
    store: Arc<dyn MetadataStore>,
    blobs: Arc<dyn BlobStore>,
    key: VaultKey,
    policy: PolicyValidator,
    quota: QuotaTracker,
    retry: RetryPolicy,
    transaction_timeout: Duration,
    span: Span,
}

impl VaultRepository {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        key: VaultKey,
        settings: VaultSettings,
        span: Span,
    ) -> Self {
        Self {
            policy: PolicyValidator::new(store.clone(), settings.default_allowed_size_bytes),
            quota: QuotaTracker::new(store.clone(), settings.max_files_size_bytes),
            store,
            blobs,
            key,
            retry: settings.retry,
            transaction_timeout: settings.transaction_timeout,
            span,
        }
    }

    /// Validate, seal and persist a payload.
    ///
    /// The blob is written before the row. If the row insert fails the blob is
    /// removed again; if that removal fails too the orphan is reported on the
    /// integrity log and the insert error is still what the caller sees.
    pub async fn deposit(&self, req: DepositRequest) -> Result<StoredFile> {
        let span = tracing::info_span!(
            parent: &self.span,
            "deposit",
            name = %req.display_name,
            file_type = %req.declared_type,
            owner_id = req.owner_id,
        );
        self.deposit_inner(req).instrument(span).await
    }

    async fn deposit_inner(&self, req: DepositRequest) -> Result<StoredFile> {
        let size = i64::try_from(req.payload.len())
            .map_err(|_| AppError::BadRequest("Payload too large".to_string()))?;

        self.policy.validate(&req.declared_type, size).await?;
        self.quota.check(size).await?;
        let stage = DepositStage::Admitted;

        let id = Uuid::new_v4().simple().to_string();
        let sealed = crypto::seal(&req.payload, &self.key)?;
        self.blobs.put(&id, Bytes::from(sealed)).await?;
        let stage = stage.blob_written(&id);
        let guard = BlobWriteGuard::new(self.blobs.clone(), &id);

        let row = NewStoredFile {
            id: id.clone(),
            name: req.display_name,
            owner_id: req.owner_id,
            file_type: req.declared_type,
            size,
            tags: req.tags,
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
        };

        match self.store.insert_file(&row).await {
            Ok(file) => {
                guard.settle();
                tracing::debug!(id = %file.id, size, stage = ?stage.recorded(), "Deposit recorded");
                Ok(file)
            }
            Err(err) => {
                tracing::error!(id = %id, error = %err, "Can't save file into database");
                if let Some(fault) = self.compensate(stage.compensation()).await {
                    fault.report();
                }
                guard.settle();
                Err(err.into())
            }
        }
    }

    async fn compensate(&self, compensation: Compensation) -> Option<IntegrityFault> {
        match compensation {
            Compensation::Nothing => None,
            Compensation::DeleteBlob(id) => match self.blobs.delete(&id).await {
                Ok(()) => {
                    tracing::info!(id = %id, "Removed blob of failed deposit");
                    None
                }
                Err(e) => Some(IntegrityFault::orphaned_blob(
                    &id,
                    format!("compensating delete failed: {}", e),
                )),
            },
        }
    }

    /// Remove and return one stored file.
    ///
    /// Selection, row delete and commit happen in one serializable transaction;
    /// the commit waits until the blob has been read and decrypted. Lost
    /// serialization races restart the whole attempt until the retry budget
    /// runs out, which surfaces as `Contention`.
    pub async fn claim(&self, names: &[String], tags: &[String]) -> Result<ClaimedFile> {
        let span = tracing::info_span!(parent: &self.span, "claim", names = ?names, tags = ?tags);
        async {
            let mut attempt = 0;
            loop {
                attempt += 1;
                match self.claim_once(names, tags).await {
                    Err(err) if err.is_serialization_conflict() => {
                        match self.retry.delay_after(attempt) {
                            Some(delay) => {
                                tracing::debug!(attempt, ?delay, error = %err, "Claim lost a serialization race, retrying");
                                tokio::time::sleep(delay).await;
                            }
                            None => {
                                tracing::warn!(attempt, limit = self.retry.max_attempts(), "Claim retry budget exhausted");
                                return Err(AppError::Contention(attempt));
                            }
                        }
                    }
                    other => return other,
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn claim_once(&self, names: &[String], tags: &[String]) -> Result<ClaimedFile> {
        let deadline = Instant::now() + self.transaction_timeout;
        let mut tx = within(deadline, self.store.begin_claim()).await?;

        // An early return drops `tx`, which rolls it back.
        let selected = match within(deadline, tx.take_one(names, tags)).await? {
            Some(file) => file,
            None => {
                within(deadline, tx.rollback()).await?;
                return Err(AppError::NotFound("No file available".to_string()));
            }
        };

        match ClaimResolution::from_read(self.read_blob(&selected.id).await) {
            ClaimResolution::Commit(data) => {
                if let Err(err) = within(deadline, tx.commit()).await {
                    if matches!(err, AppError::StoreTimeout) {
                        // The commit may still land, so the blob stays.
                        IntegrityFault::orphaned_blob(
                            &selected.id,
                            "claim commit outcome unknown after deadline, blob kept",
                        )
                        .report();
                    }
                    return Err(err);
                }
                // Past this point the row is gone for good; the blob goes too, best-effort.
                self.discard_blob(&selected.id).await;
                tracing::info!(id = %selected.id, name = %selected.name, size = selected.size, "File claimed");
                Ok(ClaimedFile {
                    file: selected,
                    data,
                })
            }
            ClaimResolution::CommitAsMissing => {
                within(deadline, tx.commit()).await?;
                tracing::warn!(id = %selected.id, "Blob was already gone, removed its dangling row");
                Err(AppError::NotFound("No file available".to_string()))
            }
            ClaimResolution::Rollback(err) => {
                if let Err(e) = within(deadline, tx.rollback()).await {
                    tracing::warn!(id = %selected.id, error = %e, "Rollback after failed read did not complete");
                }
                Err(err)
            }
        }
    }

    async fn read_blob(&self, id: &str) -> Result<Vec<u8>> {
        let sealed = self.blobs.get(id).await?;
        crypto::open(&sealed, &self.key)
    }

    async fn discard_blob(&self, id: &str) {
        if let Err(e) = self.blobs.delete(id).await {
            IntegrityFault::orphaned_blob(id, format!("post-claim delete failed: {}", e)).report();
        }
    }

    pub async fn list_files(&self) -> Result<Vec<StoredFile>> {
        Ok(self.store.list_files().await?)
    }

    pub async fn list_file_types(&self) -> Result<Vec<FileTypePolicy>> {
        Ok(self.store.list_file_types().await?)
    }

    pub async fn update_file_type(
        &self,
        type_id: &str,
        allowed_size: Option<i64>,
        is_banned: Option<bool>,
    ) -> Result<FileTypePolicy> {
        if matches!(allowed_size, Some(size) if size < 0) {
            return Err(AppError::BadRequest("allowed_size must not be negative".to_string()));
        }
        let policy = self
            .store
            .update_file_type(type_id, allowed_size, is_banned)
            .await?;
        tracing::info!(file_type = %policy.id, allowed_size = policy.allowed_size, is_banned = policy.is_banned, "File type policy updated");
        Ok(policy)
    }

    pub async fn usage(&self) -> Result<UsageResponse> {
        let used = self.quota.current_size().await?;
        let limit = self.quota.limit();
        Ok(UsageResponse {
            used_bytes: used,
            limit_bytes: limit,
            remaining_bytes: (limit - used).max(0),
        })
    }
}

/// Run a metadata store step under the attempt deadline
async fn within<T, E, F>(deadline: Instant, step: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, E>>,
    AppError: From<E>,
{
    match tokio::time::timeout_at(deadline, step).await {
        Ok(result) => result.map_err(AppError::from),
        Err(_) => Err(AppError::StoreTimeout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;
    use crate::db::Database;
    use crate::storage::LocalStorage;
    use crate::store::memory::MemoryMetadataStore;
    use crate::store::SqliteMetadataStore;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        store: MemoryMetadataStore,
        blobs: Arc<LocalStorage>,
        repo: Arc<VaultRepository>,
    }

    fn settings(limit: i64, retries: usize) -> VaultSettings {
        VaultSettings {
            max_files_size_bytes: limit,
            default_allowed_size_bytes: 1_000,
            retry: RetryPolicy::exponential(retries, Duration::from_millis(1)),
            transaction_timeout: Duration::from_secs(5),
        }
    }

    fn fixture_with(settings: VaultSettings) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let blobs = Arc::new(LocalStorage::new(dir.path().join("blobs")));
        let repo = Arc::new(VaultRepository::new(
            Arc::new(store.clone()),
            blobs.clone(),
            VaultKey::from_secret(b"test-key"),
            settings,
            Span::none(),
        ));
        Fixture {
            dir,
            store,
            blobs,
            repo,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(settings(10_000, 5))
    }

    fn request(name: &str, payload: &[u8], tags: &[&str]) -> DepositRequest {
        DepositRequest {
            payload: Bytes::copy_from_slice(payload),
            declared_type: "text/plain".to_string(),
            display_name: name.to_string(),
            owner_id: 42,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        }
    }

    fn blob_count(fx: &Fixture) -> usize {
        match std::fs::read_dir(fx.dir.path().join("blobs")) {
            Ok(entries) => entries.count(),
            Err(_) => 0,
        }
    }

    /// Local storage whose deletes can be switched to fail.
    struct FlakyDeletes {
        inner: LocalStorage,
        fail: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for FlakyDeletes {
        async fn put(&self, id: &str, data: Bytes) -> Result<()> {
            self.inner.put(id, data).await
        }

        async fn get(&self, id: &str) -> Result<Bytes> {
            self.inner.get(id).await
        }

        async fn delete(&self, id: &str) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "delete denied",
                )));
            }
            self.inner.delete(id).await
        }

        async fn exists(&self, id: &str) -> Result<bool> {
            self.inner.exists(id).await
        }

        fn storage_type(&self) -> &'static str {
            "flaky"
        }
    }

    fn flaky_fixture() -> (TempDir, MemoryMetadataStore, Arc<FlakyDeletes>, VaultRepository) {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryMetadataStore::new();
        let blobs = Arc::new(FlakyDeletes {
            inner: LocalStorage::new(dir.path().join("blobs")),
            fail: AtomicBool::new(true),
        });
        let repo = VaultRepository::new(
            Arc::new(store.clone()),
            blobs.clone(),
            VaultKey::from_secret(b"test-key"),
            settings(10_000, 5),
            Span::none(),
        );
        (dir, store, blobs, repo)
    }

    /// Store a row with an explicit timestamp plus its sealed blob.
    async fn plant(fx: &Fixture, id: &str, name: &str, created_at: &str, tags: &[&str]) {
        let sealed = crypto::seal(name.as_bytes(), &VaultKey::from_secret(b"test-key")).unwrap();
        fx.blobs.put(id, Bytes::from(sealed)).await.unwrap();
        fx.store
            .insert_file(&NewStoredFile {
                id: id.to_string(),
                name: name.to_string(),
                owner_id: 1,
                file_type: "text/plain".to_string(),
                size: name.len() as i64,
                tags: tags.iter().map(|t| t.to_string()).collect(),
                created_at: created_at.to_string(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_deposit_then_claim() {
        let fx = fixture();
        let stored = fx
            .repo
            .deposit(request("notes.txt", b"secret notes", &["work"]))
            .await
            .unwrap();
        assert_eq!(stored.size, 12);
        assert_eq!(stored.id.len(), 32);
        assert!(fx.blobs.exists(&stored.id).await.unwrap());

        // Encrypted at rest
        let raw = fx.blobs.get(&stored.id).await.unwrap();
        assert_ne!(&raw[crypto::NONCE_LEN..], &b"secret notes"[..]);

        let claimed = fx.repo.claim(&[], &[]).await.unwrap();
        assert_eq!(claimed.data, Bytes::from_static(b"secret notes"));
        assert_eq!(claimed.file.id, stored.id);
        assert_eq!(claimed.file.owner_id, 42);
        assert_eq!(claimed.file.tags, vec!["work".to_string()]);

        assert_eq!(fx.store.file_count(), 0);
        assert!(!fx.blobs.exists(&stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_two_deposits_coexist() {
        let fx = fixture();
        let a = fx.repo.deposit(request("a", b"12345", &[])).await.unwrap();
        let b = fx.repo.deposit(request("b", b"1234567", &[])).await.unwrap();
        assert_ne!(a.id, b.id);

        assert!(fx.store.contains(&a.id) && fx.store.contains(&b.id));
        assert!(fx.blobs.exists(&a.id).await.unwrap());
        assert!(fx.blobs.exists(&b.id).await.unwrap());
        assert_eq!(fx.repo.usage().await.unwrap().used_bytes, 12);
    }

    #[tokio::test]
    async fn test_banned_type_leaves_nothing() {
        let fx = fixture();
        fx.store.set_banned("text/plain", 1_000);
        let err = fx.repo.deposit(request("a", b"data", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::PolicyBanned(_)));
        assert_eq!(fx.store.file_count(), 0);
        assert_eq!(blob_count(&fx), 0);
    }

    #[tokio::test]
    async fn test_quota_exceeded_leaves_nothing_new() {
        let fx = fixture_with(settings(10, 5));
        fx.repo.deposit(request("a", b"123456", &[])).await.unwrap();
        let err = fx.repo.deposit(request("b", b"12345", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::QuotaExceeded { current: 6, proposed: 5, limit: 10 }));
        assert_eq!(fx.store.file_count(), 1);
        assert_eq!(blob_count(&fx), 1);
    }

    #[tokio::test]
    async fn test_failed_insert_removes_blob() {
        let fx = fixture();
        fx.store.fail_next_inserts(1);
        let err = fx.repo.deposit(request("a", b"data", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
        assert_eq!(fx.store.file_count(), 0);
        assert_eq!(blob_count(&fx), 0);
    }

    #[tokio::test]
    async fn test_cancelled_deposit_removes_blob() {
        let fx = fixture();
        fx.store.stall_inserts(Duration::from_millis(300));

        let outcome = tokio::time::timeout(
            Duration::from_millis(100),
            fx.repo.deposit(request("a", b"data", &[])),
        )
        .await;
        assert!(outcome.is_err());

        for _ in 0..50 {
            if blob_count(&fx) == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(blob_count(&fx), 0);
        assert_eq!(fx.store.file_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_compensation_keeps_insert_error() {
        let (dir, store, _blobs, repo) = flaky_fixture();
        store.fail_next_inserts(1);

        let err = repo.deposit(request("a", b"data", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::Store(_)));
        assert_eq!(store.file_count(), 0);

        let left: Vec<String> = std::fs::read_dir(dir.path().join("blobs"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(left.len(), 1);

        let fault = repo
            .compensate(Compensation::DeleteBlob(left[0].clone()))
            .await
            .unwrap();
        assert_eq!(fault.blob_id, left[0]);
        assert!(fault.reason.contains("compensating delete failed"));
    }

    #[tokio::test]
    async fn test_failed_blob_delete_still_completes_claim() {
        let (_dir, store, blobs, repo) = flaky_fixture();
        blobs.fail.store(false, Ordering::SeqCst);
        let stored = repo.deposit(request("a", b"payload", &[])).await.unwrap();
        blobs.fail.store(true, Ordering::SeqCst);

        let claimed = repo.claim(&[], &[]).await.unwrap();
        assert_eq!(claimed.data, Bytes::from_static(b"payload"));
        assert!(!store.contains(&stored.id));
        assert!(blobs.exists(&stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_claim_empty_vault() {
        let fx = fixture();
        let err = fx.repo.claim(&[], &["any".to_string()]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(fx.store.claims_begun(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_filter_falls_back_to_oldest() {
        let fx = fixture();
        plant(&fx, "0003", "newest", "2024-03-01T00:00:00.000000Z", &["a"]).await;
        plant(&fx, "0001", "oldest", "2024-01-01T00:00:00.000000Z", &["b"]).await;
        plant(&fx, "0002", "middle", "2024-02-01T00:00:00.000000Z", &["c"]).await;

        let claimed = fx.repo.claim(&[], &["zzz".to_string()]).await.unwrap();
        assert_eq!(claimed.file.id, "0001");
        assert_eq!(claimed.data, Bytes::from_static(b"oldest"));

        let claimed = fx.repo.claim(&[], &["a".to_string()]).await.unwrap();
        assert_eq!(claimed.file.id, "0003");

        let claimed = fx.repo.claim(&["nope".to_string()], &[]).await.unwrap();
        assert_eq!(claimed.file.id, "0002");
    }

    #[tokio::test]
    async fn test_missing_blob_removes_row_and_reports_not_found() {
        let fx = fixture();
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.blobs.delete(&stored.id).await.unwrap();

        let err = fx.repo.claim(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert!(!fx.store.contains(&stored.id));
    }

    #[tokio::test]
    async fn test_corrupt_blob_keeps_row() {
        let fx = fixture();
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.blobs
            .put(&stored.id, Bytes::from_static(b"definitely not a valid ciphertext"))
            .await
            .unwrap();

        let err = fx.repo.claim(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::DecryptionFailed(_)));
        assert!(fx.store.contains(&stored.id));
        assert!(fx.blobs.exists(&stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_conflicts_are_retried() {
        let fx = fixture();
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.store.force_conflicts(2);

        let claimed = fx.repo.claim(&[], &[]).await.unwrap();
        assert_eq!(claimed.file.id, stored.id);
        assert_eq!(fx.store.claims_begun(), 3);
    }

    #[tokio::test]
    async fn test_exhausted_retries_surface_contention() {
        let fx = fixture_with(settings(10_000, 3));
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.store.force_conflicts(10);

        let err = fx.repo.claim(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::Contention(3)));
        assert!(fx.store.contains(&stored.id));
        assert!(fx.blobs.exists(&stored.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_stalled_store_times_out() {
        let mut config = settings(10_000, 3);
        config.transaction_timeout = Duration::from_millis(50);
        let fx = fixture_with(config);
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.store.stall_claims(Duration::from_millis(500));

        let err = fx.repo.claim(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::StoreTimeout));
        assert!(fx.store.contains(&stored.id));
    }

    #[tokio::test]
    async fn test_commit_timeout_keeps_blob_and_row() {
        let mut config = settings(10_000, 3);
        config.transaction_timeout = Duration::from_millis(50);
        let fx = fixture_with(config);
        let stored = fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        fx.store.stall_commits(Duration::from_millis(500));

        let err = fx.repo.claim(&[], &[]).await.unwrap_err();
        assert!(matches!(err, AppError::StoreTimeout));
        assert!(fx.store.contains(&stored.id));
        assert!(fx.blobs.exists(&stored.id).await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_never_share_a_file() {
        let fx = fixture_with(settings(10_000, 32));
        for i in 0..3 {
            fx.repo
                .deposit(request(&format!("f{}", i), b"payload", &[]))
                .await
                .unwrap();
        }

        let mut handles = Vec::new();
        for _ in 0..8 {
            let repo = fx.repo.clone();
            handles.push(tokio::spawn(async move { repo.claim(&[], &[]).await }));
        }

        let mut claimed = HashSet::new();
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(file) => assert!(claimed.insert(file.file.id)),
                Err(AppError::NotFound(_)) => not_found += 1,
                Err(e) => panic!("unexpected claim error: {:?}", e),
            }
        }
        assert_eq!(claimed.len(), 3);
        assert_eq!(not_found, 5);
        assert_eq!(blob_count(&fx), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_claims_on_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&DatabaseConfig {
            path: dir.path().join("vault.db").to_string_lossy().to_string(),
            max_connections: 4,
            busy_timeout_ms: 2000,
        })
        .await
        .unwrap();
        db.run_migrations().await.unwrap();

        let blobs = Arc::new(LocalStorage::new(dir.path().join("blobs")));
        let repo = Arc::new(VaultRepository::new(
            Arc::new(SqliteMetadataStore::new(db)),
            blobs,
            VaultKey::from_secret(b"test-key"),
            VaultSettings {
                max_files_size_bytes: 10_000,
                default_allowed_size_bytes: 1_000,
                retry: RetryPolicy::exponential(64, Duration::from_millis(2))
                    .with_max_delay(Duration::from_millis(50)),
                transaction_timeout: Duration::from_secs(10),
            },
            Span::none(),
        ));

        for i in 0..3 {
            repo.deposit(request(&format!("f{}", i), b"payload", &["batch"]))
                .await
                .unwrap();
        }
        assert_eq!(repo.usage().await.unwrap().used_bytes, 21);

        let mut handles = Vec::new();
        for _ in 0..6 {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.claim(&[], &["batch".to_string()]).await
            }));
        }

        let mut claimed = HashSet::new();
        let mut not_found = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(file) => assert!(claimed.insert(file.file.id)),
                Err(AppError::NotFound(_)) => not_found += 1,
                Err(e) => panic!("unexpected claim error: {:?}", e),
            }
        }
        assert_eq!(claimed.len(), 3);
        assert_eq!(not_found, 3);
        assert_eq!(repo.usage().await.unwrap().used_bytes, 0);
    }

    #[tokio::test]
    async fn test_update_file_type_bans_future_deposits() {
        let fx = fixture();
        fx.repo.deposit(request("a", b"data", &[])).await.unwrap();
        let policy = fx
            .repo
            .update_file_type("text/plain", None, Some(true))
            .await
            .unwrap();
        assert!(policy.is_banned);

        let err = fx.repo.deposit(request("b", b"data", &[])).await.unwrap_err();
        assert!(matches!(err, AppError::PolicyBanned(_)));

        let err = fx.repo.update_file_type("missing/type", Some(1), None).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }
}
