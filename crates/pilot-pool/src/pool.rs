//! Claim operations over the credential pool.
//!
//! All mutating operations hold the advisory lock for their full duration,
//! read the whole document, mutate in memory, and write the whole document
//! back atomically. Concurrent claimers that respect the lock protocol
//! therefore serialize cleanly: no two claims ever return the same record.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::lock::{DEFAULT_STALE_AFTER, PoolLock};
use crate::record::CredentialRecord;
use crate::store::{PoolDocument, write_document};

/// Default window a claimer waits for the pool lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// How a credential is claimed from the pool.
///
/// A deployment should pick one policy per pool file; the two styles are
/// not meant to be mixed on the same document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimPolicy {
    /// Remove the record from the pool as it is claimed.
    Take,
    /// Leave the record in place, marked with the claiming device.
    Assign,
}

/// Storage-agnostic credential pool interface.
///
/// [`FilePool`] is the production implementation; [`MemoryPool`] substitutes
/// in tests and embedded use where filesystem races would only add noise.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Removes and returns the first well-formed record in document order.
    /// Malformed entries are skipped in place with a warning.
    async fn pop_first(&self, consumer: &str) -> Result<CredentialRecord>;

    /// Returns the first record with no assigned device, along with its
    /// index in the stored list. Malformed entries are skipped with a
    /// warning; assigned entries are passed over.
    async fn find_first_unassigned(&self, consumer: &str) -> Result<(CredentialRecord, usize)>;

    /// Appends `device` to the record at `index`. Fails without mutating
    /// anything when the record is already assigned or the index is stale.
    async fn mark_assigned(&self, consumer: &str, index: usize, device: &str) -> Result<()>;

    /// Finds the first unassigned record and marks it in one locked pass,
    /// so no other claimer can slip in between the find and the mark.
    async fn claim_first_unassigned(
        &self,
        consumer: &str,
        device: &str,
    ) -> Result<(CredentialRecord, usize)>;

    /// Number of well-formed, unassigned records for the consumer.
    async fn count_unassigned(&self, consumer: &str) -> Result<usize>;
}

/// Claims one credential under the given policy.
pub async fn claim<R>(
    repo: &R,
    consumer: &str,
    device: &str,
    policy: ClaimPolicy,
) -> Result<CredentialRecord>
where
    R: CredentialRepository + ?Sized,
{
    match policy {
        ClaimPolicy::Take => repo.pop_first(consumer).await,
        ClaimPolicy::Assign => {
            let (record, _) = repo.claim_first_unassigned(consumer, device).await?;
            Ok(record)
        }
    }
}

/// File-backed pool guarded by the cross-process sentinel lock.
#[derive(Debug)]
pub struct FilePool {
    path: PathBuf,
    holder: String,
    lock_timeout: Duration,
    stale_after: Duration,
}

impl FilePool {
    /// A pool over the document at `path` with default lock tunables.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            holder: format!("pilot:{}", std::process::id()),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }

    /// Overrides the label recorded in the lock sentinel.
    pub fn with_holder(mut self, holder: impl Into<String>) -> Self {
        self.holder = holder.into();
        self
    }

    /// Overrides how long claims wait for the lock.
    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Overrides the sentinel age beyond which a holder is presumed crashed.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Path of the pool document.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Runs `op` on the loaded document with the lock held for the whole
    /// read-modify-write. `op` returns the result value and whether the
    /// document must be written back.
    async fn locked<T, F>(&self, op: F) -> Result<T>
    where
        F: FnOnce(&mut PoolDocument) -> Result<(T, bool)>,
    {
        let lock = PoolLock::acquire(
            &self.path,
            &self.holder,
            self.lock_timeout,
            self.stale_after,
        )
        .await?;
        let mut doc = PoolDocument::load(&self.path)?;
        let (value, dirty) = op(&mut doc)?;
        if dirty {
            write_document(&self.path, &doc)?;
        }
        lock.release();
        Ok(value)
    }
}

#[async_trait]
impl CredentialRepository for FilePool {
    async fn pop_first(&self, consumer: &str) -> Result<CredentialRecord> {
        let (record, remaining) = self
            .locked(|doc| {
                let mut records = doc.records(consumer);
                let record = pop_first_in(consumer, &mut records)?;
                let remaining = records.len();
                doc.set_records(consumer, records);
                Ok(((record, remaining), true))
            })
            .await?;
        info!(
            target = "pilot.pool",
            consumer = %consumer,
            user = %record.user,
            remaining,
            "credential taken"
        );
        Ok(record)
    }

    async fn find_first_unassigned(&self, consumer: &str) -> Result<(CredentialRecord, usize)> {
        self.locked(|doc| {
            let records = doc.records(consumer);
            let found = find_first_unassigned_in(consumer, &records)?;
            Ok((found, false))
        })
        .await
    }

    async fn mark_assigned(&self, consumer: &str, index: usize, device: &str) -> Result<()> {
        self.locked(|doc| {
            let mut records = doc.records(consumer);
            mark_assigned_in(consumer, &mut records, index, device)?;
            doc.set_records(consumer, records);
            Ok(((), true))
        })
        .await?;
        info!(
            target = "pilot.pool",
            consumer = %consumer,
            index,
            device = %device,
            "credential assigned"
        );
        Ok(())
    }

    async fn claim_first_unassigned(
        &self,
        consumer: &str,
        device: &str,
    ) -> Result<(CredentialRecord, usize)> {
        let (record, index) = self
            .locked(|doc| {
                let mut records = doc.records(consumer);
                let (_, index) = find_first_unassigned_in(consumer, &records)?;
                let record = mark_assigned_in(consumer, &mut records, index, device)?;
                doc.set_records(consumer, records);
                Ok(((record, index), true))
            })
            .await?;
        info!(
            target = "pilot.pool",
            consumer = %consumer,
            user = %record.user,
            index,
            device = %device,
            "credential claimed"
        );
        Ok((record, index))
    }

    async fn count_unassigned(&self, consumer: &str) -> Result<usize> {
        self.locked(|doc| {
            let count = doc
                .records(consumer)
                .iter()
                .filter_map(|raw| CredentialRecord::parse(raw))
                .filter(|record| !record.is_assigned())
                .count();
            Ok((count, false))
        })
        .await
    }
}

/// In-memory pool with the same claim semantics as [`FilePool`].
#[derive(Debug, Default)]
pub struct MemoryPool {
    consumers: Mutex<HashMap<String, Vec<String>>>,
}

impl MemoryPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds one consumer's record list.
    pub async fn insert(&self, consumer: impl Into<String>, records: Vec<String>) {
        self.consumers.lock().await.insert(consumer.into(), records);
    }

    /// Current record strings for a consumer.
    pub async fn records(&self, consumer: &str) -> Vec<String> {
        self.consumers
            .lock()
            .await
            .get(consumer)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryPool {
    async fn pop_first(&self, consumer: &str) -> Result<CredentialRecord> {
        let mut consumers = self.consumers.lock().await;
        let records = consumers.entry(consumer.to_string()).or_default();
        pop_first_in(consumer, records)
    }

    async fn find_first_unassigned(&self, consumer: &str) -> Result<(CredentialRecord, usize)> {
        let consumers = self.consumers.lock().await;
        let records = consumers.get(consumer).cloned().unwrap_or_default();
        find_first_unassigned_in(consumer, &records)
    }

    async fn mark_assigned(&self, consumer: &str, index: usize, device: &str) -> Result<()> {
        let mut consumers = self.consumers.lock().await;
        let records = consumers.entry(consumer.to_string()).or_default();
        mark_assigned_in(consumer, records, index, device)?;
        Ok(())
    }

    async fn claim_first_unassigned(
        &self,
        consumer: &str,
        device: &str,
    ) -> Result<(CredentialRecord, usize)> {
        let mut consumers = self.consumers.lock().await;
        let records = consumers.entry(consumer.to_string()).or_default();
        let (_, index) = find_first_unassigned_in(consumer, records)?;
        let record = mark_assigned_in(consumer, records, index, device)?;
        Ok((record, index))
    }

    async fn count_unassigned(&self, consumer: &str) -> Result<usize> {
        let consumers = self.consumers.lock().await;
        Ok(consumers
            .get(consumer)
            .map(|records| {
                records
                    .iter()
                    .filter_map(|raw| CredentialRecord::parse(raw))
                    .filter(|record| !record.is_assigned())
                    .count()
            })
            .unwrap_or(0))
    }
}

fn pop_first_in(consumer: &str, records: &mut Vec<String>) -> Result<CredentialRecord> {
    let mut found = None;
    for (index, raw) in records.iter().enumerate() {
        match CredentialRecord::parse(raw) {
            Some(record) => {
                found = Some((index, record));
                break;
            }
            None => {
                warn!(
                    target = "pilot.pool",
                    consumer = %consumer,
                    index,
                    "skipping malformed record"
                );
            }
        }
    }
    match found {
        Some((index, record)) => {
            records.remove(index);
            Ok(record)
        }
        None => Err(Error::EmptyPool {
            consumer: consumer.to_string(),
        }),
    }
}

fn find_first_unassigned_in(
    consumer: &str,
    records: &[String],
) -> Result<(CredentialRecord, usize)> {
    for (index, raw) in records.iter().enumerate() {
        match CredentialRecord::parse(raw) {
            Some(record) if !record.is_assigned() => return Ok((record, index)),
            Some(_) => {}
            None => {
                warn!(
                    target = "pilot.pool",
                    consumer = %consumer,
                    index,
                    "skipping malformed record"
                );
            }
        }
    }
    Err(Error::NoUnassigned {
        consumer: consumer.to_string(),
    })
}

fn mark_assigned_in(
    consumer: &str,
    records: &mut [String],
    index: usize,
    device: &str,
) -> Result<CredentialRecord> {
    let len = records.len();
    let raw = records
        .get_mut(index)
        .ok_or(Error::IndexOutOfRange { index, len })?;
    match CredentialRecord::parse(raw) {
        None => {
            warn!(
                target = "pilot.pool",
                consumer = %consumer,
                index,
                "refusing to assign a malformed record"
            );
            Err(Error::MalformedRecord { index })
        }
        Some(record) if record.is_assigned() => Err(Error::AlreadyAssigned { index }),
        Some(mut record) => {
            record.assign(device);
            *raw = record.to_string();
            Ok(record)
        }
    }
}
