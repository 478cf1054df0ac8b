//! Advisory lock for the pool document.
//!
//! The marker at `<pool-path>.lock` holds a JSON sentinel identifying its
//! holder (pid, hostname, acquisition time). Acquisition retries on a fixed
//! poll interval until the configured timeout; an existing marker is only
//! reclaimed once the holder is verified dead on this host or the sentinel
//! has aged past a generous bound. A slow but live holder is never evicted.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Fixed delay between acquisition attempts.
pub const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Sentinel age beyond which a holder is presumed crashed.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Identity record written into the lock marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockSentinel {
    pub pid: u32,
    pub hostname: String,
    pub acquired_at_ms: u64,
    pub holder: String,
}

impl LockSentinel {
    fn current(holder: &str) -> Self {
        Self {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at_ms: now_ms(),
            holder: holder.to_string(),
        }
    }

    /// Whether the holding process is still alive, as far as this host can
    /// tell. A sentinel from another host cannot be verified and is assumed
    /// alive.
    pub fn holder_alive(&self) -> bool {
        if self.hostname != hostname() {
            return true;
        }
        Path::new(&format!("/proc/{}", self.pid)).exists()
    }

    /// Time elapsed since the sentinel was written.
    pub fn age(&self) -> Duration {
        Duration::from_millis(now_ms().saturating_sub(self.acquired_at_ms))
    }
}

/// Exclusive advisory lock over one pool document.
///
/// The marker is removed by [`PoolLock::release`], or best-effort on drop.
#[derive(Debug)]
pub struct PoolLock {
    path: PathBuf,
    released: bool,
}

impl PoolLock {
    /// Acquires the lock for the pool at `pool`, waiting up to `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::LockTimeout`] when another live holder keeps the
    /// marker for the whole window.
    pub async fn acquire(
        pool: &Path,
        holder: &str,
        timeout: Duration,
        stale_after: Duration,
    ) -> Result<Self> {
        let path = lock_path(pool);
        let started = Instant::now();
        loop {
            match try_create(&path, holder) {
                Ok(()) => {
                    debug!(target = "pilot.pool", path = %path.display(), "lock acquired");
                    return Ok(Self {
                        path,
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if reclaim_if_stale(&path, stale_after)? {
                        continue;
                    }
                    if started.elapsed() >= timeout {
                        return Err(Error::LockTimeout {
                            path,
                            waited: started.elapsed(),
                        });
                    }
                    tokio::time::sleep(POLL_INTERVAL).await;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    /// Path of the lock marker file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Removes the marker. Releasing a marker that is already gone is a
    /// safe no-op.
    pub fn release(mut self) {
        self.remove_marker();
    }

    fn remove_marker(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(target = "pilot.pool", path = %self.path.display(), "lock released"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                warn!(
                    target = "pilot.pool",
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove lock marker"
                );
            }
        }
    }
}

impl Drop for PoolLock {
    fn drop(&mut self) {
        self.remove_marker();
    }
}

/// Marker path for a pool document: the document path with `.lock` appended.
pub fn lock_path(pool: &Path) -> PathBuf {
    let mut os = pool.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn try_create(path: &Path, holder: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    let sentinel = LockSentinel::current(holder);
    let json = serde_json::to_string(&sentinel).map_err(std::io::Error::other)?;
    if let Err(err) = file.write_all(json.as_bytes()) {
        // The marker is ours but unreadable; drop it rather than hold a
        // claim nobody can inspect.
        drop(file);
        let _ = std::fs::remove_file(path);
        return Err(err);
    }
    Ok(())
}

/// Removes the marker if its holder is verifiably gone. Returns `true` when
/// the caller may immediately retry exclusive creation.
fn reclaim_if_stale(path: &Path, stale_after: Duration) -> Result<bool> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        // Holder released between our create attempt and this read.
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(true),
        Err(err) => return Err(err.into()),
    };

    match serde_json::from_str::<LockSentinel>(&raw) {
        Ok(sentinel) => {
            if !sentinel.holder_alive() {
                warn!(
                    target = "pilot.pool",
                    pid = sentinel.pid,
                    holder = %sentinel.holder,
                    path = %path.display(),
                    "reclaiming lock from dead holder"
                );
            } else if sentinel.age() > stale_after {
                warn!(
                    target = "pilot.pool",
                    pid = sentinel.pid,
                    age_ms = sentinel.age().as_millis() as u64,
                    path = %path.display(),
                    "reclaiming lock aged past the stale bound"
                );
            } else {
                return Ok(false);
            }
        }
        Err(_) => {
            // Unreadable marker: only the file's own age can vouch for it.
            let age = std::fs::metadata(path)
                .and_then(|meta| meta.modified())
                .ok()
                .and_then(|modified| modified.elapsed().ok());
            match age {
                Some(age) if age > stale_after => {
                    warn!(
                        target = "pilot.pool",
                        path = %path.display(),
                        "reclaiming unreadable lock marker"
                    );
                }
                _ => return Ok(false),
            }
        }
    }

    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(true),
        Err(err) => Err(err.into()),
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("HOST"))
        .unwrap_or_else(|_| "unknown".into())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool_path(dir: &tempfile::TempDir) -> PathBuf {
        dir.path().join("accounts.yaml")
    }

    #[test]
    fn lock_path_appends_suffix() {
        assert_eq!(
            lock_path(Path::new("/tmp/accounts.yaml")),
            PathBuf::from("/tmp/accounts.yaml.lock")
        );
    }

    #[tokio::test]
    async fn acquire_creates_marker_and_release_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);

        let lock = PoolLock::acquire(&pool, "test", Duration::from_secs(1), DEFAULT_STALE_AFTER)
            .await
            .unwrap();
        let marker = lock.path().to_path_buf();
        assert!(marker.exists());

        let sentinel: LockSentinel =
            serde_json::from_str(&std::fs::read_to_string(&marker).unwrap()).unwrap();
        assert_eq!(sentinel.pid, std::process::id());
        assert_eq!(sentinel.holder, "test");

        lock.release();
        assert!(!marker.exists());
    }

    #[tokio::test]
    async fn release_of_missing_marker_is_a_noop() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);

        let lock = PoolLock::acquire(&pool, "test", Duration::from_secs(1), DEFAULT_STALE_AFTER)
            .await
            .unwrap();
        std::fs::remove_file(lock.path()).unwrap();
        // Must not panic or report an error.
        lock.release();
    }

    #[tokio::test]
    async fn times_out_against_live_holder() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);

        let held = PoolLock::acquire(&pool, "first", Duration::from_secs(1), DEFAULT_STALE_AFTER)
            .await
            .unwrap();

        let result = PoolLock::acquire(
            &pool,
            "second",
            Duration::from_millis(450),
            DEFAULT_STALE_AFTER,
        )
        .await;
        match result {
            Err(Error::LockTimeout { waited, .. }) => {
                assert!(waited >= Duration::from_millis(450));
            }
            other => panic!("expected LockTimeout, got {other:?}"),
        }

        held.release();
    }

    #[tokio::test]
    async fn succeeds_after_holder_releases() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);

        let held = PoolLock::acquire(&pool, "first", Duration::from_secs(1), DEFAULT_STALE_AFTER)
            .await
            .unwrap();

        let pool_clone = pool.clone();
        let waiter = tokio::spawn(async move {
            PoolLock::acquire(
                &pool_clone,
                "second",
                Duration::from_secs(5),
                DEFAULT_STALE_AFTER,
            )
            .await
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        held.release();

        let lock = waiter.await.unwrap().unwrap();
        lock.release();
    }

    #[tokio::test]
    async fn reclaims_marker_from_dead_holder() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);
        let marker = lock_path(&pool);

        let sentinel = LockSentinel {
            pid: u32::MAX,
            hostname: hostname(),
            acquired_at_ms: now_ms(),
            holder: "crashed".into(),
        };
        std::fs::write(&marker, serde_json::to_string(&sentinel).unwrap()).unwrap();

        let lock = PoolLock::acquire(&pool, "next", Duration::from_secs(1), DEFAULT_STALE_AFTER)
            .await
            .unwrap();
        lock.release();
    }

    #[tokio::test]
    async fn reclaims_marker_aged_past_the_stale_bound() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);
        let marker = lock_path(&pool);

        let sentinel = LockSentinel {
            pid: std::process::id(),
            hostname: hostname(),
            acquired_at_ms: now_ms().saturating_sub(10_000),
            holder: "slow".into(),
        };
        std::fs::write(&marker, serde_json::to_string(&sentinel).unwrap()).unwrap();

        // The holder is alive, but the sentinel is past the bound.
        let lock = PoolLock::acquire(
            &pool,
            "next",
            Duration::from_secs(1),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        lock.release();
    }

    #[tokio::test]
    async fn never_evicts_a_live_recent_holder_from_another_host() {
        let dir = tempfile::tempdir().unwrap();
        let pool = pool_path(&dir);
        let marker = lock_path(&pool);

        let sentinel = LockSentinel {
            pid: u32::MAX,
            hostname: "some-other-host".into(),
            acquired_at_ms: now_ms(),
            holder: "remote".into(),
        };
        std::fs::write(&marker, serde_json::to_string(&sentinel).unwrap()).unwrap();

        let result = PoolLock::acquire(
            &pool,
            "local",
            Duration::from_millis(300),
            DEFAULT_STALE_AFTER,
        )
        .await;
        assert!(matches!(result, Err(Error::LockTimeout { .. })));
    }
}
