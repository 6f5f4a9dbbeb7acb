//! Firebird session pool.
//!
//! Idle sessions are cached per [`FbConfig::pool_key`]. A checked-out
//! session is owned by its [`PooledSession`] and returns to the idle set
//! when dropped; a background task evicts idle sessions past their lifetime.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

use super::config::{FbConfig, FbPoolConfig};
use super::database::FbDatabase;
use super::error::{FbError, FbResult};

// ============================================================================
// Keyed idle set
// ============================================================================

#[derive(Debug)]
struct IdleEntry<S> {
    id: u64,
    session: S,
    /// When the session entered the idle set
    since: Instant,
}

/// Idle and checked-out bookkeeping for one key.
#[derive(Debug)]
struct KeyedPool<S> {
    /// Oldest first; checkout pops the newest
    idle: Vec<IdleEntry<S>>,
    busy: HashSet<u64>,
}

impl<S> Default for KeyedPool<S> {
    fn default() -> Self {
        Self {
            idle: Vec::new(),
            busy: HashSet::new(),
        }
    }
}

impl<S> KeyedPool<S> {
    fn ensure_capacity(&self, max: Option<usize>) -> FbResult<()> {
        match max {
            Some(max) if self.busy.len() + 1 > max => Err(FbError::PoolExhausted { max }),
            _ => Ok(()),
        }
    }

    /// Pop the newest idle session passing `is_open`; closed ones are
    /// moved to `stale`.
    fn checkout(&mut self, is_open: impl Fn(&S) -> bool, stale: &mut Vec<S>) -> Option<(u64, S)> {
        while let Some(entry) = self.idle.pop() {
            if is_open(&entry.session) {
                self.busy.insert(entry.id);
                return Some((entry.id, entry.session));
            }
            stale.push(entry.session);
        }
        None
    }

    /// Return a session; rejected unless `id` is checked out.
    fn checkin(&mut self, id: u64, session: S, now: Instant) -> Result<(), S> {
        if self.busy.remove(&id) {
            self.idle.push(IdleEntry {
                id,
                session,
                since: now,
            });
            Ok(())
        } else {
            Err(session)
        }
    }

    /// Remove idle entries older than `lifetime`, keeping the `min` newest.
    fn sweep(&mut self, now: Instant, lifetime: Duration, min: usize) -> Vec<S> {
        if lifetime.is_zero() {
            return Vec::new();
        }
        let candidates = self.idle.len().saturating_sub(min);
        let mut evicted = Vec::new();
        let mut kept = Vec::with_capacity(self.idle.len());
        for (i, entry) in self.idle.drain(..).enumerate() {
            if i < candidates && now.saturating_duration_since(entry.since) > lifetime {
                evicted.push(entry.session);
            } else {
                kept.push(entry);
            }
        }
        self.idle = kept;
        evicted
    }

    fn drain(&mut self) -> Vec<S> {
        self.idle.drain(..).map(|e| e.session).collect()
    }
}

// ============================================================================
// Pooled Session
// ============================================================================

/// A session checked out from the pool.
///
/// When dropped, the session is returned to the pool.
pub struct PooledSession {
    db: FbDatabase,
    pool: Arc<FbPoolInner>,
    key: String,
    id: u64,
    released: bool,
}

impl PooledSession {
    pub fn database(&self) -> &FbDatabase {
        &self.db
    }

    /// Detach instead of returning to the pool.
    pub async fn discard(mut self) -> FbResult<()> {
        self.pool.forget(&self.key, self.id);
        self.released = true;
        self.db.detach().await
    }
}

impl Deref for PooledSession {
    type Target = FbDatabase;

    fn deref(&self) -> &FbDatabase {
        &self.db
    }
}

impl Drop for PooledSession {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            self.pool.release(&self.key, self.id, self.db.clone());
        }
    }
}

impl std::fmt::Debug for PooledSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledSession")
            .field("id", &self.id)
            .field("db", &self.db)
            .finish()
    }
}

// ============================================================================
// Pool Inner
// ============================================================================

struct FbPoolInner {
    config: FbPoolConfig,
    pools: Mutex<HashMap<String, KeyedPool<FbDatabase>>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl FbPoolInner {
    fn release(&self, key: &str, id: u64, db: FbDatabase) {
        let reusable = !self.closed.load(Ordering::Acquire)
            && db.is_attached()
            && db.transaction_count() == 0;
        let rejected = {
            let mut pools = self.pools.lock();
            match pools.get_mut(key) {
                Some(pool) if reusable => pool.checkin(id, db, Instant::now()).err(),
                Some(pool) => {
                    pool.busy.remove(&id);
                    Some(db)
                }
                None => Some(db),
            }
        };
        match rejected {
            None => debug!(id, "session returned to pool"),
            Some(db) => {
                debug!(id, "session discarded");
                detach_in_background(vec![db]);
            }
        }
    }

    fn forget(&self, key: &str, id: u64) {
        if let Some(pool) = self.pools.lock().get_mut(key) {
            pool.busy.remove(&id);
        }
    }

    fn sweep(&self) -> Vec<FbDatabase> {
        let now = Instant::now();
        let mut pools = self.pools.lock();
        let mut evicted = Vec::new();
        for pool in pools.values_mut() {
            evicted.extend(pool.sweep(now, self.config.lifetime, self.config.min_size));
        }
        evicted
    }
}

/// A busy slot held while a new session attaches; released unless kept.
struct Reservation<'a> {
    inner: &'a FbPoolInner,
    key: &'a str,
    id: u64,
}

impl Reservation<'_> {
    fn keep(self) -> u64 {
        let id = self.id;
        std::mem::forget(self);
        id
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        debug!(id = self.id, "session reservation released");
        self.inner.forget(self.key, self.id);
    }
}

/// Detach `sessions` without waiting, when a runtime is available.
fn detach_in_background(sessions: Vec<FbDatabase>) {
    if sessions.is_empty() {
        return;
    }
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(detach_all(sessions));
    }
}

async fn detach_all(sessions: Vec<FbDatabase>) {
    for db in sessions {
        if let Err(e) = db.detach().await {
            debug!(error = %e, "detach of pooled session failed");
        }
    }
}

// ============================================================================
// Pool
// ============================================================================

/// A pool of database sessions, keyed by connection settings.
///
/// Must be created inside a tokio runtime; the sweep task runs until
/// [`FbPool::close`] or until the last handle is dropped.
#[derive(Clone)]
pub struct FbPool {
    inner: Arc<FbPoolInner>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl FbPool {
    pub fn new(config: FbPoolConfig) -> Self {
        let interval = config.cleanup_interval;
        let inner = Arc::new(FbPoolInner {
            config,
            pools: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        });
        let sweeper = if interval.is_zero() {
            None
        } else {
            Some(tokio::spawn(sweep_loop(Arc::downgrade(&inner), interval)))
        };
        Self {
            inner,
            sweeper: Arc::new(Mutex::new(sweeper)),
        }
    }

    /// Check out a session for `config`, attaching a new one when no idle
    /// session is available.
    pub async fn get(&self, config: &FbConfig) -> FbResult<PooledSession> {
        self.get_with(config, || FbDatabase::attach(config)).await
    }

    /// [`FbPool::get`] with `open` creating new sessions.
    async fn get_with<F, Fut>(&self, config: &FbConfig, open: F) -> FbResult<PooledSession>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FbResult<FbDatabase>>,
    {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(FbError::PoolClosed);
        }
        let key = config.pool_key();
        let max = self.inner.config.max_size;

        let mut stale = Vec::new();
        let reserved = {
            let mut pools = self.inner.pools.lock();
            let pool = pools.entry(key.clone()).or_default();
            pool.ensure_capacity(max)?;
            match pool.checkout(FbDatabase::is_attached, &mut stale) {
                Some((id, db)) => Ok((id, db)),
                None => {
                    let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
                    pool.busy.insert(id);
                    Err(id)
                }
            }
        };
        detach_in_background(stale);

        let (id, db) = match reserved {
            Ok((id, db)) => {
                debug!(id, "pooled session reused");
                (id, db)
            }
            Err(id) => {
                // Dropped with the future if the caller gives up mid-attach.
                let reservation = Reservation {
                    inner: &self.inner,
                    key: &key,
                    id,
                };
                let db = open().await?;
                debug!(id, "pooled session created");
                (reservation.keep(), db)
            }
        };
        Ok(PooledSession {
            db,
            pool: self.inner.clone(),
            key,
            id,
            released: false,
        })
    }

    /// Evict idle sessions past their lifetime now; returns how many.
    pub async fn sweep(&self) -> usize {
        let evicted = self.inner.sweep();
        let count = evicted.len();
        if count > 0 {
            debug!(count, "idle sessions evicted");
        }
        detach_all(evicted).await;
        count
    }

    /// Detach the idle sessions of `config`.
    pub async fn clear(&self, config: &FbConfig) {
        let idle = self
            .inner
            .pools
            .lock()
            .get_mut(&config.pool_key())
            .map(KeyedPool::drain)
            .unwrap_or_default();
        detach_all(idle).await;
    }

    /// Detach every idle session.
    pub async fn clear_all(&self) {
        let idle: Vec<FbDatabase> = self
            .inner
            .pools
            .lock()
            .values_mut()
            .flat_map(KeyedPool::drain)
            .collect();
        detach_all(idle).await;
    }

    /// Stop the sweep task and detach idle sessions. Sessions still checked
    /// out are detached when dropped.
    pub async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        if let Some(task) = self.sweeper.lock().take() {
            task.abort();
        }
        self.clear_all().await;
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    pub fn idle_count(&self, config: &FbConfig) -> usize {
        self.inner
            .pools
            .lock()
            .get(&config.pool_key())
            .map_or(0, |p| p.idle.len())
    }

    pub fn busy_count(&self, config: &FbConfig) -> usize {
        self.inner
            .pools
            .lock()
            .get(&config.pool_key())
            .map_or(0, |p| p.busy.len())
    }

    pub fn config(&self) -> &FbPoolConfig {
        &self.inner.config
    }
}

async fn sweep_loop(pool: Weak<FbPoolInner>, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let evicted = inner.sweep();
        drop(inner);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "idle sessions evicted");
            detach_all(evicted).await;
        }
    }
}
