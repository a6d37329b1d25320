//! Reference-counted cache of agent connections
//!
//! Each agent gets a slot. Acquiring takes the slot's dial lock, so
//! concurrent acquisitions for one agent share a single dial while other
//! agents proceed in parallel. A connection is closed once it has had no
//! lease for `idle_timeout`, or dropped from its slot as soon as it closes on
//! its own.

use crate::connection::TunnelConnection;
use crate::dialer::TunnelDialer;
use crate::error::TunnelError;
use crate::pty::PtyDialer;
use async_trait::async_trait;
use std::collections::HashMap;
use std::ops::Deref;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tunnelgate_overlay::AgentId;

/// Produces connections for the cache
#[async_trait]
pub trait AgentDialer: Send + Sync + 'static {
    type Conn: CacheableConn;

    async fn dial(&self, agent: AgentId) -> Result<Self::Conn, TunnelError>;
}

/// Connection lifecycle hooks the cache relies on
#[async_trait]
pub trait CacheableConn: Send + Sync + 'static {
    fn is_closed(&self) -> bool;

    /// Resolves when the connection closes
    async fn closed(&self);

    async fn close(&self);
}

#[async_trait]
impl AgentDialer for TunnelDialer {
    type Conn = TunnelConnection;

    async fn dial(&self, agent: AgentId) -> Result<TunnelConnection, TunnelError> {
        TunnelDialer::dial(self, agent).await
    }
}

#[async_trait]
impl CacheableConn for TunnelConnection {
    fn is_closed(&self) -> bool {
        TunnelConnection::is_closed(self)
    }

    async fn closed(&self) {
        TunnelConnection::closed(self).await
    }

    async fn close(&self) {
        TunnelConnection::close(self).await
    }
}

/// A lease on a shared connection
///
/// Dropping the lease (or calling [`Lease::release`]) gives the reference
/// back. The connection stays open while any lease is outstanding.
pub struct Lease<C: ?Sized> {
    conn: Arc<C>,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl<C: ?Sized> Lease<C> {
    pub fn new(conn: Arc<C>, release: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            conn,
            release: Some(Box::new(release)),
        }
    }

    pub fn conn(&self) -> &Arc<C> {
        &self.conn
    }

    pub fn release(self) {}

    /// Change the view of the leased connection, keeping the same release
    pub fn map_conn<U: ?Sized>(mut self, f: impl FnOnce(Arc<C>) -> Arc<U>) -> Lease<U> {
        Lease {
            conn: f(self.conn.clone()),
            release: self.release.take(),
        }
    }
}

impl<C: ?Sized> Deref for Lease<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.conn
    }
}

impl<C: ?Sized> Drop for Lease<C> {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

/// Acquire interface consumed by the session bridge
#[async_trait]
pub trait AgentConnector: Send + Sync {
    async fn connect(&self, agent: AgentId) -> Result<Lease<dyn PtyDialer>, TunnelError>;
}

struct Slot<C> {
    conn: tokio::sync::Mutex<Option<Arc<C>>>,
}

struct SlotEntry<C> {
    slot: Arc<Slot<C>>,
    leases: usize,
    generation: u64,
}

struct CacheInner<D: AgentDialer> {
    dialer: D,
    idle_timeout: Duration,
    slots: Mutex<HashMap<AgentId, SlotEntry<D::Conn>>>,
    closing: CancellationToken,
    tasks: TaskTracker,
}

/// Connection cache keyed by agent
pub struct ConnectionCache<D: AgentDialer> {
    inner: Arc<CacheInner<D>>,
}

impl<D: AgentDialer> ConnectionCache<D> {
    pub fn new(dialer: D, idle_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                dialer,
                idle_timeout,
                slots: Mutex::new(HashMap::new()),
                closing: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        }
    }

    pub fn dialer(&self) -> &D {
        &self.inner.dialer
    }

    /// Number of agents with a slot
    pub fn len(&self) -> usize {
        self.inner.slots.lock().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Outstanding leases for an agent
    pub fn lease_count(&self, agent: AgentId) -> usize {
        self.inner
            .slots
            .lock()
            .ok()
            .and_then(|s| s.get(&agent).map(|e| e.leases))
            .unwrap_or(0)
    }

    /// Lease a connection to `agent`, dialing on a miss
    pub async fn acquire(&self, agent: AgentId) -> Result<Lease<D::Conn>, TunnelError> {
        let slot = self.inner.retain(agent)?;
        // Gives the reference back if dialing fails or this future is dropped
        let guard = ReleaseGuard {
            cache: Some(self.inner.clone()),
            agent,
            slot: slot.clone(),
        };

        let mut current = slot.conn.lock().await;
        let cached = current.as_ref().filter(|c| !c.is_closed()).cloned();
        let conn = match cached {
            Some(conn) => conn,
            None => {
                if self.inner.closing.is_cancelled() {
                    return Err(TunnelError::CacheClosed);
                }
                tracing::debug!(agent_id = %agent, "Connection cache miss, dialing");
                let conn = Arc::new(self.inner.dialer.dial(agent).await?);
                *current = Some(conn.clone());
                self.inner.watch(agent, slot.clone(), conn.clone());
                conn
            }
        };
        drop(current);

        Ok(Lease::new(conn, move || guard.fire()))
    }

    /// Close every cached connection and refuse further acquisitions
    pub async fn close(&self) {
        self.inner.closing.cancel();
        let slots: Vec<Arc<Slot<D::Conn>>> = match self.inner.slots.lock() {
            Ok(mut slots) => slots.drain().map(|(_, e)| e.slot).collect(),
            Err(_) => Vec::new(),
        };
        for slot in slots {
            let conn = slot.conn.lock().await.take();
            if let Some(conn) = conn {
                conn.close().await;
            }
        }
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
    }
}

impl<D: AgentDialer> CacheInner<D> {
    fn retain(&self, agent: AgentId) -> Result<Arc<Slot<D::Conn>>, TunnelError> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| TunnelError::CacheClosed)?;
        if self.closing.is_cancelled() {
            return Err(TunnelError::CacheClosed);
        }
        let entry = slots.entry(agent).or_insert_with(|| SlotEntry {
            slot: Arc::new(Slot {
                conn: tokio::sync::Mutex::new(None),
            }),
            leases: 0,
            generation: 0,
        });
        entry.leases += 1;
        entry.generation += 1;
        Ok(entry.slot.clone())
    }

    fn release(self: &Arc<Self>, agent: AgentId, slot: &Arc<Slot<D::Conn>>) {
        let Ok(mut slots) = self.slots.lock() else {
            return;
        };
        let Some(entry) = slots.get_mut(&agent) else {
            return;
        };
        if !Arc::ptr_eq(&entry.slot, slot) {
            return;
        }
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases > 0 {
            return;
        }
        entry.generation += 1;
        let generation = entry.generation;
        drop(slots);

        if self.closing.is_cancelled() {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let cache = self.clone();
        let slot = slot.clone();
        self.tasks.spawn_on(
            async move {
                tokio::select! {
                    _ = tokio::time::sleep(cache.idle_timeout) => {}
                    _ = cache.closing.cancelled() => return,
                }
                cache.evict_idle(agent, slot, generation).await;
            },
            &handle,
        );
    }

    async fn evict_idle(&self, agent: AgentId, slot: Arc<Slot<D::Conn>>, generation: u64) {
        {
            let Ok(mut slots) = self.slots.lock() else {
                return;
            };
            let idle = slots.get(&agent).is_some_and(|entry| {
                Arc::ptr_eq(&entry.slot, &slot)
                    && entry.leases == 0
                    && entry.generation == generation
            });
            if !idle {
                return;
            }
            slots.remove(&agent);
        }

        let conn = slot.conn.lock().await.take();
        if let Some(conn) = conn {
            tracing::debug!(agent_id = %agent, "Evicting idle connection");
            conn.close().await;
        }
    }

    /// Drop `conn` from its slot once it closes on its own
    fn watch(self: &Arc<Self>, agent: AgentId, slot: Arc<Slot<D::Conn>>, conn: Arc<D::Conn>) {
        let closing = self.closing.clone();
        self.tasks.spawn(async move {
            tokio::select! {
                _ = conn.closed() => {}
                _ = closing.cancelled() => return,
            }
            let removed = {
                let mut current = slot.conn.lock().await;
                let ours = current.as_ref().is_some_and(|c| Arc::ptr_eq(c, &conn));
                if ours {
                    *current = None;
                }
                ours
            };
            // Evicted connections were already closed by `evict_idle`
            if removed {
                tracing::debug!(agent_id = %agent, "Cached connection closed, dropping");
                conn.close().await;
            }
        });
    }
}

struct ReleaseGuard<D: AgentDialer> {
    cache: Option<Arc<CacheInner<D>>>,
    agent: AgentId,
    slot: Arc<Slot<D::Conn>>,
}

impl<D: AgentDialer> ReleaseGuard<D> {
    fn fire(mut self) {
        if let Some(cache) = self.cache.take() {
            cache.release(self.agent, &self.slot);
        }
    }
}

impl<D: AgentDialer> Drop for ReleaseGuard<D> {
    fn drop(&mut self) {
        if let Some(cache) = self.cache.take() {
            cache.release(self.agent, &self.slot);
        }
    }
}

#[async_trait]
impl<D> AgentConnector for ConnectionCache<D>
where
    D: AgentDialer,
    D::Conn: PtyDialer,
{
    async fn connect(&self, agent: AgentId) -> Result<Lease<dyn PtyDialer>, TunnelError> {
        let lease = self.acquire(agent).await?;
        Ok(lease.map_conn(|conn| conn as Arc<dyn PtyDialer>))
    }
}

impl<D: AgentDialer> Clone for ConnectionCache<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tunnelgate_overlay::BoxedStream;
    use uuid::Uuid;

    struct FakeConn {
        id: usize,
        closed: CancellationToken,
        close_calls: AtomicUsize,
    }

    #[async_trait]
    impl CacheableConn for FakeConn {
        fn is_closed(&self) -> bool {
            self.closed.is_cancelled()
        }

        async fn closed(&self) {
            self.closed.cancelled().await
        }

        async fn close(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
            self.closed.cancel();
        }
    }

    #[async_trait]
    impl PtyDialer for FakeConn {
        async fn reconnecting_pty(&self, _init: &crate::PtyInit) -> Result<BoxedStream, TunnelError> {
            let (near, _far) = tokio::io::duplex(8);
            Ok(Box::new(near))
        }
    }

    #[derive(Default)]
    struct CountingDialer {
        dials: Arc<AtomicUsize>,
        fail_first: bool,
    }

    #[async_trait]
    impl AgentDialer for CountingDialer {
        type Conn = FakeConn;

        async fn dial(&self, _agent: AgentId) -> Result<FakeConn, TunnelError> {
            let n = self.dials.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            if self.fail_first && n == 0 {
                return Err(TunnelError::Closed);
            }
            Ok(FakeConn {
                id: n,
                closed: CancellationToken::new(),
                close_calls: AtomicUsize::new(0),
            })
        }
    }

    fn agent() -> AgentId {
        AgentId::new(Uuid::new_v4())
    }

    #[tokio::test]
    async fn test_concurrent_acquire_dials_once() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(60));
        let agent = agent();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.acquire(agent).await }));
        }

        let mut leases = Vec::new();
        for handle in handles {
            leases.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(cache.dialer().dials.load(Ordering::SeqCst), 1);
        let first = leases[0].conn().clone();
        assert!(leases.iter().all(|l| Arc::ptr_eq(l.conn(), &first)));
        assert_eq!(cache.lease_count(agent), 8);

        drop(leases);
        assert_eq!(cache.lease_count(agent), 0);
        assert_eq!(first.close_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_distinct_agents_dial_separately() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(60));
        let a = cache.acquire(agent()).await.unwrap();
        let b = cache.acquire(agent()).await.unwrap();
        assert!(!Arc::ptr_eq(a.conn(), b.conn()));
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_connection_evicted() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(5));
        let agent = agent();

        let lease = cache.acquire(agent).await.unwrap();
        let conn = lease.conn().clone();
        lease.release();

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(conn.is_closed());
        assert_eq!(conn.close_calls.load(Ordering::SeqCst), 1);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reacquire_before_idle_timeout_keeps_connection() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(5));
        let agent = agent();

        let first = cache.acquire(agent).await.unwrap();
        let conn = first.conn().clone();
        drop(first);

        tokio::time::sleep(Duration::from_secs(3)).await;
        let second = cache.acquire(agent).await.unwrap();
        tokio::time::sleep(Duration::from_secs(10)).await;

        assert!(Arc::ptr_eq(second.conn(), &conn));
        assert!(!conn.is_closed());
        assert_eq!(cache.dialer().dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_connection_is_redialed() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(60));
        let agent = agent();

        let lease = cache.acquire(agent).await.unwrap();
        lease.close().await;
        drop(lease);

        let lease = cache.acquire(agent).await.unwrap();
        assert_eq!(lease.id, 1);
        assert_eq!(cache.dialer().dials.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_dial_releases_lease() {
        let dialer = CountingDialer {
            fail_first: true,
            ..Default::default()
        };
        let cache = ConnectionCache::new(dialer, Duration::from_secs(60));
        let agent = agent();

        assert!(cache.acquire(agent).await.is_err());
        assert_eq!(cache.lease_count(agent), 0);

        let lease = cache.acquire(agent).await.unwrap();
        assert_eq!(lease.id, 1);
    }

    #[tokio::test]
    async fn test_close_closes_cached_connections() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(60));
        let agent = agent();
        let lease = cache.acquire(agent).await.unwrap();
        let conn = lease.conn().clone();

        cache.close().await;
        assert!(conn.is_closed());
        assert!(matches!(
            cache.acquire(agent).await,
            Err(TunnelError::CacheClosed)
        ));
        drop(lease);
    }

    #[tokio::test]
    async fn test_connect_returns_pty_dialer_lease() {
        let cache = ConnectionCache::new(CountingDialer::default(), Duration::from_secs(60));
        let agent = agent();
        let lease = cache.connect(agent).await.unwrap();
        assert_eq!(cache.lease_count(agent), 1);

        let init = crate::PtyInit {
            id: Uuid::new_v4(),
            height: 80,
            width: 80,
            command: String::new(),
        };
        assert!(lease.reconnecting_pty(&init).await.is_ok());
        drop(lease);
        assert_eq!(cache.lease_count(agent), 0);
    }
}
