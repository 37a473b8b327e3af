//! 通用资源池
//!
//! 以信号量限制同时租出的资源数量，空闲资源放在队列中复用。
//! 租出的资源由 [`PooledResource`] 独占持有，释放（显式或 Drop）时先重置再归还，
//! 归还完成之前许可不会释放，因此 `active + idle <= size` 始终成立。

pub mod browser;
pub mod connection;

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use collector_core::{CollectorError, CollectorResult};
use metrics::gauge;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use browser::{BrowserSession, BrowserSessionManager};
pub use connection::{HttpConnection, HttpConnectionManager};

/// Creates, probes, resets and disposes of one kind of pooled resource
#[async_trait]
pub trait ResourceManager: Send + Sync + 'static {
    type Resource: Send + 'static;

    async fn create(&self) -> CollectorResult<Self::Resource>;

    /// Liveness probe run before an idle resource is handed out
    async fn is_healthy(&self, resource: &Self::Resource) -> bool;

    /// Clears transient state before the resource goes back to the idle queue
    async fn reset(&self, resource: &mut Self::Resource) -> CollectorResult<()>;

    async fn close(&self, resource: Self::Resource);

    fn kind(&self) -> &'static str;
}

/// Occupancy of a pool; `active + idle <= size` always holds
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub size: usize,
    pub active: usize,
    pub idle: usize,
    pub total_created: u64,
    pub discarded: u64,
}

struct PoolInner<M: ResourceManager> {
    name: String,
    size: usize,
    manager: M,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<M::Resource>>,
    active: AtomicUsize,
    total_created: AtomicU64,
    discarded: AtomicU64,
    closed: AtomicBool,
}

impl<M: ResourceManager> PoolInner<M> {
    fn pop_idle(&self) -> Option<M::Resource> {
        self.idle.lock().ok().and_then(|mut idle| idle.pop_front())
    }

    fn idle_len(&self) -> usize {
        self.idle.lock().map(|idle| idle.len()).unwrap_or(0)
    }

    fn publish_gauges(&self) {
        gauge!("collector_pool_active", "pool" => self.name.clone())
            .set(self.active.load(Ordering::Relaxed) as f64);
        gauge!("collector_pool_idle", "pool" => self.name.clone()).set(self.idle_len() as f64);
    }

    async fn discard(&self, resource: M::Resource) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        self.manager.close(resource).await;
    }

    /// Returns a leased resource; the permit is dropped by the caller afterwards
    async fn give_back(&self, mut resource: M::Resource) {
        self.active.fetch_sub(1, Ordering::AcqRel);

        if self.closed.load(Ordering::Acquire) {
            self.discard(resource).await;
            return;
        }

        if let Err(e) = self.manager.reset(&mut resource).await {
            warn!(pool = %self.name, error = %e, "Resource reset failed, discarding");
            self.discard(resource).await;
            self.publish_gauges();
            return;
        }

        let overflow = match self.idle.lock() {
            Ok(mut idle) if idle.len() < self.size => {
                idle.push_back(resource);
                None
            }
            Ok(_) => Some(resource),
            Err(_) => Some(resource),
        };
        if let Some(resource) = overflow {
            debug!(pool = %self.name, "Idle queue full, discarding resource");
            self.discard(resource).await;
        }
        self.publish_gauges();
    }
}

/// Bounded pool of reusable resources
pub struct ResourcePool<M: ResourceManager> {
    inner: Arc<PoolInner<M>>,
    acquire_timeout: Duration,
}

impl<M: ResourceManager> Clone for ResourcePool<M> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            acquire_timeout: self.acquire_timeout,
        }
    }
}

impl<M: ResourceManager> ResourcePool<M> {
    /// Empty pool; resources are created lazily up to `size`
    pub fn new(name: impl Into<String>, manager: M, size: usize, acquire_timeout: Duration) -> Self {
        let name = name.into();
        let size = size.max(1);
        info!(pool = %name, kind = manager.kind(), size, "Creating resource pool");
        Self {
            inner: Arc::new(PoolInner {
                name,
                size,
                manager,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(VecDeque::with_capacity(size)),
                active: AtomicUsize::new(0),
                total_created: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
            acquire_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn manager(&self) -> &M {
        &self.inner.manager
    }

    pub fn default_timeout(&self) -> Duration {
        self.acquire_timeout
    }

    /// Leases a resource, waiting up to `timeout` for a free slot
    pub async fn acquire(&self, timeout: Duration) -> CollectorResult<PooledResource<M>> {
        let permit = self.wait_permit(timeout).await?;
        self.lease(permit).await
    }

    /// Like [`acquire`](Self::acquire) but stops waiting for a slot as soon as
    /// `cancel` fires. Creation and health checks always run to completion so
    /// that a resource is either handed out or returned to the pool.
    pub async fn acquire_cancellable(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> CollectorResult<PooledResource<M>> {
        if cancel.is_cancelled() {
            return Err(CollectorError::Cancelled);
        }
        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CollectorError::Cancelled),
            permit = self.wait_permit(timeout) => permit?,
        };

        let leased = self.lease(permit).await?;
        if cancel.is_cancelled() {
            debug!(pool = %self.inner.name, "Cancelled while leasing, returning resource");
            leased.release().await;
            return Err(CollectorError::Cancelled);
        }
        Ok(leased)
    }

    async fn wait_permit(&self, timeout: Duration) -> CollectorResult<OwnedSemaphorePermit> {
        match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => Ok(permit),
            Ok(Err(_)) => Err(CollectorError::ResourceExhausted(format!(
                "pool '{}' is closed",
                self.inner.name
            ))),
            Err(_) => {
                warn!(pool = %self.inner.name, timeout_ms = timeout.as_millis() as u64, "Pool acquire timed out");
                Err(CollectorError::ResourceExhausted(format!(
                    "pool '{}' exhausted after {}ms",
                    self.inner.name,
                    timeout.as_millis()
                )))
            }
        }
    }

    async fn lease(&self, permit: OwnedSemaphorePermit) -> CollectorResult<PooledResource<M>> {
        let inner = &self.inner;

        while let Some(resource) = inner.pop_idle() {
            if inner.manager.is_healthy(&resource).await {
                return Ok(self.wrap(resource, permit));
            }
            warn!(pool = %inner.name, "Idle resource failed liveness probe, replacing");
            inner.discard(resource).await;
        }

        let resource = inner.manager.create().await?;
        inner.total_created.fetch_add(1, Ordering::Relaxed);
        debug!(pool = %inner.name, "Created new pooled resource");
        Ok(self.wrap(resource, permit))
    }

    fn wrap(&self, resource: M::Resource, permit: OwnedSemaphorePermit) -> PooledResource<M> {
        self.inner.active.fetch_add(1, Ordering::AcqRel);
        self.inner.publish_gauges();
        PooledResource {
            resource: Some(resource),
            permit: Some(permit),
            pool: self.inner.clone(),
        }
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.inner.name.clone(),
            size: self.inner.size,
            active: self.inner.active.load(Ordering::Acquire),
            idle: self.inner.idle_len(),
            total_created: self.inner.total_created.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Closes idle resources and refuses further leases; leased ones are closed on release
    pub async fn close_all(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.permits.close();

        let drained: Vec<_> = match self.inner.idle.lock() {
            Ok(mut idle) => idle.drain(..).collect(),
            Err(_) => Vec::new(),
        };
        let count = drained.len();
        for resource in drained {
            self.inner.manager.close(resource).await;
        }
        self.inner.publish_gauges();
        info!(pool = %self.inner.name, closed = count, "Resource pool closed");
    }
}

/// Exclusive lease on a pooled resource
pub struct PooledResource<M: ResourceManager> {
    resource: Option<M::Resource>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner<M>>,
}

impl<M: ResourceManager> PooledResource<M> {
    /// Resets and returns the resource before this call completes
    pub async fn release(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.give_back(resource).await;
        }
        self.permit.take();
    }

    /// Closes the resource instead of returning it, e.g. after a broken session
    pub async fn discard(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.active.fetch_sub(1, Ordering::AcqRel);
            self.pool.discard(resource).await;
            self.pool.publish_gauges();
        }
        self.permit.take();
    }
}

impl<M: ResourceManager> Deref for PooledResource<M> {
    type Target = M::Resource;

    fn deref(&self) -> &Self::Target {
        // present until release/discard consume the guard
        self.resource.as_ref().unwrap_or_else(|| unreachable!("pooled resource already released"))
    }
}

impl<M: ResourceManager> DerefMut for PooledResource<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().unwrap_or_else(|| unreachable!("pooled resource already released"))
    }
}

impl<M: ResourceManager> Drop for PooledResource<M> {
    fn drop(&mut self) {
        let Some(resource) = self.resource.take() else {
            return;
        };
        let permit = self.permit.take();
        let pool = self.pool.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    pool.give_back(resource).await;
                    drop(permit);
                });
            }
            Err(_) => {
                pool.active.fetch_sub(1, Ordering::AcqRel);
                pool.discarded.fetch_add(1, Ordering::Relaxed);
                drop(resource);
                drop(permit);
            }
        }
    }
}
