// Bounded worker pool with admission control and health-based replacement

use super::{WorkerHandle, WorkerSpec};
use crate::error::{MnemoError, Result};
use serde::Serialize;
use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Snapshot of pool bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub available: usize,
    pub in_use: usize,
    pub max_instances: usize,
    /// Admission permits not currently held
    pub free_permits: usize,
    pub total_created: u64,
    pub generation: u64,
}

#[derive(Default)]
struct Slots {
    available: VecDeque<Arc<WorkerHandle>>,
    in_use: usize,
}

struct PoolInner {
    max_instances: usize,
    gate: Arc<Semaphore>,
    slots: Mutex<Slots>,
    spec: RwLock<Arc<WorkerSpec>>,
    generation: AtomicU64,
    total_created: AtomicU64,
    disposed: AtomicBool,
}

impl PoolInner {
    fn slots(&self) -> MutexGuard<'_, Slots> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn current_spec(&self) -> Arc<WorkerSpec> {
        self.spec
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Take a handle back from a finished lease
    fn give_back(self: &Arc<Self>, handle: Arc<WorkerHandle>) {
        let current = self.generation.load(Ordering::Acquire);
        let mut slots = self.slots();
        slots.in_use = slots.in_use.saturating_sub(1);

        if self.is_disposed() || handle.generation() != current {
            drop(slots);
            handle.dispose();
            return;
        }

        if handle.is_healthy() {
            debug!(
                "Worker {} returned to pool (last used {})",
                handle.id(),
                handle.last_used().format("%H:%M:%S%.3f")
            );
            slots.available.push_back(handle);
            return;
        }

        drop(slots);
        warn!("Worker {} is unhealthy, replacing it", handle.id());
        handle.dispose();
        self.spawn_replacement();
    }

    /// Create one replacement in the background
    ///
    /// Until it succeeds the pool runs below capacity; acquire creates a
    /// handle on demand when nothing is available.
    fn spawn_replacement(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No async runtime available, pool stays below capacity");
            return;
        };

        let pool = Arc::clone(self);
        let spec = pool.current_spec();
        let generation = pool.generation.load(Ordering::Acquire);

        runtime.spawn(async move {
            match WorkerHandle::create(spec, generation).await {
                Ok(handle) => {
                    pool.total_created.fetch_add(1, Ordering::Relaxed);
                    pool.adopt(Arc::new(handle));
                }
                Err(e) => warn!("Replacement worker could not be created: {}", e),
            }
        });
    }

    fn adopt(&self, handle: Arc<WorkerHandle>) {
        let mut slots = self.slots();
        let fits = slots.available.len() + slots.in_use < self.max_instances;
        let current = handle.generation() == self.generation.load(Ordering::Acquire);

        if fits && current && !self.is_disposed() {
            info!("Replacement worker {} joined the pool", handle.id());
            slots.available.push_back(handle);
        } else {
            drop(slots);
            handle.dispose();
        }
    }
}

/// A worker checked out of the pool
///
/// Dropping the lease returns the handle and frees the admission slot.
pub struct WorkerLease {
    handle: Option<Arc<WorkerHandle>>,
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl WorkerLease {
    /// Return the handle to the pool
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for WorkerLease {
    type Target = WorkerHandle;

    fn deref(&self) -> &WorkerHandle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("lease handle is only taken on drop"),
        }
    }
}

impl Drop for WorkerLease {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.pool.give_back(handle);
        }
        // the slot is freed only after the handle is back
        drop(self.permit.take());
    }
}

impl std::fmt::Debug for WorkerLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerLease")
            .field("handle", &self.handle.as_ref().map(|h| h.id()))
            .finish()
    }
}

/// A caller that holds a slot but no handle yet
///
/// Dropping it before [`into_lease`](Self::into_lease) undoes the `in_use`
/// count and frees the permit, so a dropped acquire future cannot leak a slot.
struct Admission {
    permit: Option<OwnedSemaphorePermit>,
    pool: Arc<PoolInner>,
}

impl Admission {
    fn into_lease(mut self, handle: Arc<WorkerHandle>) -> WorkerLease {
        WorkerLease {
            handle: Some(handle),
            permit: self.permit.take(),
            pool: Arc::clone(&self.pool),
        }
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let Some(permit) = self.permit.take() {
            {
                let mut slots = self.pool.slots();
                slots.in_use = slots.in_use.saturating_sub(1);
            }
            drop(permit);
        }
    }
}

/// Bounded set of worker handles behind an admission gate
///
/// At rest `available + in_use <= max_instances`, and the gate's free
/// permits equal `max_instances - in_use`.
#[derive(Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

impl WorkerPool {
    /// Create `max_instances` handles in parallel
    ///
    /// Individual failures are logged and skipped; the pool fails only when no
    /// handle at all could be created.
    pub async fn initialize(max_instances: usize, spec: WorkerSpec) -> Result<Self> {
        if max_instances == 0 {
            return Err(MnemoError::InvalidConfigValue {
                path: "pool.max_instances".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let spec = Arc::new(spec);
        let (handles, first_error) = create_handles(spec.clone(), max_instances, 0).await;
        if handles.is_empty() {
            return Err(first_error.unwrap_or(MnemoError::NoHealthyWorkers));
        }

        info!(
            "Worker pool initialized with {}/{} workers ({:?})",
            handles.len(),
            max_instances,
            spec.model_path
        );

        let created = handles.len() as u64;
        Ok(Self {
            inner: Arc::new(PoolInner {
                max_instances,
                gate: Arc::new(Semaphore::new(max_instances)),
                slots: Mutex::new(Slots {
                    available: handles.into(),
                    in_use: 0,
                }),
                spec: RwLock::new(spec),
                generation: AtomicU64::new(0),
                total_created: AtomicU64::new(created),
                disposed: AtomicBool::new(false),
            }),
        })
    }

    /// Wait for a free slot and check out a healthy worker
    pub async fn acquire(&self) -> Result<WorkerLease> {
        self.acquire_until(std::future::pending::<()>()).await
    }

    /// Like [`acquire`](Self::acquire), giving up when `cancel` completes
    ///
    /// Cancellation only aborts the wait for a slot.
    pub async fn acquire_until<F>(&self, cancel: F) -> Result<WorkerLease>
    where
        F: Future<Output = ()>,
    {
        self.ensure_live()?;

        let permit = tokio::select! {
            permit = self.inner.gate.clone().acquire_owned() => {
                permit.map_err(|_| MnemoError::PoolDisposed)?
            }
            _ = cancel => {
                debug!("Worker acquire cancelled");
                return Err(MnemoError::Cancelled);
            }
        };
        self.ensure_live()?;

        let (popped, admission) = {
            let mut slots = self.inner.slots();
            let handle = slots.available.pop_front();
            slots.in_use += 1;
            let admission = Admission {
                permit: Some(permit),
                pool: Arc::clone(&self.inner),
            };
            (handle, admission)
        };

        match popped {
            Some(handle) if handle.is_healthy() => {
                debug!("Acquired worker {}", handle.id());
                Ok(admission.into_lease(handle))
            }
            Some(handle) => {
                warn!("Worker {} is unhealthy, recreating it", handle.id());
                handle.dispose();
                self.create_for_lease(admission).await
            }
            None => {
                debug!("No idle worker, creating one");
                self.create_for_lease(admission).await
            }
        }
    }

    /// Return a lease explicitly; equivalent to dropping it
    pub fn release(&self, lease: WorkerLease) {
        lease.release();
    }

    /// Replace every handle with ones bound to `spec`
    ///
    /// Waits for all leases to come back and blocks new acquires until the
    /// swap is done. If no handle can be created for the new spec, the old
    /// handles and spec stay in place.
    pub async fn reinitialize(&self, spec: WorkerSpec) -> Result<()> {
        self.ensure_live()?;

        let _all = self
            .inner
            .gate
            .clone()
            .acquire_many_owned(self.inner.max_instances as u32)
            .await
            .map_err(|_| MnemoError::PoolDisposed)?;

        let spec = Arc::new(spec);
        let next = self.inner.generation.load(Ordering::Acquire) + 1;
        let (handles, first_error) = create_handles(spec.clone(), self.inner.max_instances, next).await;
        if handles.is_empty() {
            warn!("Reinitialize created no workers, keeping the current model");
            return Err(first_error.unwrap_or(MnemoError::NoHealthyWorkers));
        }

        let count = handles.len();
        self.inner
            .total_created
            .fetch_add(count as u64, Ordering::Relaxed);

        let retired = {
            let mut slots = self.inner.slots();
            if self.inner.is_disposed() {
                drop(slots);
                warn!("Pool disposed during reinitialize, discarding new workers");
                for handle in &handles {
                    handle.dispose();
                }
                return Err(MnemoError::PoolDisposed);
            }
            *self
                .inner
                .spec
                .write()
                .unwrap_or_else(PoisonError::into_inner) = spec.clone();
            self.inner.generation.store(next, Ordering::Release);
            std::mem::replace(&mut slots.available, handles.into())
        };
        for handle in retired {
            handle.dispose();
        }

        info!(
            "Worker pool reinitialized with {}/{} workers ({:?}, generation {})",
            count, self.inner.max_instances, spec.model_path, next
        );
        Ok(())
    }

    /// Dispose every idle handle and refuse further acquires
    ///
    /// Outstanding leases stay valid; their handles are disposed on return.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.gate.close();

        let drained: Vec<_> = self.inner.slots().available.drain(..).collect();
        for handle in &drained {
            handle.dispose();
        }
        info!("Worker pool disposed ({} idle workers)", drained.len());
    }

    pub fn stats(&self) -> PoolStats {
        let slots = self.inner.slots();
        PoolStats {
            available: slots.available.len(),
            in_use: slots.in_use,
            max_instances: self.inner.max_instances,
            free_permits: self.inner.gate.available_permits(),
            total_created: self.inner.total_created.load(Ordering::Relaxed),
            generation: self.inner.generation.load(Ordering::Acquire),
        }
    }

    pub fn max_instances(&self) -> usize {
        self.inner.max_instances
    }

    pub fn spec(&self) -> Arc<WorkerSpec> {
        self.inner.current_spec()
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.is_disposed()
    }

    fn ensure_live(&self) -> Result<()> {
        if self.inner.is_disposed() {
            Err(MnemoError::PoolDisposed)
        } else {
            Ok(())
        }
    }

    /// One synchronous creation attempt on behalf of an admitted caller
    async fn create_for_lease(&self, admission: Admission) -> Result<WorkerLease> {
        let spec = self.inner.current_spec();
        let generation = self.inner.generation.load(Ordering::Acquire);

        match WorkerHandle::create(spec, generation).await {
            Ok(handle) => {
                self.inner.total_created.fetch_add(1, Ordering::Relaxed);
                debug!("Created worker {} on demand", handle.id());
                Ok(admission.into_lease(Arc::new(handle)))
            }
            Err(e) => {
                warn!("On-demand worker creation failed: {}", e);
                drop(admission);
                Err(MnemoError::NoHealthyWorkers)
            }
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("stats", &self.stats())
            .finish()
    }
}

async fn create_handles(
    spec: Arc<WorkerSpec>,
    count: usize,
    generation: u64,
) -> (Vec<Arc<WorkerHandle>>, Option<MnemoError>) {
    let mut tasks = JoinSet::new();
    for _ in 0..count {
        let spec = spec.clone();
        tasks.spawn(async move { WorkerHandle::create(spec, generation).await });
    }

    let mut handles = Vec::with_capacity(count);
    let mut first_error = None;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(handle)) => handles.push(Arc::new(handle)),
            Ok(Err(e)) => {
                warn!("Failed to create worker: {}", e);
                first_error.get_or_insert(e);
            }
            Err(e) => warn!("Worker creation task failed: {}", e),
        }
    }
    (handles, first_error)
}
