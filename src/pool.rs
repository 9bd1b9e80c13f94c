//! Bounded pool of reusable engine instances.
//!
//! Engines take seconds to start, so released instances are kept for reuse
//! up to `capacity`. Reuse is LIFO: the most recently released instance is
//! handed out first. Every instance is at any moment either idle, leased to
//! exactly one request, or destroyed.
//!
//! The bookkeeping lives behind a `std::sync::Mutex` that is never held
//! across an `.await`; launching, pinging and closing engines happen outside
//! the lock.

use futures::future::{join_all, BoxFuture};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use crate::events::{EventSink, RenderEvent};
use crate::{Engine, EngineConfig, EngineInstance, Error, Result};

/// Starts a new engine instance with the given id
pub type Launcher = Arc<dyn Fn(u64, EngineConfig) -> BoxFuture<'static, Result<EngineInstance>> + Send + Sync>;

fn launch_engine<E: Engine + 'static>(id: u64, config: EngineConfig) -> BoxFuture<'static, Result<EngineInstance>> {
    Box::pin(EngineInstance::launch::<E>(id, config))
}

/// Pool tuning
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of idle instances kept around
    pub capacity: usize,
    /// Ping idle instances before handing them out again
    pub verify_on_acquire: bool,
    pub ping_timeout: Duration,
    /// Upper bound on a graceful engine shutdown before it is abandoned
    pub close_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 3,
            verify_on_acquire: true,
            ping_timeout: Duration::from_secs(2),
            close_timeout: Duration::from_secs(5),
        }
    }
}

/// Point-in-time pool counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub idle: usize,
    pub leased: usize,
    pub created: usize,
    pub destroyed: usize,
    pub capacity: usize,
}

#[derive(Default)]
struct PoolState {
    idle: Vec<EngineInstance>,
    leased: HashMap<u64, EngineInstance>,
    draining: bool,
}

enum Verdict {
    Idle(usize),
    Destroy(&'static str),
    /// Already destroyed by a drain
    Untracked,
}

struct PoolInner {
    state: Mutex<PoolState>,
    config: PoolConfig,
    engine_config: EngineConfig,
    launcher: Launcher,
    events: Arc<dyn EventSink>,
    next_id: AtomicU64,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl PoolInner {
    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        // Bookkeeping stays consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn is_alive(&self, instance: &EngineInstance) -> bool {
        matches!(
            tokio::time::timeout(self.config.ping_timeout, instance.ping()).await,
            Ok(Ok(()))
        )
    }

    /// Close an instance, best effort. Failures are reported, never returned.
    ///
    /// The instance counts as destroyed before the close is awaited, so a
    /// cancelled caller still leaves the counters balanced. Dropping the
    /// handle stops the worker in that case.
    async fn destroy(&self, instance: EngineInstance, reason: &str) {
        let engine = instance.id();
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        self.events.record(&RenderEvent::EngineDestroyed {
            engine,
            reason: reason.to_string(),
        });
        match tokio::time::timeout(self.config.close_timeout, instance.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.events.record(&RenderEvent::CleanupFailed {
                engine,
                error: e.to_string(),
            }),
            Err(_) => self.events.record(&RenderEvent::CleanupFailed {
                engine,
                error: Error::timeout(self.config.close_timeout).to_string(),
            }),
        }
    }

    /// Synchronous path for leases dropped without `release`. Dropping the
    /// last handle stops the worker, which drops the engine.
    fn forget(&self, instance: EngineInstance) {
        let tracked = self.lock_state().leased.remove(&instance.id()).is_some();
        if tracked {
            self.destroyed.fetch_add(1, Ordering::SeqCst);
            self.events.record(&RenderEvent::EngineDestroyed {
                engine: instance.id(),
                reason: "lease dropped without release".to_string(),
            });
        }
    }
}

/// Exclusive use of one engine instance.
///
/// Hand it back with [`EnginePool::release`]. A lease that is dropped instead
/// (for example because the request future was cancelled) is destroyed.
pub struct Lease {
    instance: EngineInstance,
    healthy: bool,
    released: bool,
    pool: Arc<PoolInner>,
}

impl Lease {
    fn new(instance: EngineInstance, pool: Arc<PoolInner>) -> Self {
        Self {
            instance,
            healthy: true,
            released: false,
            pool,
        }
    }

    pub fn instance(&self) -> &EngineInstance {
        &self.instance
    }

    pub fn id(&self) -> u64 {
        self.instance.id()
    }

    /// The engine's state can no longer be trusted; destroy it on release
    pub fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if !self.released {
            self.pool.forget(self.instance.clone());
        }
    }
}

/// Shared handle to the pool. Cloning is cheap.
#[derive(Clone)]
pub struct EnginePool {
    inner: Arc<PoolInner>,
}

impl EnginePool {
    /// Pool that launches engines of type `E`
    pub fn new<E: Engine + 'static>(
        config: PoolConfig,
        engine_config: EngineConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let launcher: Launcher = Arc::new(launch_engine::<E>);
        Self::with_launcher(config, engine_config, events, launcher)
    }

    /// Pool with a custom launch strategy
    pub fn with_launcher(
        config: PoolConfig,
        engine_config: EngineConfig,
        events: Arc<dyn EventSink>,
        launcher: Launcher,
    ) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                state: Mutex::new(PoolState::default()),
                config,
                engine_config,
                launcher,
                events,
                next_id: AtomicU64::new(1),
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }),
        }
    }

    /// Check out an engine: the most recently released idle instance if there
    /// is a live one, otherwise a freshly launched instance.
    pub async fn acquire(&self) -> Result<Lease> {
        let inner = &self.inner;

        loop {
            let candidate = {
                let mut state = inner.lock_state();
                if state.draining {
                    return Err(Error::ShuttingDown);
                }
                let candidate = state.idle.pop();
                if let Some(instance) = &candidate {
                    state.leased.insert(instance.id(), instance.clone());
                }
                candidate
            };

            let Some(instance) = candidate else { break };
            // Leased from here on; a cancelled ping drops the lease
            let mut lease = Lease::new(instance, inner.clone());

            if !inner.config.verify_on_acquire || inner.is_alive(lease.instance()).await {
                inner.events.record(&RenderEvent::EngineReused { engine: lease.id() });
                return Ok(lease);
            }

            lease.released = true;
            let instance = lease.instance.clone();
            drop(lease);
            let tracked = inner.lock_state().leased.remove(&instance.id()).is_some();
            if tracked {
                inner.destroy(instance, "failed health check").await;
            }
        }

        let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
        let instance = match (inner.launcher)(id, inner.engine_config.clone()).await {
            Ok(instance) => instance,
            Err(e) => {
                inner.events.record(&RenderEvent::EngineLaunchFailed { error: e.to_string() });
                return Err(match e {
                    Error::InitializationError(_) => e,
                    other => Error::InitializationError(other.to_string()),
                });
            }
        };
        inner.created.fetch_add(1, Ordering::SeqCst);
        inner.events.record(&RenderEvent::EngineLaunched { engine: id });

        let draining = {
            let mut state = inner.lock_state();
            if !state.draining {
                state.leased.insert(id, instance.clone());
            }
            state.draining
        };
        if draining {
            inner.destroy(instance, "pool drained during launch").await;
            return Err(Error::ShuttingDown);
        }

        Ok(Lease::new(instance, inner.clone()))
    }

    /// Return a lease. Healthy instances go back to idle while there is room;
    /// everything else is destroyed, best effort.
    pub async fn release(&self, mut lease: Lease) {
        lease.released = true;
        let instance = lease.instance.clone();
        let healthy = lease.healthy;
        drop(lease);

        let verdict = {
            let mut state = self.inner.lock_state();
            if state.leased.remove(&instance.id()).is_none() {
                Verdict::Untracked
            } else if !healthy {
                Verdict::Destroy("unhealthy")
            } else if state.draining {
                Verdict::Destroy("pool drained")
            } else if state.idle.len() < self.inner.config.capacity {
                state.idle.push(instance.clone());
                Verdict::Idle(state.idle.len())
            } else {
                Verdict::Destroy("pool at capacity")
            }
        };

        match verdict {
            Verdict::Idle(idle) => self.inner.events.record(&RenderEvent::EngineReturned {
                engine: instance.id(),
                idle,
            }),
            Verdict::Destroy(reason) => self.inner.destroy(instance, reason).await,
            Verdict::Untracked => {}
        }
    }

    /// Destroy every idle and leased instance and refuse further acquisitions.
    /// Safe to call more than once.
    pub async fn drain(&self) {
        let victims: Vec<EngineInstance> = {
            let mut state = self.inner.lock_state();
            state.draining = true;
            let mut victims: Vec<EngineInstance> = state.idle.drain(..).collect();
            victims.extend(state.leased.drain().map(|(_, instance)| instance));
            victims
        };

        let destroyed = victims.len();
        join_all(
            victims
                .into_iter()
                .map(|instance| self.inner.destroy(instance, "pool drained")),
        )
        .await;
        self.inner.events.record(&RenderEvent::PoolDrained { destroyed });
    }

    pub fn stats(&self) -> PoolStats {
        let state = self.inner.lock_state();
        PoolStats {
            idle: state.idle.len(),
            leased: state.leased.len(),
            created: self.inner.created.load(Ordering::SeqCst),
            destroyed: self.inner.destroyed.load(Ordering::SeqCst),
            capacity: self.inner.config.capacity,
        }
    }

    /// Ids of idle instances, next-to-be-reused last
    pub fn idle_ids(&self) -> Vec<u64> {
        self.inner.lock_state().idle.iter().map(EngineInstance::id).collect()
    }

    pub fn is_draining(&self) -> bool {
        self.inner.lock_state().draining
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failing_launcher(message: &'static str) -> Launcher {
        Arc::new(move |_: u64, _: EngineConfig| -> BoxFuture<'static, Result<EngineInstance>> {
            Box::pin(async move { Err(Error::Other(message.to_string())) })
        })
    }

    #[test]
    fn default_capacity_is_three() {
        let config = PoolConfig::default();
        assert_eq!(config.capacity, 3);
        assert!(config.verify_on_acquire);
    }

    #[test]
    fn new_pool_is_empty() {
        let pool = EnginePool::with_launcher(
            PoolConfig::default(),
            EngineConfig::default(),
            Arc::new(crate::events::NoopSink),
            failing_launcher("unused"),
        );
        assert_eq!(
            pool.stats(),
            PoolStats {
                idle: 0,
                leased: 0,
                created: 0,
                destroyed: 0,
                capacity: 3
            }
        );
        assert!(!pool.is_draining());
    }

    #[tokio::test]
    async fn launch_errors_become_initialization_errors() {
        let pool = EnginePool::with_launcher(
            PoolConfig::default(),
            EngineConfig::default(),
            Arc::new(crate::events::NoopSink),
            failing_launcher("chrome missing"),
        );
        let err = pool.acquire().await.err().unwrap();
        assert!(matches!(err, Error::InitializationError(msg) if msg == "chrome missing"));
        assert_eq!(pool.stats().created, 0);
    }
}
