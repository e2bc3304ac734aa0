//! Resource pool — bounded, asynchronous, factory-driven.
//!
//! `Pool<F>` calls `F::create`, `F::validate` and `F::destroy` directly.
//! All bookkeeping lives behind one mutex and every state transition runs
//! to completion while holding it; the lock is released only across
//! factory calls and timers, which run on spawned tasks.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use crate::aggregate::AggregateError;
use crate::config::PoolConfig;
use crate::deferred::Deferred;
use crate::error::{BoxError, Error, Result};
use crate::factory::Factory;
use crate::guard::{Home, Pooled, ResourceId};
use crate::log::{LogLevel, PoolLog, pool_log};

// ---------------------------------------------------------------------------
// Pool internals
// ---------------------------------------------------------------------------

/// An available resource waiting to be handed out.
struct Idle<R> {
    id: ResourceId,
    resource: R,
    use_count: usize,
    /// `None` when the idle timeout is too large to represent.
    expires_at: Option<Instant>,
}

type Waiter<R> = Deferred<Pooled<R>>;

/// Lifetime counters, surfaced through [`PoolStats`].
#[derive(Debug, Clone, Copy, Default)]
struct Counters {
    created: u64,
    destroyed: u64,
    create_failures: u64,
    acquired: u64,
    timed_out: u64,
}

/// Everything guarded by the pool mutex.
///
/// `total == available.len() + in_use.len() + creating` holds whenever the
/// lock is released.
struct State<R> {
    total: usize,
    creating: usize,
    /// LIFO: the most recently returned resource is served first.
    available: Vec<Idle<R>>,
    /// Use count of every checked-out resource.
    in_use: HashMap<ResourceId, usize>,
    /// FIFO: the oldest waiter is served first.
    pending: VecDeque<Waiter<R>>,
    draining: bool,
    /// Set while an idle reaping pass is scheduled.
    reaper: Option<AbortHandle>,
    next_id: u64,
    counters: Counters,
}

impl<R> State<R> {
    fn new(max: usize) -> Self {
        Self {
            total: 0,
            creating: 0,
            available: Vec::with_capacity(max),
            in_use: HashMap::with_capacity(max),
            pending: VecDeque::new(),
            draining: false,
            reaper: None,
            next_id: 0,
            counters: Counters::default(),
        }
    }
}

impl<R: Send + 'static> State<R> {
    /// Pop the oldest waiter that is still listening.
    fn next_waiter(&mut self) -> Option<Waiter<R>> {
        while let Some(waiter) = self.pending.pop_front() {
            if !waiter.is_settled() && !waiter.is_abandoned() {
                return Some(waiter);
            }
        }
        None
    }

    /// Waiters whose acquire future is still alive.
    fn live_waiters(&self) -> usize {
        self.pending.iter().filter(|waiter| !waiter.is_abandoned()).count()
    }

    /// Forget waiters that were cancelled before being served.
    fn prune_abandoned(&mut self) {
        self.pending.retain(|waiter| !waiter.is_settled() && !waiter.is_abandoned());
    }
}

/// Inner shared state for the pool.
struct Shared<F: Factory> {
    factory: F,
    config: PoolConfig,
    log: Option<Arc<dyn PoolLog>>,
    runtime: Handle,
    state: Mutex<State<F::Resource>>,
    me: Weak<Self>,
}

impl<F: Factory> Shared<F> {
    fn name(&self) -> Option<&str> {
        self.factory.name()
    }

    fn home(&self) -> Weak<dyn Home<F::Resource>> {
        self.me.clone()
    }

    /// Match waiters with available resources, or start a creation.
    ///
    /// Serves at most one waiter from `available`. Invalid resources are
    /// destroyed without consuming a waiter.
    fn dispense(&self, state: &mut State<F::Resource>) {
        pool_log!(
            self,
            LogLevel::Verbose,
            "dispense() clients={} available={}",
            state.pending.len(),
            state.available.len()
        );

        if state.pending.is_empty() {
            return;
        }

        while let Some(idle) = state.available.pop() {
            if !self.factory.validate(&idle.resource) {
                pool_log!(self, LogLevel::Verbose, "dispense() - {} failed validation", idle.id);
                self.discard(state, idle.id, idle.resource);
                continue;
            }

            let Some(waiter) = state.next_waiter() else {
                state.available.push(idle);
                return;
            };

            pool_log!(self, LogLevel::Verbose, "dispense() - reusing {}", idle.id);
            state.in_use.insert(idle.id, idle.use_count);
            let pooled = Pooled::new(idle.resource, idle.id, idle.use_count, self.home());
            match waiter.resolve(pooled) {
                Ok(()) => {
                    state.counters.acquired += 1;
                    return;
                }
                Err(pooled) => {
                    // The waiter went away between the check and the hand-off.
                    state.in_use.remove(&idle.id);
                    if let Some((id, resource)) = pooled.into_parts() {
                        state.available.push(Idle {
                            id,
                            resource,
                            use_count: idle.use_count,
                            expires_at: idle.expires_at,
                        });
                    }
                }
            }
        }

        if state.total < self.config.max_size {
            self.create_resource(state);
        }
    }

    /// Start creating a resource. `total` is bumped before the factory runs
    /// so racing acquires cannot over-provision.
    fn create_resource(&self, state: &mut State<F::Resource>) {
        let Some(shared) = self.me.upgrade() else {
            return;
        };

        state.total += 1;
        state.creating += 1;
        pool_log!(
            self,
            LogLevel::Verbose,
            "createResource() - count={} min={} max={}",
            state.total,
            self.config.min_size,
            self.config.max_size
        );

        self.runtime.spawn(async move {
            let outcome = shared.factory.create().await;
            shared.on_created(outcome);
        });
    }

    fn on_created(&self, outcome: std::result::Result<F::Resource, F::Error>) {
        let mut state = self.state.lock();
        state.creating = state.creating.saturating_sub(1);

        match outcome {
            Ok(resource) => {
                state.counters.created += 1;
                let id = ResourceId(state.next_id);
                state.next_id += 1;
                self.adopt(&mut state, id, resource, 0);
            }
            Err(error) => {
                state.counters.create_failures += 1;
                state.total = state.total.saturating_sub(1);
                let error = Error::create(self.name(), error.into());
                pool_log!(self, LogLevel::Verbose, "createResource() - failed: {error}");

                if let Some(waiter) = state.next_waiter() {
                    waiter.reject(error);
                }

                // Give the remaining waiters a fresh attempt on the next tick.
                let weak = self.me.clone();
                self.runtime.spawn(async move {
                    if let Some(shared) = weak.upgrade() {
                        let mut state = shared.state.lock();
                        shared.dispense(&mut state);
                    }
                });
            }
        }
    }

    /// Hand a resource to the oldest waiter, or park it in `available`.
    fn adopt(&self, state: &mut State<F::Resource>, id: ResourceId, mut resource: F::Resource, use_count: usize) {
        while let Some(waiter) = state.next_waiter() {
            state.in_use.insert(id, use_count);
            match waiter.resolve(Pooled::new(resource, id, use_count, self.home())) {
                Ok(()) => {
                    state.counters.acquired += 1;
                    return;
                }
                Err(pooled) => {
                    state.in_use.remove(&id);
                    let Some((_, returned)) = pooled.into_parts() else {
                        return;
                    };
                    resource = returned;
                }
            }
        }
        self.make_available(state, id, resource, use_count);
    }

    fn make_available(&self, state: &mut State<F::Resource>, id: ResourceId, resource: F::Resource, use_count: usize) {
        state.available.push(Idle {
            id,
            resource,
            use_count,
            expires_at: Instant::now().checked_add(self.config.idle_timeout),
        });
        self.dispense(state);
        self.schedule_reap(state);
    }

    /// Forget a resource that is no longer in `available` or `in_use`, hand
    /// it to the factory for destruction and top the pool back up.
    fn discard(&self, state: &mut State<F::Resource>, id: ResourceId, resource: F::Resource) {
        state.total = state.total.saturating_sub(1);
        state.counters.destroyed += 1;
        self.spawn_destroy(id, resource);
        self.ensure_minimum(state);
    }

    fn spawn_destroy(&self, id: ResourceId, resource: F::Resource) {
        let Some(shared) = self.me.upgrade() else {
            return;
        };
        self.runtime.spawn(async move {
            if let Err(error) = shared.factory.destroy(resource).await {
                let error: BoxError = error.into();
                pool_log!(shared, LogLevel::Error, "destroy() - {id} failed: {error}");
            }
        });
    }

    fn ensure_minimum(&self, state: &mut State<F::Resource>) {
        if state.draining || state.total >= self.config.min_size {
            return;
        }
        for _ in state.total..self.config.min_size {
            self.create_resource(state);
        }
    }

    fn release_resource(&self, id: ResourceId, resource: F::Resource) {
        let mut state = self.state.lock();

        if state.available.iter().any(|idle| idle.id == id) {
            pool_log!(self, LogLevel::Error, "release called twice for the same resource: {id}");
            return;
        }
        let Some(use_count) = state.in_use.remove(&id) else {
            pool_log!(self, LogLevel::Error, "attempt to release an invalid resource: {id}");
            return;
        };

        let use_count = use_count + 1;
        match self.config.use_limit() {
            Some(limit) if use_count >= limit => {
                pool_log!(
                    self,
                    LogLevel::Verbose,
                    "release() destroying {id} - useCount:{use_count} maxUses:{limit}"
                );
                self.discard(&mut state, id, resource);
                self.dispense(&mut state);
            }
            _ => self.make_available(&mut state, id, resource, use_count),
        }
    }

    fn destroy_resource(&self, id: ResourceId, resource: F::Resource) {
        let mut state = self.state.lock();

        let in_use = state.in_use.remove(&id).is_some();
        let available = match state.available.iter().position(|idle| idle.id == id) {
            Some(index) => {
                state.available.remove(index);
                true
            }
            None => false,
        };

        if !in_use && !available {
            pool_log!(self, LogLevel::Error, "destroy() - {id} is not tracked by this pool");
            self.ensure_minimum(&mut state);
            return;
        }

        self.discard(&mut state, id, resource);
        self.dispense(&mut state);
    }

    fn expire_waiter(&self, waiter: &Waiter<F::Resource>) {
        let mut state = self.state.lock();
        let before = state.pending.len();
        state.pending.retain(|pending| !pending.same_as(waiter));
        if state.pending.len() < before {
            state.counters.timed_out += 1;
            pool_log!(self, LogLevel::Verbose, "acquire() - timed out after {:?}", self.config.acquire_timeout);
        }
    }

    /// Arm the idle reaper unless it is already armed.
    fn schedule_reap(&self, state: &mut State<F::Resource>) {
        if state.reaper.is_some() {
            return;
        }
        let weak = self.me.clone();
        let interval = self.config.reap_interval;
        let task = self.runtime.spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(shared) = weak.upgrade() {
                shared.remove_idle();
            }
        });
        state.reaper = Some(task.abort_handle());
    }

    /// Destroy available resources whose idle timeout has passed, never
    /// going below `min_size`.
    fn remove_idle(&self) {
        let mut state = self.state.lock();
        state.reaper = None;

        let now = Instant::now();
        let max_removable = state.total.saturating_sub(self.config.min_size);
        let mut expired = Vec::new();
        let mut index = 0;
        while index < state.available.len() && expired.len() < max_removable {
            if state.available[index].expires_at.is_some_and(|at| now >= at) {
                expired.push(state.available.remove(index));
            } else {
                index += 1;
            }
        }

        for idle in expired {
            pool_log!(self, LogLevel::Verbose, "removeIdle() destroying {}", idle.id);
            self.discard(&mut state, idle.id, idle.resource);
        }

        if state.available.is_empty() {
            pool_log!(self, LogLevel::Verbose, "removeIdle() all objects removed");
        } else {
            self.schedule_reap(&mut state);
        }
    }
}

impl<F: Factory> Home<F::Resource> for Shared<F> {
    fn release(&self, id: ResourceId, resource: F::Resource) {
        self.release_resource(id, resource);
    }
}

impl<F: Factory> Drop for Shared<F> {
    fn drop(&mut self) {
        if let Some(reaper) = self.state.get_mut().reaper.take() {
            reaper.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// PoolStats
// ---------------------------------------------------------------------------

/// Point-in-time view of a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Resources known to the pool: creating + available + in use.
    pub size: usize,
    /// Resources sitting idle in the pool.
    pub available: usize,
    /// Resources checked out by callers.
    pub in_use: usize,
    /// Resources whose creation has not completed yet.
    pub creating: usize,
    /// Callers waiting for a resource.
    pub waiting: usize,
    /// Configured minimum.
    pub min_size: usize,
    /// Configured maximum.
    pub max_size: usize,
    /// Resources successfully created over the pool's lifetime.
    pub created: u64,
    /// Resources handed to the factory for destruction.
    pub destroyed: u64,
    /// Failed creation attempts.
    pub create_failures: u64,
    /// Successful acquisitions.
    pub acquired: u64,
    /// Acquisitions that timed out.
    pub timed_out: u64,
}

// ---------------------------------------------------------------------------
// Pool<F>
// ---------------------------------------------------------------------------

/// Generic resource pool.
///
/// Manages a bounded set of `F::Resource` values, creating, validating
/// and destroying them through the [`Factory`]. Cloning is cheap and
/// every clone drives the same pool.
///
/// Must be built inside a tokio runtime; factory calls and timers run on
/// tasks spawned onto that runtime.
pub struct Pool<F: Factory> {
    shared: Arc<Shared<F>>,
}

impl<F: Factory> Clone for Pool<F> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<F: Factory> fmt::Debug for Pool<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.name())
            .field("stats", &self.stats())
            .finish()
    }
}

impl<F: Factory> Pool<F> {
    /// Create a pool with the given factory and settings.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if `config` is invalid or no tokio
    /// runtime is running.
    pub fn new(factory: F, config: PoolConfig) -> Result<Self> {
        Self::builder(factory).config(config).build()
    }

    /// Start configuring a pool.
    pub fn builder(factory: F) -> PoolBuilder<F> {
        PoolBuilder {
            factory,
            config: PoolConfig::default(),
            log: None,
        }
    }

    /// Acquire a resource.
    ///
    /// Waits until a resource is available or can be created. Fails with
    /// [`Error::Draining`] once [`drain`](Self::drain) has been called, with
    /// [`Error::Timeout`] after `acquire_timeout`, or with
    /// [`Error::Create`] when the factory fails while this caller is the
    /// oldest waiter.
    pub async fn acquire(&self) -> Result<Pooled<F::Resource>> {
        let promise = {
            let shared = &self.shared;
            let mut state = shared.state.lock();
            if state.draining {
                return Err(Error::Draining);
            }

            let (deferred, promise) = Deferred::new();
            let weak = Arc::downgrade(shared);
            let waiter = deferred.clone();
            deferred.register_timeout(shared.config.acquire_timeout, move || {
                if let Some(shared) = weak.upgrade() {
                    shared.expire_waiter(&waiter);
                }
            });

            state.pending.push_back(deferred);
            shared.dispense(&mut state);
            shared.ensure_minimum(&mut state);
            promise
        };
        promise.await
    }

    /// Return a resource to the pool.
    ///
    /// After `max_uses` releases the resource is destroyed instead and a
    /// replacement is created if anyone is waiting.
    pub fn release(&self, pooled: Pooled<F::Resource>) {
        if !pooled.belongs_to(self.home_ptr()) {
            pool_log!(
                self.shared,
                LogLevel::Error,
                "attempt to release an invalid resource: {} belongs to another pool",
                pooled.id()
            );
            return;
        }
        if let Some((id, resource)) = pooled.into_parts() {
            self.shared.release_resource(id, resource);
        }
    }

    /// Remove a resource from the pool and hand it to the factory's
    /// `destroy`. Destroy errors are logged, not returned.
    pub fn destroy(&self, pooled: Pooled<F::Resource>) {
        if !pooled.belongs_to(self.home_ptr()) {
            pool_log!(
                self.shared,
                LogLevel::Error,
                "attempt to destroy an invalid resource: {} belongs to another pool",
                pooled.id()
            );
            let mut state = self.shared.state.lock();
            self.shared.ensure_minimum(&mut state);
            return;
        }
        if let Some((id, resource)) = pooled.into_parts() {
            self.shared.destroy_resource(id, resource);
        }
    }

    /// Stop accepting work and wait for the backlog to clear.
    ///
    /// Resolves once no caller is waiting and every resource is back in the
    /// pool. In-use resources are not touched; this waits for them.
    pub async fn drain(&self) {
        let shared = &self.shared;
        {
            let mut state = shared.state.lock();
            state.draining = true;
            pool_log!(shared, LogLevel::Info, "draining");
        }

        loop {
            {
                let mut state = shared.state.lock();
                state.prune_abandoned();
                if !state.pending.is_empty() {
                    shared.dispense(&mut state);
                } else if state.available.len() == state.total {
                    break;
                }
            }
            tokio::time::sleep(shared.config.drain_poll_interval).await;
        }
        pool_log!(shared, LogLevel::Info, "drained");
    }

    /// Destroy every available resource right now.
    ///
    /// In-use resources are left alone and `min_size` replenishment still
    /// applies; set `min_size` to zero first if that is unwanted.
    ///
    /// # Errors
    /// Returns [`Error::Aggregate`] holding every error the factory's
    /// `destroy` produced.
    pub async fn destroy_all_now(&self) -> Result<()> {
        let shared = &self.shared;
        let doomed = {
            let mut state = shared.state.lock();
            pool_log!(shared, LogLevel::Info, "force destroying all objects");
            if let Some(reaper) = state.reaper.take() {
                reaper.abort();
            }
            let doomed = std::mem::take(&mut state.available);
            state.total = state.total.saturating_sub(doomed.len());
            state.counters.destroyed += doomed.len() as u64;
            shared.ensure_minimum(&mut state);
            doomed
        };

        let outcomes =
            futures::future::join_all(doomed.into_iter().map(|idle| shared.factory.destroy(idle.resource))).await;
        let errors: Vec<BoxError> = outcomes
            .into_iter()
            .filter_map(std::result::Result::err)
            .map(Into::<BoxError>::into)
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            pool_log!(shared, LogLevel::Error, "{} destroy call(s) failed", errors.len());
            Err(AggregateError::new(errors).into())
        }
    }

    /// Current pool statistics.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let state = self.shared.state.lock();
        PoolStats {
            size: state.total,
            available: state.available.len(),
            in_use: state.in_use.len(),
            creating: state.creating,
            waiting: state.live_waiters(),
            min_size: self.shared.config.min_size,
            max_size: self.shared.config.max_size,
            created: state.counters.created,
            destroyed: state.counters.destroyed,
            create_failures: state.counters.create_failures,
            acquired: state.counters.acquired,
            timed_out: state.counters.timed_out,
        }
    }

    /// Resources known to the pool, whether free, in use or being created.
    #[must_use]
    pub fn size(&self) -> usize {
        self.shared.state.lock().total
    }

    /// Resources sitting idle in the pool.
    #[must_use]
    pub fn available(&self) -> usize {
        self.shared.state.lock().available.len()
    }

    /// Resources checked out by callers.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.shared.state.lock().in_use.len()
    }

    /// Callers waiting for a resource.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.shared.state.lock().live_waiters()
    }

    /// Configured maximum.
    #[must_use]
    pub fn max_size(&self) -> usize {
        self.shared.config.max_size
    }

    /// Configured minimum.
    #[must_use]
    pub fn min_size(&self) -> usize {
        self.shared.config.min_size
    }

    /// The factory's name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.shared.name()
    }

    /// Whether [`drain`](Self::drain) has been called.
    #[must_use]
    pub fn is_draining(&self) -> bool {
        self.shared.state.lock().draining
    }

    fn home_ptr(&self) -> *const () {
        Arc::as_ptr(&self.shared).cast::<()>()
    }
}

// ---------------------------------------------------------------------------
// PoolBuilder
// ---------------------------------------------------------------------------

/// Builder for [`Pool`].
pub struct PoolBuilder<F: Factory> {
    factory: F,
    config: PoolConfig,
    log: Option<Arc<dyn PoolLog>>,
}

impl<F: Factory> PoolBuilder<F> {
    /// Replace the whole configuration.
    pub fn config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Minimum number of resources to keep alive.
    pub fn min_size(mut self, min_size: usize) -> Self {
        self.config.min_size = min_size;
        self
    }

    /// Maximum number of resources.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.config.max_size = max_size;
        self
    }

    /// Retire resources after this many releases.
    pub fn max_uses(mut self, max_uses: usize) -> Self {
        self.config.max_uses = Some(max_uses);
        self
    }

    /// Idle time after which available resources are reaped.
    pub fn idle_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Time an acquire may wait.
    pub fn acquire_timeout(mut self, timeout: std::time::Duration) -> Self {
        self.config.acquire_timeout = timeout;
        self
    }

    /// Interval between idle reaping passes.
    pub fn reap_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.reap_interval = interval;
        self
    }

    /// Interval at which [`Pool::drain`] re-checks outstanding work.
    pub fn drain_poll_interval(mut self, interval: std::time::Duration) -> Self {
        self.config.drain_poll_interval = interval;
        self
    }

    /// Install a log observer. Without one the pool logs nothing.
    ///
    /// The observer is called while the pool lock is held and must not call
    /// back into the pool.
    pub fn log(mut self, log: impl PoolLog + 'static) -> Self {
        self.log = Some(Arc::new(log));
        self
    }

    /// Build the pool.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if the configuration is invalid or
    /// the builder is not running inside a tokio runtime.
    pub fn build(self) -> Result<Pool<F>> {
        self.config.validate()?;
        let config = self.config.with_zero_durations_defaulted();
        let runtime = Handle::try_current()
            .map_err(|_| Error::configuration("a pool must be built inside a tokio runtime"))?;
        let max = config.max_size;

        let shared = Arc::new_cyclic(|me| Shared {
            factory: self.factory,
            config,
            log: self.log,
            runtime,
            state: Mutex::new(State::new(max)),
            me: me.clone(),
        });
        Ok(Pool { shared })
    }
}
