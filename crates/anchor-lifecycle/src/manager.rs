use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use anchor_core::{AnchorHandle, CloudAnchorId, RejectionError};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::{ConfigError, ManagerConfig, MAX_TTL_DAYS, MIN_TTL_DAYS};
use crate::handle::OwnedAnchor;
use crate::listener::{Completion, Listener, OperationKind, OperationToken};
use crate::log_throttle::LogThrottle;
use crate::pending::{PendingOperation, PendingTable};
use crate::platform::Platform;

const TARGET: &str = "anchor::lifecycle";

/// Tracks any number of concurrent host/resolve operations and reports each
/// one exactly once, from [`CloudAnchorManager::poll_completions`].
///
/// Every public method takes the same lock for its whole critical section.
/// Listeners run after the lock is released, so they may call back into the
/// manager.
pub struct CloudAnchorManager {
    platform: Arc<dyn Platform>,
    config: ManagerConfig,
    inner: Mutex<ManagerInner>,
}

struct ManagerInner {
    table: PendingTable,
    /// Completions of operations submitted without a listener.
    ready: Vec<Completion>,
    next_token: u64,
    tick: u64,
    stall_log: LogThrottle<OperationToken>,
}

impl CloudAnchorManager {
    pub fn new(platform: Arc<dyn Platform>, config: ManagerConfig) -> Result<Self, ConfigError> {
        let config = config.validate()?;
        Ok(Self::build(platform, config))
    }

    pub fn with_defaults(platform: Arc<dyn Platform>) -> Self {
        Self::build(platform, ManagerConfig::default())
    }

    fn build(platform: Arc<dyn Platform>, config: ManagerConfig) -> Self {
        let stall_log = LogThrottle::new(config.stall_warning_ticks);
        Self {
            platform,
            config,
            inner: Mutex::new(ManagerInner {
                table: PendingTable::new(),
                ready: Vec::new(),
                next_token: 1,
                tick: 0,
                stall_log,
            }),
        }
    }

    pub fn platform(&self) -> &Arc<dyn Platform> {
        &self.platform
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Hosts `anchor` with the configured TTL. `listener` runs once, from a
    /// later poll, with the terminal state.
    pub fn host<F>(&self, anchor: AnchorHandle, listener: F) -> Result<OperationToken, RejectionError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.begin_host(anchor, self.config.host_ttl_days, Some(Box::new(listener)))
    }

    /// # Panics
    ///
    /// If `ttl_days` is outside 1..=365.
    pub fn host_with_ttl<F>(
        &self,
        anchor: AnchorHandle,
        ttl_days: u32,
        listener: F,
    ) -> Result<OperationToken, RejectionError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        assert!(
            (MIN_TTL_DAYS..=MAX_TTL_DAYS).contains(&ttl_days),
            "host ttl must be within {MIN_TTL_DAYS}..={MAX_TTL_DAYS} days, got {ttl_days}"
        );
        self.begin_host(anchor, ttl_days, Some(Box::new(listener)))
    }

    /// Hosts without a listener; the result shows up in
    /// [`CloudAnchorManager::drain_completions`] or [`CloudAnchorManager::take_ready`].
    ///
    /// A completion parked by `poll_completions` keeps its anchor alive until
    /// `take_ready` hands it over, so callers that poll must also take.
    pub fn submit_host(&self, anchor: AnchorHandle) -> Result<OperationToken, RejectionError> {
        self.begin_host(anchor, self.config.host_ttl_days, None)
    }

    pub fn resolve<F>(&self, id: &CloudAnchorId, listener: F) -> Result<OperationToken, RejectionError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        self.begin_resolve(id, Some(Box::new(listener)))
    }

    /// # Panics
    ///
    /// If `id` is empty or whitespace.
    pub fn resolve_str<F>(&self, id: &str, listener: F) -> Result<OperationToken, RejectionError>
    where
        F: FnOnce(Completion) + Send + 'static,
    {
        let id = CloudAnchorId::new(id).expect("resolve called with an empty cloud anchor id");
        self.begin_resolve(&id, Some(Box::new(listener)))
    }

    /// Listener-free resolve. Parking works as for [`CloudAnchorManager::submit_host`].
    pub fn submit_resolve(&self, id: &CloudAnchorId) -> Result<OperationToken, RejectionError> {
        self.begin_resolve(id, None)
    }

    fn begin_host(
        &self,
        anchor: AnchorHandle,
        ttl_days: u32,
        listener: Option<Listener>,
    ) -> Result<OperationToken, RejectionError> {
        let mut inner = self.inner.lock();
        let handle = self.platform.host_anchor(anchor, ttl_days).map_err(|err| {
            warn!(
                target: TARGET,
                source = %anchor,
                error = %err,
                transient = err.is_transient(),
                "host request rejected"
            );
            err
        })?;
        let token = inner.register(
            OperationKind::Host,
            OwnedAnchor::adopt(handle, self.platform.clone()),
            listener,
            None,
        );
        info!(
            target: TARGET,
            token = %token,
            source = %anchor,
            handle = %handle,
            ttl_days,
            "hosting cloud anchor"
        );
        Ok(token)
    }

    fn begin_resolve(
        &self,
        id: &CloudAnchorId,
        listener: Option<Listener>,
    ) -> Result<OperationToken, RejectionError> {
        let mut inner = self.inner.lock();
        let handle = self.platform.resolve_anchor(id).map_err(|err| {
            warn!(
                target: TARGET,
                cloud_anchor_id = %id,
                error = %err,
                transient = err.is_transient(),
                "resolve request rejected"
            );
            err
        })?;
        let token = inner.register(
            OperationKind::Resolve,
            OwnedAnchor::adopt(handle, self.platform.clone()),
            listener,
            Some(id.clone()),
        );
        info!(
            target: TARGET,
            token = %token,
            cloud_anchor_id = %id,
            handle = %handle,
            "resolving cloud anchor"
        );
        Ok(token)
    }

    /// Per-frame sweep. Call once per world update, after the platform has
    /// refreshed its cloud states. Returns the number of listeners invoked.
    ///
    /// # Panics
    ///
    /// If a listener panics. Every other listener of the sweep still runs
    /// first, then the first panic is resumed.
    pub fn poll_completions(&self) -> usize {
        let mut invoked = 0;
        let mut unclaimed = Vec::new();
        let mut first_panic = None;
        for (completion, listener) in self.drain_completions() {
            let Some(listener) = listener else {
                unclaimed.push(completion);
                continue;
            };
            let token = completion.token;
            invoked += 1;
            let dispatch = AssertUnwindSafe(move || listener(completion));
            if let Err(payload) = panic::catch_unwind(dispatch) {
                error!(target: TARGET, token = %token, "completion listener panicked");
                first_panic.get_or_insert(payload);
            }
        }
        if !unclaimed.is_empty() {
            self.inner.lock().ready.extend(unclaimed);
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        invoked
    }

    /// Removes every finished operation from the table and hands the results
    /// to the caller, who becomes responsible for invoking the listeners.
    /// Listener-free operations come back with `None`; completions already
    /// parked for [`CloudAnchorManager::take_ready`] are not included.
    pub fn drain_completions(&self) -> Vec<(Completion, Option<Listener>)> {
        let mut inner = self.inner.lock();
        inner.tick += 1;
        let tick = inner.tick;
        let ManagerInner {
            table, stall_log, ..
        } = &mut *inner;

        let platform = &self.platform;
        let finished = table.take_returnable(|handle| platform.cloud_state(handle));

        let mut out: Vec<(Completion, Option<Listener>)> = Vec::with_capacity(finished.len());
        for (op, state) in finished {
            let PendingOperation {
                token,
                kind,
                anchor,
                listener,
                requested_id,
                registered_tick,
            } = op;
            stall_log.forget(&token);
            info!(
                target: TARGET,
                token = %token,
                kind = %kind,
                handle = %anchor.handle(),
                state = %state,
                ticks = tick.saturating_sub(registered_tick),
                "cloud anchor operation finished"
            );
            out.push((Completion::new(token, kind, state, requested_id, anchor), listener));
        }

        for op in table.stalled(tick, self.config.stall_warning_ticks) {
            if stall_log.should_log(op.token, tick) {
                warn!(
                    target: TARGET,
                    token = %op.token,
                    kind = %op.kind,
                    handle = %op.anchor.handle(),
                    ticks = tick.saturating_sub(op.registered_tick),
                    "cloud anchor operation still pending"
                );
            }
        }
        out
    }

    /// Completions of listener-free operations collected by earlier polls.
    pub fn take_ready(&self) -> Vec<Completion> {
        std::mem::take(&mut self.inner.lock().ready)
    }

    /// Abandons an operation: the anchor is detached and released and the
    /// listener is dropped without being called. Returns `false` if the token
    /// is not pending (already finished, cancelled, or never issued).
    pub fn cancel(&self, token: OperationToken) -> bool {
        let mut inner = self.inner.lock();
        let Some(op) = inner.table.remove(token) else {
            debug!(target: TARGET, token = %token, "cancel ignored; operation not pending");
            return false;
        };
        inner.stall_log.forget(&token);
        info!(
            target: TARGET,
            token = %token,
            kind = %op.kind,
            handle = %op.anchor.handle(),
            "cancelled cloud anchor operation"
        );
        let PendingOperation {
            anchor, listener, ..
        } = op;
        drop(listener);
        anchor.detach_and_release();
        true
    }

    /// Forgets every pending operation without notifying anyone. Their
    /// anchors are released. Returns how many operations were dropped.
    pub fn clear_listeners(&self) -> usize {
        let mut inner = self.inner.lock();
        let dropped = inner.table.drain();
        inner.ready.clear();
        inner.stall_log.clear();
        if !dropped.is_empty() {
            debug!(target: TARGET, count = dropped.len(), "cleared pending operations");
        }
        dropped.len()
    }

    /// Waits for any in-flight call to leave the critical section.
    pub fn on_pause(&self) {
        drop(self.inner.lock());
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().table.len()
    }

    pub fn is_pending(&self, token: OperationToken) -> bool {
        self.inner.lock().table.contains(token)
    }

    /// Number of sweeps performed so far.
    pub fn current_tick(&self) -> u64 {
        self.inner.lock().tick
    }
}

impl ManagerInner {
    fn register(
        &mut self,
        kind: OperationKind,
        anchor: OwnedAnchor,
        listener: Option<Listener>,
        requested_id: Option<CloudAnchorId>,
    ) -> OperationToken {
        let token = OperationToken::new(self.next_token);
        self.next_token += 1;
        self.table.insert(PendingOperation {
            token,
            kind,
            anchor,
            listener,
            requested_id,
            registered_tick: self.tick,
        });
        token
    }
}

impl Drop for CloudAnchorManager {
    fn drop(&mut self) {
        let inner = self.inner.get_mut();
        if !inner.table.is_empty() {
            debug!(
                target: TARGET,
                count = inner.table.len(),
                "manager dropped with operations still pending"
            );
        }
    }
}
