//! Resource lock manager: shared/exclusive modes with FIFO wait queues.
//!
//! A resource is named by a `"<resource_type>:<resource_id>"` key (e.g.
//! `"table:users"`, `"row:users:42"`). Deadlock detection is out of scope;
//! callers guard against indefinite waits with their own timeout.


use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{DbError, DbResult, TxnId};
use hashbrown::{HashMap, HashSet};
use parking_lot::{Condvar, Mutex};

/// `SHARED` locks are mutually compatible; every other pairing conflicts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn compatible_with(self, other: LockMode) -> bool {
        matches!((self, other), (LockMode::Shared, LockMode::Shared))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum WaitState {
    Pending,
    Granted,
    Cancelled,
}

/// Completion handle a waiter blocks on until the lock manager grants or
/// cancels its request.
struct WaitHandle {
    state: Mutex<WaitState>,
    cond: Condvar,
}

impl WaitHandle {
    fn new() -> Self {
        Self {
            state: Mutex::new(WaitState::Pending),
            cond: Condvar::new(),
        }
    }

    fn grant(&self) {
        let mut state = self.state.lock();
        *state = WaitState::Granted;
        self.cond.notify_all();
    }

    fn cancel(&self) {
        let mut state = self.state.lock();
        *state = WaitState::Cancelled;
        self.cond.notify_all();
    }

    /// Block until granted, cancelled, or `timeout` elapses. Returns the
    /// state observed when the wait ended; `Pending` means it timed out.
    fn wait(&self, timeout: Option<Duration>) -> WaitState {
        let mut state = self.state.lock();
        let deadline = timeout.map(|d| Instant::now() + d);
        while *state == WaitState::Pending {
            match deadline {
                None => self.cond.wait(&mut state),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        break;
                    }
                    let timed_out = self.cond.wait_for(&mut state, deadline - now).timed_out();
                    if timed_out {
                        break;
                    }
                }
            }
        }
        *state
    }
}

struct Waiter {
    txn_id: TxnId,
    mode: LockMode,
    handle: Arc<WaitHandle>,
}

#[derive(Default)]
struct ResourceLock {
    mode: Option<LockMode>,
    holders: HashSet<TxnId>,
    waiters: VecDeque<Waiter>,
}

#[derive(Default)]
struct Inner {
    resources: HashMap<String, ResourceLock>,
    held_by: HashMap<TxnId, HashSet<String>>,
}

impl Inner {
    fn track_held(&mut self, txn_id: TxnId, resource: &str) {
        self.held_by
            .entry(txn_id)
            .or_default()
            .insert(resource.to_string());
    }

    fn untrack_held(&mut self, txn_id: TxnId, resource: &str) {
        if let Some(set) = self.held_by.get_mut(&txn_id) {
            set.remove(resource);
            if set.is_empty() {
                self.held_by.remove(&txn_id);
            }
        }
    }
}

/// Clone-able handle to a shared lock table, mirroring the buffer pool's
/// `Arc<Mutex<_>>` shape.
#[derive(Clone, Default)]
pub struct LockManager {
    inner: Arc<Mutex<Inner>>,
}

impl LockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire `mode` on `resource` for `txn_id`, blocking the calling thread
    /// if the resource is held incompatibly. `timeout` is the caller's only
    /// safeguard against an indefinite wait; `None` waits forever.
    pub fn acquire(
        &self,
        txn_id: TxnId,
        resource: impl Into<String>,
        mode: LockMode,
        timeout: Option<Duration>,
    ) -> DbResult<()> {
        let resource = resource.into();
        let handle = {
            let mut inner = self.inner.lock();
            let lock = inner.resources.entry(resource.clone()).or_default();

            // A transaction already holding this resource never waits on itself.
            if lock.holders.contains(&txn_id) {
                return Ok(());
            }

            if lock.holders.is_empty() {
                lock.mode = Some(mode);
                lock.holders.insert(txn_id);
                inner.track_held(txn_id, &resource);
                return Ok(());
            }

            let current_mode = lock.mode.expect("non-empty holders implies a mode");
            if lock.waiters.is_empty() && mode.compatible_with(current_mode) {
                lock.holders.insert(txn_id);
                inner.track_held(txn_id, &resource);
                return Ok(());
            }

            let handle = Arc::new(WaitHandle::new());
            lock.waiters.push_back(Waiter {
                txn_id,
                mode,
                handle: handle.clone(),
            });
            handle
        };

        match handle.wait(timeout) {
            WaitState::Granted => {
                let mut inner = self.inner.lock();
                inner.track_held(txn_id, &resource);
                Ok(())
            }
            WaitState::Cancelled => Err(DbError::Lock(format!(
                "lock wait on {resource} was cancelled"
            ))),
            WaitState::Pending => {
                self.remove_waiter(&resource, txn_id);
                Err(DbError::Lock(format!(
                    "timed out waiting for a lock on {resource}"
                )))
            }
        }
    }

    fn remove_waiter(&self, resource: &str, txn_id: TxnId) {
        let mut inner = self.inner.lock();
        if let Some(lock) = inner.resources.get_mut(resource) {
            lock.waiters.retain(|w| w.txn_id != txn_id);
        }
    }

    /// Release `txn_id`'s hold on `resource`. If it was the last holder, pop
    /// the head of the wait queue and grant every waiter mutually compatible
    /// with the first one, in FIFO order, together.
    pub fn release(&self, txn_id: TxnId, resource: &str) {
        let mut inner = self.inner.lock();
        inner.untrack_held(txn_id, resource);

        let Some(lock) = inner.resources.get_mut(resource) else {
            return;
        };
        lock.holders.remove(&txn_id);
        if !lock.holders.is_empty() {
            return;
        }
        lock.mode = None;

        let Some(first_mode) = lock.waiters.front().map(|w| w.mode) else {
            return;
        };

        let mut granted = Vec::new();
        while let Some(front) = lock.waiters.front() {
            if front.mode.compatible_with(first_mode) || front.mode == first_mode {
                granted.push(lock.waiters.pop_front().expect("front checked above"));
            } else {
                break;
            }
        }

        lock.mode = Some(first_mode);
        for waiter in &granted {
            lock.holders.insert(waiter.txn_id);
            inner.track_held(waiter.txn_id, resource);
        }
        for waiter in granted {
            waiter.handle.grant();
        }
    }

    /// Release every resource `txn_id` currently holds or is waiting on.
    /// Called at commit or abort.
    pub fn release_all(&self, txn_id: TxnId) {
        let resources: Vec<String> = {
            let inner = self.inner.lock();
            inner
                .held_by
                .get(&txn_id)
                .map(|set| set.iter().cloned().collect())
                .unwrap_or_default()
        };
        for resource in resources {
            self.release(txn_id, &resource);
        }

        // Cancel any outstanding waits this transaction never got granted.
        let mut inner = self.inner.lock();
        for lock in inner.resources.values_mut() {
            let cancelled: Vec<Arc<WaitHandle>> = {
                let mut taken = Vec::new();
                lock.waiters.retain(|w| {
                    if w.txn_id == txn_id {
                        taken.push(w.handle.clone());
                        false
                    } else {
                        true
                    }
                });
                taken
            };
            for handle in cancelled {
                handle.cancel();
            }
        }
    }

    /// Whether `txn_id` currently holds a lock on `resource` (test/debug aid).
    pub fn holds(&self, txn_id: TxnId, resource: &str) -> bool {
        self.inner
            .lock()
            .resources
            .get(resource)
            .is_some_and(|lock| lock.holders.contains(&txn_id))
    }
}
