// ============================================================================
// Transaction Lock
// ============================================================================
//
// Bounded-concurrency admission queue. At most `admission_count` transactions
// run at a time; the rest queue in submission order and are admitted as
// running transactions release. A transaction re-entering the lock with the
// id of the currently running one is a continuation and runs inline without
// paying a second admission.
//
// ============================================================================

use super::state::{Transaction, TransactionId};
use crate::core::{HookError, Result};
use futures::future::BoxFuture;
use lazy_static::lazy_static;
use serde_json::Value;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::{Mutex, oneshot};

type FireHook = Box<dyn Fn(&Transaction) -> anyhow::Result<()> + Send + Sync>;
type ReleaseHook = Box<dyn Fn(Option<&HookError>) -> anyhow::Result<()> + Send + Sync>;

struct QueuedTx {
    tx: Transaction,
    done: oneshot::Sender<Result<Value>>,
}

struct LockState {
    admission_counter: usize,
    pending: VecDeque<QueuedTx>,
    current: Option<TransactionId>,
}

/// Point-in-time snapshot of the lock's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    /// Remaining admission slots
    pub admission_counter: usize,
    /// Transactions waiting for a slot
    pub pending: usize,
    /// The currently running transaction, if any
    pub current: Option<TransactionId>,
    /// Cumulative count of paid admissions (continuations and inherited
    /// queue slots do not pay)
    pub admissions: u64,
}

lazy_static! {
    static ref GLOBAL_LOCK: RwLock<Arc<TxLock>> = RwLock::new(Arc::new(TxLock::new(1)));
}

/// Serializes logical units of work against a shared resource.
pub struct TxLock {
    state: Mutex<LockState>,
    admissions: AtomicU64,
    pre_fire: Option<FireHook>,
    post_release: Option<ReleaseHook>,
}

impl TxLock {
    /// A lock admitting at most `admission_count` concurrent transactions
    /// (clamped to at least one).
    pub fn new(admission_count: usize) -> Self {
        Self {
            state: Mutex::new(LockState {
                admission_counter: admission_count.max(1),
                pending: VecDeque::new(),
                current: None,
            }),
            admissions: AtomicU64::new(0),
            pre_fire: None,
            post_release: None,
        }
    }

    /// Invoked after a transaction is set current, before its action runs.
    /// A failure is logged and does not block the transaction.
    pub fn with_pre_fire(
        mut self,
        hook: impl Fn(&Transaction) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.pre_fire = Some(Box::new(hook));
        self
    }

    /// Invoked on every release with the action's error, if any. A failure is
    /// logged and never blocks releasing the lock or admitting queued work.
    pub fn with_post_release(
        mut self,
        hook: impl Fn(Option<&HookError>) -> anyhow::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.post_release = Some(Box::new(hook));
        self
    }

    /// The process-wide default lock.
    pub fn global() -> Arc<TxLock> {
        GLOBAL_LOCK
            .read()
            .map(|g| Arc::clone(&g))
            .unwrap_or_else(|poison| Arc::clone(&poison.into_inner()))
    }

    /// Replace the process-wide default lock. In-flight transactions keep
    /// running against the lock they were submitted to.
    pub fn set_global(lock: Arc<TxLock>) {
        match GLOBAL_LOCK.write() {
            Ok(mut g) => *g = lock,
            Err(poison) => *poison.into_inner() = lock,
        }
        log::debug!("transaction lock replaced");
    }

    pub async fn stats(&self) -> TxStats {
        let state = self.state.lock().await;
        TxStats {
            admission_counter: state.admission_counter,
            pending: state.pending.len(),
            current: state.current,
            admissions: self.admissions.load(Ordering::SeqCst),
        }
    }

    /// Convenience wrapper building the [`Transaction`] inline.
    pub async fn run<F, Fut>(
        self: &Arc<Self>,
        source_class: &str,
        method: &str,
        action: F,
    ) -> Result<Value>
    where
        F: FnOnce(TxHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.submit(Transaction::new(source_class, method, action)).await
    }

    /// Admit, queue, or continue a transaction, and resolve with its action's
    /// result once it has run.
    ///
    /// Admission rules:
    /// - same id as the running transaction: continuation, fires inline, pays
    ///   nothing; the release stays with the outer frame
    /// - a free admission slot: pay it and fire now
    /// - otherwise: queue; a later `release` fires it in submission order
    pub async fn submit(self: &Arc<Self>, mut tx: Transaction) -> Result<Value> {
        enum Admission {
            Continuation(Transaction),
            Fire(Transaction),
            Queued(oneshot::Receiver<Result<Value>>),
        }

        let admission = {
            let mut state = self.state.lock().await;
            if state.current == Some(tx.id()) {
                Admission::Continuation(tx)
            } else if state.admission_counter > 0 {
                state.admission_counter -= 1;
                self.admissions.fetch_add(1, Ordering::SeqCst);
                Admission::Fire(tx)
            } else {
                log::debug!("transaction {tx} queued (no admission available)");
                let (done, receiver) = oneshot::channel();
                tx.mark_queued();
                state.pending.push_back(QueuedTx { tx, done });
                Admission::Queued(receiver)
            }
        };

        match admission {
            Admission::Continuation(mut tx) => {
                log::trace!("transaction {tx} continues the open transaction");
                self.fire(&mut tx).await;
                let action = tx.take_action()?;
                action(self.handle(tx.id())).await
            }
            Admission::Fire(tx) => self.fire_and_release(tx).await,
            Admission::Queued(receiver) => receiver.await.map_err(|_| {
                HookError::Lock("transaction was dropped before completion".to_string())
            })?,
        }
    }

    fn handle(self: &Arc<Self>, id: TransactionId) -> TxHandle {
        TxHandle {
            id,
            lock: Arc::clone(self),
        }
    }

    /// Set the transaction current and start its unit of work.
    async fn fire(&self, tx: &mut Transaction) {
        {
            let mut state = self.state.lock().await;
            state.current = Some(tx.id());
        }
        tx.mark_running();
        if let Some(hook) = &self.pre_fire {
            if let Err(err) = hook(tx) {
                log::warn!("pre-fire hook failed for {tx}: {err}");
            }
        }
    }

    fn fire_and_release(self: &Arc<Self>, tx: Transaction) -> BoxFuture<'_, Result<Value>> {
        Box::pin(async move {
            let mut tx = tx;
            self.fire(&mut tx).await;
            let handle = self.handle(tx.id());
            let result = match tx.take_action() {
                Ok(action) => action(handle).await,
                Err(err) => Err(err),
            };
            self.release(tx, result.as_ref().err()).await;
            result
        })
    }

    /// Clear the running transaction, then either fire the queue head (on the
    /// next scheduler turn, so this call frame unwinds first) or restore one
    /// admission slot. Exactly one of the two, always.
    async fn release(self: &Arc<Self>, mut tx: Transaction, error: Option<&HookError>) {
        let next = {
            let mut state = self.state.lock().await;
            state.current = None;
            match state.pending.pop_front() {
                Some(next) => Some(next),
                None => {
                    state.admission_counter += 1;
                    None
                }
            }
        };
        tx.mark_released();

        if let Some(hook) = &self.post_release {
            if let Err(err) = hook(error) {
                log::warn!("post-release hook failed after {tx}: {err}");
            }
        }

        if let Some(QueuedTx { tx: queued, done }) = next {
            log::trace!("admitting queued transaction {queued} after {tx}");
            let lock = Arc::clone(self);
            tokio::spawn(async move {
                let result = lock.fire_and_release(queued).await;
                let _ = done.send(result);
            });
        }
    }
}

/// Handle to a running transaction, passed into its action so nested
/// transactional calls can ride the same transaction.
#[derive(Clone)]
pub struct TxHandle {
    id: TransactionId,
    lock: Arc<TxLock>,
}

impl TxHandle {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn lock(&self) -> &Arc<TxLock> {
        &self.lock
    }

    /// Submit a nested unit of work carrying this transaction's id; the lock
    /// detects it as a continuation and runs it inline.
    pub async fn continue_with<F, Fut>(
        &self,
        source_class: &str,
        method: &str,
        action: F,
    ) -> Result<Value>
    where
        F: FnOnce(TxHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let tx = Transaction::continuation(self.id, source_class, method, action);
        self.lock.submit(tx).await
    }
}

impl std::fmt::Debug for TxHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxHandle").field("id", &self.id).finish()
    }
}

/// Types whose transactional entry points can be rebound to an open
/// transaction.
///
/// `rebind` returns a view of the object whose transactional methods see the
/// given transaction and submit continuations instead of competing for a new
/// admission; everything else passes through to the original unchanged.
pub trait Transactional: Sized {
    fn current_transaction(&self) -> Option<&TxHandle>;

    fn rebind(&self, tx: TxHandle) -> Self;
}

/// Produce a view of `obj` bound to the given open transaction.
pub fn bind_to_transaction<T: Transactional>(obj: &T, tx: TxHandle) -> T {
    obj.rebind(tx)
}
