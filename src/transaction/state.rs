// ============================================================================
// Transaction Lifecycle
// ============================================================================
//
// One logical unit of work admitted, run, and released by the lock.
// State transitions:
//
//   Created ──queue──> Queued ──fire──> Running ──release──> Released
//      │
//      └──bind──> merged into an already-open transaction (never fires
//                 independently; rides the host's lifecycle)
//
// ============================================================================

use super::lock::TxHandle;
use crate::core::{HookError, Result};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

/// Global transaction ID counter
static NEXT_TX_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TX_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "tx_{}", self.0)
    }
}

/// Transaction lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Built but not yet handed to the lock
    Created,

    /// Waiting for an admission slot
    Queued,

    /// Fired; its action is running
    Running,

    /// Terminal; a transaction is never reused after release
    Released,
}

impl TxState {
    pub fn is_running(&self) -> bool {
        matches!(self, TxState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TxState::Released)
    }
}

impl std::fmt::Display for TxState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TxState::Created => write!(f, "CREATED"),
            TxState::Queued => write!(f, "QUEUED"),
            TxState::Running => write!(f, "RUNNING"),
            TxState::Released => write!(f, "RELEASED"),
        }
    }
}

/// The queued unit of work. Receives a handle to the running transaction so
/// nested transactional calls can be detected as continuations.
pub type TxAction = Box<dyn FnOnce(TxHandle) -> BoxFuture<'static, Result<Value>> + Send>;

/// One logical unit of work serialized by the transaction lock.
pub struct Transaction {
    id: TransactionId,
    source_class: String,
    method: String,
    action: Option<TxAction>,
    log: Vec<String>,
    metadata: Map<String, Value>,
    state: TxState,
}

impl Transaction {
    /// Create a transaction with a fresh id.
    pub fn new<F, Fut>(
        source_class: impl Into<String>,
        method: impl Into<String>,
        action: F,
    ) -> Self
    where
        F: FnOnce(TxHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::with_id(TransactionId::new(), source_class, method, action)
    }

    /// Create a transaction that re-enters an already-open transaction: it
    /// carries the open transaction's id, so the lock fires it immediately as
    /// a continuation instead of paying a second admission.
    pub fn continuation<F, Fut>(
        id: TransactionId,
        source_class: impl Into<String>,
        method: impl Into<String>,
        action: F,
    ) -> Self
    where
        F: FnOnce(TxHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        Self::with_id(id, source_class, method, action)
    }

    fn with_id<F, Fut>(
        id: TransactionId,
        source_class: impl Into<String>,
        method: impl Into<String>,
        action: F,
    ) -> Self
    where
        F: FnOnce(TxHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        let mut tx = Self {
            id,
            source_class: source_class.into(),
            method: method.into(),
            action: Some(Box::new(move |handle| {
                Box::pin(action(handle)) as BoxFuture<'static, Result<Value>>
            })),
            log: Vec::new(),
            metadata: Map::new(),
            state: TxState::Created,
        };
        tx.record("created");
        tx
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn source_class(&self) -> &str {
        &self.source_class
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    /// Ordered trace entries accumulated over the lifecycle.
    pub fn trace(&self) -> &[String] {
        &self.log
    }

    pub fn set_meta(&mut self, key: impl Into<String>, value: Value) {
        self.metadata.insert(key.into(), value);
    }

    pub fn meta(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    /// Append a timestamped trace entry.
    pub fn record(&mut self, entry: impl AsRef<str>) {
        self.log
            .push(format!("{} {}", Utc::now().to_rfc3339(), entry.as_ref()));
    }

    /// Merge a not-yet-fired transaction into this open one: trace logs are
    /// concatenated and the pending action is replaced by the nested one's.
    /// The bound transaction never fires on its own afterwards.
    pub fn bind(&mut self, mut nested: Transaction) {
        self.record(format!(
            "bound {} ({}.{})",
            nested.id, nested.source_class, nested.method
        ));
        self.log.append(&mut nested.log);
        self.action = nested.action.take();
    }

    pub(crate) fn take_action(&mut self) -> Result<TxAction> {
        self.action.take().ok_or_else(|| {
            HookError::Lock(format!("transaction {} has no pending action", self.id))
        })
    }

    pub(crate) fn mark_queued(&mut self) {
        self.state = TxState::Queued;
        self.record("queued");
    }

    pub(crate) fn mark_running(&mut self) {
        self.state = TxState::Running;
        self.record("fired");
    }

    pub(crate) fn mark_released(&mut self) {
        self.state = TxState::Released;
        self.record("released");
    }
}

impl std::fmt::Display for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}.{} [{}]",
            self.id, self.source_class, self.method, self.state
        )
    }
}
