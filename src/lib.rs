// ============================================================================
// ModelHooks Library
// ============================================================================
//
// A generic CRUD lifecycle-hook engine: model classes declare per-property
// behaviors that run automatically before (ON) or after (AFTER) a
// Create/Read/Update/Delete operation. The engine resolves the effective
// behavior set over the class inheritance chain, orders it globally by
// explicit priority, and executes it as a sequential asynchronous pipeline.
// A transaction admission lock serializes logical units of work around
// repository calls.
//
// ============================================================================

pub mod annotation;
pub mod behaviors;
pub mod context;
pub mod core;
pub mod executor;
pub mod model;
pub mod registry;
pub mod repository;
pub mod transaction;

// Re-export main types for convenience
pub use crate::core::{CrudVerb, HookError, OperationKey, OrderingHints, Phase, Result};

pub use annotation::Annotation;
pub use context::Context;
pub use executor::{Behavior, HookExecutor, Invocation, ResolvedPlan};
pub use model::{DynamicModel, Model, ModelType};
pub use registry::{BehaviorDescriptor, OperationRegistry};
pub use repository::{MemoryStore, Repository, Storage};
pub use transaction::{
    Transaction, TransactionId, Transactional, TxHandle, TxLock, TxState, TxStats,
    bind_to_transaction,
};
