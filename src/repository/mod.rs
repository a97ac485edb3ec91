// ============================================================================
// Repository Base
// ============================================================================
//
// Generic CRUD repository that threads every operation through the hook
// executor: ON phase, storage call, AFTER phase. A repository built with
// `transactional()` routes each operation through the transaction lock as one
// unit of work; nested repository calls inside an open transaction ride it as
// continuations instead of competing for a second admission.
//
// ============================================================================

pub mod store;

pub use store::{MemoryStore, Storage};

use crate::context::Context;
use crate::core::{CrudVerb, HookError, OperationKey, Phase, Result};
use crate::executor::HookExecutor;
use crate::model::{DynamicModel, Model, ModelType};
use crate::transaction::{Transactional, TxHandle, TxLock, bind_to_transaction};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

/// Context extension key under which repositories expose their storage to
/// behaviors (e.g. a uniqueness check).
pub const STORAGE_PROBE: &str = "storage_probe";

/// Storage access handed to behaviors through the context extension slot.
pub struct StorageProbe {
    pub store: Arc<dyn Storage>,
    pub collection: String,
}

/// Generic repository over one model type.
#[derive(Clone)]
pub struct Repository {
    model_type: &'static ModelType,
    collection: String,
    store: Arc<dyn Storage>,
    executor: HookExecutor,
    lock: Option<Arc<TxLock>>,
    transaction: Option<TxHandle>,
}

impl Repository {
    pub fn new(model_type: &'static ModelType, store: Arc<dyn Storage>) -> Self {
        Self {
            model_type,
            collection: model_type.name.to_lowercase(),
            store,
            executor: HookExecutor::new(),
            lock: None,
            transaction: None,
        }
    }

    /// Use an explicit executor instead of one over the global registry.
    pub fn with_executor(mut self, executor: HookExecutor) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Serialize every operation of this repository through the given lock.
    pub fn transactional(mut self, lock: Arc<TxLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn model_type(&self) -> &'static ModelType {
        self.model_type
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub async fn create(&self, model: DynamicModel) -> Result<DynamicModel> {
        self.check_type(&model)?;
        self.transact("create", move |repo| repo.do_create(model)).await
    }

    pub async fn read(&self, id: &str) -> Result<DynamicModel> {
        let id = id.to_string();
        self.transact("read", move |repo| repo.do_read(id)).await
    }

    pub async fn update(&self, model: DynamicModel) -> Result<DynamicModel> {
        self.check_type(&model)?;
        self.transact("update", move |repo| repo.do_update(model)).await
    }

    /// Delete by id; resolves with the removed model.
    pub async fn delete(&self, id: &str) -> Result<DynamicModel> {
        let id = id.to_string();
        self.transact("delete", move |repo| repo.do_delete(id)).await
    }

    fn check_type(&self, model: &DynamicModel) -> Result<()> {
        if model.model_type().name != self.model_type.name {
            return Err(HookError::Consistency(format!(
                "repository for '{}' received a '{}' model",
                self.model_type.name,
                model.model_type().name
            )));
        }
        Ok(())
    }

    /// Route one operation through the transaction lock when configured.
    ///
    /// Inside an open transaction the nested call is submitted as a
    /// continuation carrying the open transaction's id; without a lock the
    /// work runs directly.
    async fn transact<F, Fut>(&self, method: &'static str, work: F) -> Result<DynamicModel>
    where
        F: FnOnce(Repository) -> Fut + Send + 'static,
        Fut: Future<Output = Result<DynamicModel>> + Send + 'static,
    {
        let model_type = self.model_type;
        match (&self.transaction, &self.lock) {
            (Some(handle), _) => {
                let repo = self.clone();
                let value = handle
                    .continue_with(model_type.name, method, move |h| async move {
                        work(repo.rebind(h)).await.map(|m| m.to_value())
                    })
                    .await?;
                DynamicModel::from_value(model_type, value)
            }
            (None, Some(lock)) => {
                let repo = self.clone();
                let value = lock
                    .run(model_type.name, method, move |h| async move {
                        work(bind_to_transaction(&repo, h)).await.map(|m| m.to_value())
                    })
                    .await?;
                DynamicModel::from_value(model_type, value)
            }
            (None, None) => work(self.clone()).await,
        }
    }

    /// Context for one logical operation, carrying the storage probe for
    /// behaviors that need to look at the collection.
    fn operation_context(&self, verb: CrudVerb) -> Result<Arc<Context>> {
        let ctx = Context::new().child(
            OperationKey::new(Phase::On, verb),
            self.model_type.name,
        );
        ctx.set_extension(
            STORAGE_PROBE,
            Arc::new(StorageProbe {
                store: Arc::clone(&self.store),
                collection: self.collection.clone(),
            }),
        )?;
        Ok(ctx)
    }

    async fn do_create(self, mut model: DynamicModel) -> Result<DynamicModel> {
        let ctx = self.operation_context(CrudVerb::Create)?;
        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Create, Phase::On, None)
            .await?;

        let id = model.id().ok_or_else(|| {
            HookError::Consistency(format!(
                "model '{}' has no id after the ON_CREATE phase",
                self.model_type.name
            ))
        })?;
        self.store
            .insert(&self.collection, &id, model.to_value())
            .await?;

        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Create, Phase::After, None)
            .await?;
        Ok(model)
    }

    async fn do_read(self, id: String) -> Result<DynamicModel> {
        let ctx = self.operation_context(CrudVerb::Read)?;

        // ON_READ runs before the record exists in memory; behaviors see a
        // shell carrying only the requested id.
        let mut shell = DynamicModel::new(self.model_type).with("id", Value::String(id.clone()));
        self.executor
            .enforce(&ctx, &mut shell, CrudVerb::Read, Phase::On, None)
            .await?;

        let record = self
            .store
            .fetch(&self.collection, &id)
            .await?
            .ok_or_else(|| HookError::NotFound(id.clone(), self.collection.clone()))?;
        let mut model = DynamicModel::from_value(self.model_type, record)?;

        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Read, Phase::After, None)
            .await?;
        Ok(model)
    }

    async fn do_update(self, mut model: DynamicModel) -> Result<DynamicModel> {
        let id = model.id().ok_or_else(|| {
            HookError::Consistency(format!(
                "cannot update a '{}' model without an id",
                self.model_type.name
            ))
        })?;

        let previous_record = self
            .store
            .fetch(&self.collection, &id)
            .await?
            .ok_or_else(|| HookError::NotFound(id.clone(), self.collection.clone()))?;
        let previous = DynamicModel::from_value(self.model_type, previous_record)?;

        let ctx = self.operation_context(CrudVerb::Update)?;
        self.executor
            .enforce(
                &ctx,
                &mut model,
                CrudVerb::Update,
                Phase::On,
                Some(&previous as &dyn Model),
            )
            .await?;

        self.store
            .update(&self.collection, &id, model.to_value())
            .await?;

        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Update, Phase::After, None)
            .await?;
        Ok(model)
    }

    async fn do_delete(self, id: String) -> Result<DynamicModel> {
        let record = self
            .store
            .fetch(&self.collection, &id)
            .await?
            .ok_or_else(|| HookError::NotFound(id.clone(), self.collection.clone()))?;
        let mut model = DynamicModel::from_value(self.model_type, record)?;

        let ctx = self.operation_context(CrudVerb::Delete)?;
        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Delete, Phase::On, None)
            .await?;

        self.store.remove(&self.collection, &id).await?;

        self.executor
            .enforce(&ctx, &mut model, CrudVerb::Delete, Phase::After, None)
            .await?;
        Ok(model)
    }
}

impl Transactional for Repository {
    fn current_transaction(&self) -> Option<&TxHandle> {
        self.transaction.as_ref()
    }

    fn rebind(&self, tx: TxHandle) -> Self {
        let mut bound = self.clone();
        bound.transaction = Some(tx);
        bound
    }
}
