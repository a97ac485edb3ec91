/// Registry resolution tests
///
/// Inheritance-chain resolution: ancestor-first ordering, argument override
/// without duplication, idempotent registration, and global replacement.
/// Run with: cargo test --test registry_resolution_tests

use async_trait::async_trait;
use modelhooks::annotation::Annotation;
use modelhooks::context::Context;
use modelhooks::core::{CrudVerb, OperationKey, Phase};
use modelhooks::executor::{Behavior, HookExecutor, Invocation};
use modelhooks::model::{DynamicModel, ModelType};
use modelhooks::registry::OperationRegistry;
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

static ENTITY: ModelType = ModelType::root("Entity");
static USER: ModelType = ModelType::extends("User", &ENTITY);
static ADMIN: ModelType = ModelType::extends("Admin", &USER);

/// Records each invocation (identity, property, args) into a shared list.
struct Recorder {
    identity: &'static str,
    seen: Arc<Mutex<Vec<(String, String, Vec<Value>)>>>,
}

#[async_trait]
impl Behavior for Recorder {
    fn identity(&self) -> &'static str {
        self.identity
    }

    async fn invoke(&self, _ctx: &Context, call: Invocation<'_>) -> anyhow::Result<()> {
        self.seen.lock().unwrap().push((
            self.identity.to_string(),
            call.property.to_string(),
            call.args.to_vec(),
        ));
        Ok(())
    }
}

fn recorder(
    registry: &Arc<OperationRegistry>,
    identity: &'static str,
) -> Arc<Mutex<Vec<(String, String, Vec<Value>)>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    registry
        .register_handler(Arc::new(Recorder {
            identity,
            seen: Arc::clone(&seen),
        }))
        .unwrap();
    seen
}

#[test]
fn ancestor_declared_behaviors_resolve_first() {
    let registry = Arc::new(OperationRegistry::new());

    // Declared derived-first on purpose; resolution order must not care.
    Annotation::new("sub_guard")
        .operations("ON_CREATE")
        .apply_with(&registry, &USER, "name")
        .unwrap();
    Annotation::new("base_guard")
        .operations("ON_CREATE")
        .apply_with(&registry, &ENTITY, "name")
        .unwrap();

    let key = OperationKey::new(Phase::On, CrudVerb::Create);
    let resolved = registry.resolve(&USER, "name", key).unwrap();

    let identities: Vec<&str> = resolved
        .iter()
        .map(|d| d.handler_identity.as_str())
        .collect();
    assert_eq!(identities, vec!["base_guard", "sub_guard"]);
}

#[test]
fn resolution_skips_levels_without_entries() {
    let registry = Arc::new(OperationRegistry::new());

    // Only the root declares; the two derived levels contribute nothing.
    Annotation::new("base_guard")
        .operations("ON_DELETE")
        .apply_with(&registry, &ENTITY, "name")
        .unwrap();

    let key = OperationKey::new(Phase::On, CrudVerb::Delete);
    let resolved = registry.resolve(&ADMIN, "name", key).unwrap();
    assert_eq!(resolved.len(), 1);
    assert_eq!(resolved[0].declaring_class, "Entity");
}

#[tokio::test]
async fn rederived_args_override_without_duplication() {
    let registry = Arc::new(OperationRegistry::new());
    let seen = recorder(&registry, "validator");

    Annotation::new("validator")
        .operations("ON_CREATE")
        .arg(json!({ "max": 1 }))
        .apply_with(&registry, &ENTITY, "name")
        .unwrap();
    Annotation::new("validator")
        .operations("ON_CREATE")
        .arg(json!({ "max": 2 }))
        .apply_with(&registry, &USER, "name")
        .unwrap();

    let key = OperationKey::new(Phase::On, CrudVerb::Create);
    let resolved = registry.resolve(&USER, "name", key).unwrap();
    assert_eq!(resolved.len(), 1, "re-declaration must not duplicate");
    assert_eq!(resolved[0].static_args, vec![json!({ "max": 2 })]);
    assert_eq!(resolved[0].declaring_class, "User");

    // Exactly one invocation per operation, with the subclass args.
    let executor = HookExecutor::with_registry(Arc::clone(&registry));
    let ctx = Context::new();
    let mut model = DynamicModel::new(&USER).with("name", json!("Ada"));
    executor
        .enforce(&ctx, &mut model, CrudVerb::Create, Phase::On, None)
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].2, vec![json!({ "max": 2 })]);
}

#[tokio::test]
async fn duplicate_registration_is_idempotent() {
    let registry = Arc::new(OperationRegistry::new());
    let seen = recorder(&registry, "stamp");

    let annotation = Annotation::new("stamp").operations("ON_CREATE");
    assert!(
        annotation
            .clone()
            .apply_with(&registry, &USER, "created_at")
            .is_ok()
    );
    // A decorator factory evaluated twice registers twice; only one survives.
    annotation.apply_with(&registry, &USER, "created_at").unwrap();

    let key = OperationKey::new(Phase::On, CrudVerb::Create);
    assert_eq!(registry.resolve(&USER, "created_at", key).unwrap().len(), 1);

    let executor = HookExecutor::with_registry(Arc::clone(&registry));
    let ctx = Context::new();
    let mut model = DynamicModel::new(&USER);
    executor
        .enforce(&ctx, &mut model, CrudVerb::Create, Phase::On, None)
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn same_identity_under_different_operation_is_a_separate_entry() {
    let registry = Arc::new(OperationRegistry::new());

    Annotation::new("stamp")
        .operations("ON_CREATE")
        .arg(json!("create"))
        .apply_with(&registry, &USER, "touched_at")
        .unwrap();
    Annotation::new("stamp")
        .operations("ON_UPDATE")
        .arg(json!("update"))
        .apply_with(&registry, &USER, "touched_at")
        .unwrap();

    let on_create = registry
        .resolve(&USER, "touched_at", OperationKey::new(Phase::On, CrudVerb::Create))
        .unwrap();
    let on_update = registry
        .resolve(&USER, "touched_at", OperationKey::new(Phase::On, CrudVerb::Update))
        .unwrap();

    assert_eq!(on_create.len(), 1);
    assert_eq!(on_update.len(), 1);
    assert_eq!(on_create[0].static_args, vec![json!("create")]);
    assert_eq!(on_update[0].static_args, vec![json!("update")]);
}

#[test]
fn pattern_declaration_expands_to_each_key() {
    let registry = Arc::new(OperationRegistry::new());

    Annotation::new("stamp")
        .operations("(ON|AFTER)_UPDATE")
        .apply_with(&registry, &USER, "updated_at")
        .unwrap();

    for phase in [Phase::On, Phase::After] {
        let resolved = registry
            .resolve(&USER, "updated_at", OperationKey::new(phase, CrudVerb::Update))
            .unwrap();
        assert_eq!(resolved.len(), 1);
    }
    assert!(
        registry
            .resolve(&USER, "updated_at", OperationKey::new(Phase::On, CrudVerb::Create))
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn replacing_the_global_registry_does_not_affect_held_handles() {
    let first = Arc::new(OperationRegistry::new());
    OperationRegistry::set_global(Arc::clone(&first));

    let seen = recorder(&first, "global_probe");
    Annotation::new("global_probe")
        .operations("ON_CREATE")
        .apply(&USER, "name")
        .unwrap();

    // An executor built now keeps resolving against the first registry even
    // after a replacement.
    let executor = HookExecutor::new();
    OperationRegistry::set_global(Arc::new(OperationRegistry::new()));

    let ctx = Context::new();
    let mut model = DynamicModel::new(&USER);
    executor
        .enforce(&ctx, &mut model, CrudVerb::Create, Phase::On, None)
        .await
        .unwrap();
    assert_eq!(seen.lock().unwrap().len(), 1);

    // A fresh executor sees the replacement: nothing registered.
    let fresh = HookExecutor::new();
    let plan = fresh
        .plan(&USER, OperationKey::new(Phase::On, CrudVerb::Create))
        .unwrap();
    assert!(plan.is_empty());
}
