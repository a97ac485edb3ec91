/// Transaction lock tests
///
/// Admission, queueing, continuation of nested calls, bind semantics, and the
/// release invariant (advance the queue XOR restore capacity).
/// Run with: cargo test --test transaction_lock_tests

use modelhooks::core::HookError;
use modelhooks::transaction::{
    Transaction, TransactionId, Transactional, TxHandle, TxLock, TxState, bind_to_transaction,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;

#[test]
fn transaction_ids_are_monotonic() {
    let a = TransactionId::new();
    let b = TransactionId::new();
    assert!(b.as_u64() > a.as_u64());
    assert_eq!(format!("{a}"), format!("tx_{}", a.as_u64()));
}

#[test]
fn transaction_carries_metadata_and_trace() {
    let mut tx = Transaction::new("UserRepo", "create", |_h| async { Ok(json!(null)) });
    tx.set_meta("attempt", json!(1));

    assert_eq!(tx.meta("attempt"), Some(&json!(1)));
    assert_eq!(tx.state(), TxState::Created);
    assert!(!tx.state().is_terminal());
    assert_eq!(tx.source_class(), "UserRepo");
    assert_eq!(tx.method(), "create");
    assert!(tx.trace()[0].contains("created"));
}

#[tokio::test]
async fn admitted_transaction_runs_and_restores_capacity() {
    let lock = Arc::new(TxLock::new(1));

    let result = lock
        .run("UserRepo", "create", |_h| async { Ok(json!("done")) })
        .await
        .unwrap();
    assert_eq!(result, json!("done"));

    let stats = lock.stats().await;
    assert_eq!(stats.admission_counter, 1);
    assert_eq!(stats.pending, 0);
    assert!(stats.current.is_none());
    assert_eq!(stats.admissions, 1);
}

#[tokio::test]
async fn nested_transactional_call_is_a_continuation() {
    let lock = Arc::new(TxLock::new(1));

    let result = lock
        .run("OrderRepo", "create", move |handle| async move {
            let nested = handle
                .continue_with("AuditRepo", "create", |_h| async { Ok(json!("audit")) })
                .await?;
            Ok(json!({ "nested": nested }))
        })
        .await
        .unwrap();

    assert_eq!(result, json!({ "nested": "audit" }));

    // One admission cycle for the whole chain, not two.
    let stats = lock.stats().await;
    assert_eq!(stats.admissions, 1);
    assert_eq!(stats.admission_counter, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn queued_transactions_fire_one_at_a_time_in_submission_order() {
    let lock = Arc::new(TxLock::new(1));
    let events: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..3 {
        let lock = Arc::clone(&lock);
        let events = Arc::clone(&events);
        handles.push(tokio::spawn(async move {
            lock.run("JobRepo", "enqueue", move |_h| async move {
                events.lock().unwrap().push(format!("start {i}"));
                tokio::time::sleep(Duration::from_millis(30)).await;
                events.lock().unwrap().push(format!("end {i}"));
                Ok(json!(i))
            })
            .await
        }));
        // Let each submission reach the lock before the next one.
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for (i, handle) in handles.into_iter().enumerate() {
        assert_eq!(handle.await.unwrap().unwrap(), json!(i));
    }

    assert_eq!(
        *events.lock().unwrap(),
        vec!["start 0", "end 0", "start 1", "end 1", "start 2", "end 2"]
    );

    let stats = lock.stats().await;
    assert_eq!(stats.admission_counter, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn release_advances_queue_xor_restores_capacity() {
    let lock = Arc::new(TxLock::new(1));
    let (t1_go, t1_gate) = oneshot::channel::<()>();
    let (t2_go, t2_gate) = oneshot::channel::<()>();

    let l1 = Arc::clone(&lock);
    let h1 = tokio::spawn(async move {
        l1.run("Repo", "first", move |_h| async move {
            t1_gate.await.ok();
            Ok(json!(1))
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let running = lock.stats().await;
    assert_eq!(running.admission_counter, 0);
    assert!(running.current.is_some());

    let l2 = Arc::clone(&lock);
    let h2 = tokio::spawn(async move {
        l2.run("Repo", "second", move |_h| async move {
            t2_gate.await.ok();
            Ok(json!(2))
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let queued = lock.stats().await;
    assert_eq!(queued.pending, 1);
    assert_eq!(queued.admission_counter, 0);

    // First release: the queue advances, capacity is NOT restored.
    t1_go.send(()).unwrap();
    h1.await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;

    let advanced = lock.stats().await;
    assert_eq!(advanced.pending, 0);
    assert_eq!(advanced.admission_counter, 0);
    assert!(advanced.current.is_some());

    // Second release: the queue is empty, capacity is restored.
    t2_go.send(()).unwrap();
    h2.await.unwrap().unwrap();

    let drained = lock.stats().await;
    assert_eq!(drained.pending, 0);
    assert_eq!(drained.admission_counter, 1);
    assert!(drained.current.is_none());
}

#[tokio::test]
async fn failed_action_still_releases_and_queued_work_proceeds() {
    let lock = Arc::new(TxLock::new(1));
    let (t1_go, t1_gate) = oneshot::channel::<()>();

    let l1 = Arc::clone(&lock);
    let h1 = tokio::spawn(async move {
        l1.run("Repo", "doomed", move |_h| async move {
            t1_gate.await.ok();
            Err(HookError::Consistency("boom".to_string()))
        })
        .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    let l2 = Arc::clone(&lock);
    let h2 = tokio::spawn(async move {
        l2.run("Repo", "survivor", |_h| async { Ok(json!("fine")) })
            .await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;

    t1_go.send(()).unwrap();
    let err = h1.await.unwrap().unwrap_err();
    assert!(matches!(err, HookError::Consistency(_)));

    // The queued transaction is unaffected by the failure ahead of it.
    assert_eq!(h2.await.unwrap().unwrap(), json!("fine"));

    let stats = lock.stats().await;
    assert_eq!(stats.admission_counter, 1);
    assert_eq!(stats.pending, 0);
}

#[tokio::test]
async fn hooks_observe_fire_and_release_without_blocking_them() {
    let fired: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let released: Arc<Mutex<Vec<bool>>> = Arc::new(Mutex::new(Vec::new()));

    let fired_clone = Arc::clone(&fired);
    let released_clone = Arc::clone(&released);
    let lock = Arc::new(
        TxLock::new(1)
            .with_pre_fire(move |tx| {
                fired_clone
                    .lock()
                    .unwrap()
                    .push(format!("{}.{}", tx.source_class(), tx.method()));
                Ok(())
            })
            .with_post_release(move |error| {
                released_clone.lock().unwrap().push(error.is_some());
                // A failing post-release hook is logged, never propagated.
                anyhow::bail!("hook exploded")
            }),
    );

    lock.run("UserRepo", "create", |_h| async { Ok(json!(1)) })
        .await
        .unwrap();
    let err = lock
        .run("UserRepo", "update", |_h| async {
            Err(HookError::Consistency("no".to_string()))
        })
        .await
        .unwrap_err();
    assert!(matches!(err, HookError::Consistency(_)));

    assert_eq!(
        *fired.lock().unwrap(),
        vec!["UserRepo.create", "UserRepo.update"]
    );
    assert_eq!(*released.lock().unwrap(), vec![false, true]);

    // The failing post-release hook did not eat the capacity.
    let stats = lock.stats().await;
    assert_eq!(stats.admission_counter, 1);
}

#[tokio::test]
async fn bind_merges_pending_action_into_open_transaction() {
    let mut host = Transaction::new("UserRepo", "save", |_h| async { Ok(json!("host")) });
    let nested = Transaction::new("AuditRepo", "append", |_h| async { Ok(json!("nested")) });

    host.bind(nested);
    assert!(host.trace().iter().any(|entry| entry.contains("bound")));

    // The host now carries the nested unit of work.
    let lock = Arc::new(TxLock::new(1));
    let result = lock.submit(host).await.unwrap();
    assert_eq!(result, json!("nested"));
}

#[derive(Clone)]
struct Service {
    tx: Option<TxHandle>,
}

impl Transactional for Service {
    fn current_transaction(&self) -> Option<&TxHandle> {
        self.tx.as_ref()
    }

    fn rebind(&self, tx: TxHandle) -> Self {
        Service { tx: Some(tx) }
    }
}

#[tokio::test]
async fn bound_view_rides_the_open_transaction() {
    let lock = Arc::new(TxLock::new(1));
    let service = Service { tx: None };
    assert!(service.current_transaction().is_none());

    let result = lock
        .run("Service", "outer", move |handle| async move {
            let bound = bind_to_transaction(&service, handle.clone());
            let open = bound.current_transaction().unwrap();
            assert_eq!(open.id(), handle.id());

            open.continue_with("Service", "inner", |_h| async { Ok(json!(7)) })
                .await
        })
        .await
        .unwrap();

    assert_eq!(result, json!(7));
    assert_eq!(lock.stats().await.admissions, 1);
}

#[tokio::test]
async fn global_lock_is_replaceable() {
    let fresh = Arc::new(TxLock::new(2));
    TxLock::set_global(Arc::clone(&fresh));
    assert!(Arc::ptr_eq(&TxLock::global(), &fresh));
    assert_eq!(TxLock::global().stats().await.admission_counter, 2);
}
