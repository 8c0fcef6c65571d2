mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use common::{SETTLE, audit, deny, put_machine_config};
use octonode_core::{Resource, ResourceKind};
use octonode_runtime::controllers::seccomp::{
    CONTROLLER_NAME, seccomp_profile_controller, seccomp_profile_kind,
};
use octonode_runtime::{ControllerState, Runtime, RuntimeConfig, RuntimeError};
use octonode_state::{DynState, InMemoryState, State, StateError};
use parking_lot::Mutex;
use serde_json::json;

fn kind(t: &str) -> ResourceKind {
    ResourceKind::new("test", t)
}

fn new_runtime(config: RuntimeConfig) -> (DynState, Runtime) {
    let state: DynState = Arc::new(InMemoryState::new());
    let runtime = Runtime::new(state.clone(), config);
    (state, runtime)
}

async fn explode(_: ControllerState) -> Result<(), RuntimeError> {
    panic!("reconcile exploded")
}

/// Keeps a single resource holding the number of seccomp profiles.
async fn count_profiles(ctx: ControllerState) -> Result<(), RuntimeError> {
    let count = ctx.list(&seccomp_profile_kind()).await?.len();
    let identity = kind("ProfileCounts").identity("total");
    match ctx.get(&identity).await {
        Ok(_) => {
            ctx.update_with_retry(&identity, |_| Ok(json!({ "count": count })))
                .await?;
        }
        Err(e) if e.is_not_found() => {
            ctx.create(Resource::new(identity).with_spec(json!({ "count": count })))
                .await?;
        }
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

#[tokio::test]
async fn failing_pass_is_retried_with_backoff() {
    let (_, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    let calls = Arc::new(AtomicU32::new(0));
    let seen = calls.clone();
    runtime
        .register_fn("Flaky", vec![kind("Inputs")], None, move |_| {
            let seen = seen.clone();
            async move {
                if seen.fetch_add(1, Ordering::SeqCst) < 2 {
                    return Err(RuntimeError::controller("Flaky", "not yet"));
                }
                Ok(())
            }
        })
        .unwrap();
    runtime.start().await.unwrap();

    // settle covers pending retries, so it returns only after the third pass
    runtime.settle(SETTLE).await.expect("settle");
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    let stats = runtime.stats("Flaky").unwrap();
    assert_eq!(stats.passes, 3);
    assert_eq!(stats.failures, 2);
    assert_eq!(stats.consecutive_failures, 0);
    assert_eq!(stats.last_error.as_deref(), Some("Controller 'Flaky' failed: not yet"));
    assert!(stats.last_success.is_some());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn panicking_controller_does_not_affect_others() {
    let (state, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    runtime.register(seccomp_profile_controller()).unwrap();
    runtime
        .register_fn(
            "Exploding",
            vec![seccomp_profile_kind()],
            Some(kind("Reports")),
            explode,
        )
        .unwrap();
    runtime.start().await.unwrap();

    put_machine_config(&state, &[audit(), deny()]).await;
    // the exploding controller retries forever, so wait on the healthy one
    let err = runtime.settle(Duration::from_millis(300)).await.unwrap_err();
    assert!(matches!(err, RuntimeError::SettleTimeout(_)));

    assert_eq!(state.list(&seccomp_profile_kind()).await.unwrap().len(), 2);
    let healthy = runtime.stats(CONTROLLER_NAME).unwrap();
    assert_eq!(healthy.failures, 0);

    let exploding = runtime.stats("Exploding").unwrap();
    assert!(exploding.failures >= 1);
    assert!(
        exploding
            .last_error
            .unwrap()
            .contains("panicked: reconcile exploded")
    );

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn slow_pass_times_out() {
    let mut config = RuntimeConfig::for_testing();
    config.runtime.reconcile_timeout_ms = 20;
    let (_, mut runtime) = new_runtime(config);
    runtime
        .register_fn("Slow", vec![], None, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .unwrap();
    runtime.start().await.unwrap();

    let _ = runtime.settle(Duration::from_millis(200)).await;
    let stats = runtime.stats("Slow").unwrap();
    assert!(stats.failures >= 1);
    assert!(stats.last_error.unwrap().contains("exceeded"));

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn writes_outside_output_kind_are_rejected() {
    let (state, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    runtime.register(seccomp_profile_controller()).unwrap();

    let outcome: Arc<Mutex<Option<StateError>>> = Arc::default();
    let slot = outcome.clone();
    runtime
        .register_fn("Intruder", vec![kind("Triggers")], None, move |ctx| {
            let slot = slot.clone();
            async move {
                let resource = Resource::new(seccomp_profile_kind().identity("rogue.json"))
                    .with_spec(json!({}));
                if let Err(e) = ctx.create(resource).await {
                    *slot.lock() = Some(e);
                }
                Ok(())
            }
        })
        .unwrap();
    runtime.start().await.unwrap();
    runtime.settle(SETTLE).await.expect("settle");

    match outcome.lock().take() {
        Some(StateError::OwnershipViolation { owner, writer, .. }) => {
            assert_eq!(owner, CONTROLLER_NAME);
            assert_eq!(writer, "Intruder");
        }
        other => panic!("expected ownership violation, got {other:?}"),
    }
    let err = state
        .get(&seccomp_profile_kind().identity("rogue.json"))
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    runtime.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_cancels_in_flight_work() {
    let (_, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    let captured: Arc<Mutex<Option<ControllerState>>> = Arc::default();
    let slot = captured.clone();
    runtime
        .register_fn("Sleeper", vec![], Some(kind("Outputs")), move |ctx| {
            let slot = slot.clone();
            async move {
                *slot.lock() = Some(ctx.clone());
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            }
        })
        .unwrap();
    runtime.start().await.unwrap();

    // wait for the pass to begin
    for _ in 0..100 {
        if captured.lock().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    tokio::time::timeout(Duration::from_secs(2), runtime.shutdown())
        .await
        .expect("shutdown returns promptly")
        .unwrap();

    let ctx = captured.lock().clone().expect("pass started");
    assert!(ctx.is_cancelled());
    let err = ctx
        .create(Resource::new(kind("Outputs").identity("late")))
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert!(matches!(runtime.shutdown().await, Ok(())));
}

#[tokio::test]
async fn each_output_kind_has_one_owner() {
    let (_, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    runtime.register(seccomp_profile_controller()).unwrap();
    let err = runtime
        .register_fn("Shadow", vec![], Some(seccomp_profile_kind()), |_| async {
            Ok(())
        })
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Registration(_)));
}

#[tokio::test]
async fn chained_controllers_converge() {
    let (state, mut runtime) = new_runtime(RuntimeConfig::for_testing());
    runtime.register(seccomp_profile_controller()).unwrap();
    runtime
        .register_fn(
            "ProfileCounter",
            vec![seccomp_profile_kind()],
            Some(kind("ProfileCounts")),
            count_profiles,
        )
        .unwrap();
    runtime.start().await.unwrap();

    put_machine_config(&state, &[audit(), deny()]).await;
    runtime.settle(SETTLE).await.expect("settle");
    let total = state
        .get(&kind("ProfileCounts").identity("total"))
        .await
        .unwrap();
    assert_eq!(total.spec["count"], 2);

    put_machine_config(&state, &[deny()]).await;
    runtime.settle(SETTLE).await.expect("settle");
    let total = state
        .get(&kind("ProfileCounts").identity("total"))
        .await
        .unwrap();
    assert_eq!(total.spec["count"], 1);

    runtime.shutdown().await.unwrap();
}
