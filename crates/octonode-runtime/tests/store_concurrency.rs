use std::sync::Arc;
use std::time::Duration;

use octonode_core::{Resource, ResourceKind, Version, WatchEventType};
use octonode_state::{InMemoryState, RetryPolicy, State, WatchOptions, update_with_retry};
use serde_json::{Value, json};

const OWNER: &str = "SeccompProfileController";

fn profiles() -> ResourceKind {
    ResourceKind::new("cri", "SeccompProfile")
}

#[tokio::test]
async fn concurrent_writers_at_same_version() {
    let state = Arc::new(InMemoryState::new());
    let identity = profiles().identity("audit.json");
    let created = state
        .create(
            Resource::new(identity.clone()).with_spec(json!({ "value": "LOG" })),
            OWNER,
        )
        .await
        .unwrap();
    let n = created.version();

    let first = state
        .update_spec(&identity, n, OWNER, json!({ "value": "ERRNO" }))
        .await
        .unwrap();
    assert_eq!(first.version(), Version(n.0 + 1));

    let second = state
        .update_spec(&identity, n, OWNER, json!({ "value": "KILL" }))
        .await
        .unwrap_err();
    assert!(second.is_conflict());

    // the loser re-reads and retries
    let retried = update_with_retry(
        state.as_ref(),
        &identity,
        OWNER,
        RetryPolicy::default(),
        |_| Ok(json!({ "value": "KILL" })),
    )
    .await
    .unwrap();
    assert_eq!(retried.version(), Version(n.0 + 2));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observers_see_strictly_increasing_versions() {
    let state = Arc::new(InMemoryState::new());
    let identity = profiles().identity("audit.json");
    state
        .create(
            Resource::new(identity.clone()).with_spec(json!({ "n": 0 })),
            OWNER,
        )
        .await
        .unwrap();

    let mut watch = state
        .watch(&profiles(), WatchOptions::default())
        .await
        .unwrap();

    let mut writers = Vec::new();
    for _ in 0..4 {
        let state = state.clone();
        let identity = identity.clone();
        writers.push(tokio::spawn(async move {
            for _ in 0..25 {
                update_with_retry(
                    state.as_ref(),
                    &identity,
                    OWNER,
                    RetryPolicy::new(1000).with_backoff(Duration::from_micros(100)),
                    |spec: &Value| Ok(json!({ "n": spec["n"].as_u64().unwrap_or(0) + 1 })),
                )
                .await
                .unwrap();
            }
        }));
    }
    for writer in writers {
        writer.await.unwrap();
    }

    let events = watch.drain();
    assert_eq!(events[0].event_type, WatchEventType::Created);
    let versions: Vec<u64> = events.iter().filter_map(|e| e.version()).map(|v| v.0).collect();
    assert_eq!(versions.len(), 101);
    assert!(versions.windows(2).all(|w| w[1] == w[0] + 1));

    let last = state.get(&identity).await.unwrap();
    assert_eq!(last.spec["n"], 100);
    assert_eq!(last.version(), Version(101));
}
