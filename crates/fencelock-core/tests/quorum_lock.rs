//! Quorum lock manager tests against in-memory storage nodes

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

use fencelock_core::{
    AcquireRequest, LockState, LockStrategy, MemoryBackend, QuorumConfig, QuorumLockManager,
    StorageBackend, run_locked,
};

fn nodes(count: usize) -> Vec<Arc<MemoryBackend>> {
    (0..count)
        .map(|i| Arc::new(MemoryBackend::new(format!("node-{}", i))))
        .collect()
}

fn manager(nodes: &[Arc<MemoryBackend>], config: QuorumConfig) -> QuorumLockManager {
    let backends = nodes
        .iter()
        .map(|node| node.clone() as Arc<dyn StorageBackend>)
        .collect();
    QuorumLockManager::new(backends, config).unwrap()
}

fn fast_retry(resource: &str) -> AcquireRequest {
    AcquireRequest::new(resource).with_retry(1, Duration::from_millis(10))
}

#[tokio::test]
async fn test_acquire_with_one_node_down() {
    let nodes = nodes(3);
    nodes[2].set_available(false);
    let manager = manager(&nodes, QuorumConfig::default());

    let ttl = Duration::from_millis(1000);
    let handle = manager
        .acquire(&AcquireRequest::new("orders").with_ttl(ttl))
        .await
        .unwrap()
        .into_handle()
        .expect("two of three nodes form a quorum");

    assert!(handle.is_held());
    assert!(handle.validity().unwrap() < ttl);
    assert!(handle.remaining_validity().unwrap() < ttl);
    assert_eq!(nodes[0].get("orders").as_deref(), Some(handle.token()));
    assert_eq!(nodes[1].get("orders").as_deref(), Some(handle.token()));
}

#[tokio::test]
async fn test_minority_acceptance_is_cleaned_up() {
    let nodes = nodes(3);
    nodes[1].set_available(false);
    nodes[2].set_available(false);
    let manager = manager(&nodes, QuorumConfig::default());

    let outcome = manager.acquire(&fast_retry("orders")).await.unwrap();

    assert!(!outcome.is_held());
    assert_eq!(nodes[0].get("orders"), None);
    assert!(nodes[0].compare_and_delete_calls() >= 1);
    // One initial attempt plus one retry
    assert_eq!(nodes[0].set_if_absent_calls(), 2);
}

#[tokio::test]
async fn test_contended_lock_not_acquired() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let first = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    let second = manager.acquire(&fast_retry("orders")).await.unwrap();
    assert!(!second.is_held());

    // The loser's cleanup must not touch the holder's keys
    for node in &nodes {
        assert_eq!(node.get("orders").as_deref(), Some(first.token()));
    }
}

#[tokio::test]
async fn test_release_then_reacquire() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let handle = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();
    assert!(manager.release(&handle).await.unwrap());
    assert_eq!(handle.state(), LockState::Released);
    for node in &nodes {
        assert_eq!(node.get("orders"), None);
    }

    let again = manager
        .acquire(&AcquireRequest::new("orders").with_retry(0, Duration::ZERO))
        .await
        .unwrap();
    assert!(again.is_held());
}

#[tokio::test]
async fn test_double_release_is_noop() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let handle = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    assert!(manager.release(&handle).await.unwrap());
    assert!(!manager.release(&handle).await.unwrap());
    assert_eq!(handle.state(), LockState::Released);
}

#[tokio::test]
async fn test_stale_release_keeps_new_holder() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let stale = manager
        .acquire(&AcquireRequest::new("orders").with_ttl(Duration::from_millis(50)))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(stale.state(), LockState::Expired);

    let current = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    assert!(!manager.release(&stale).await.unwrap());
    assert_eq!(stale.state(), LockState::Expired);
    for node in &nodes {
        assert_eq!(node.get("orders").as_deref(), Some(current.token()));
    }
    assert!(current.is_held());
}

#[tokio::test]
async fn test_fencing_tokens_strictly_increase() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let mut previous = 0;
    for _ in 0..5 {
        let handle = manager
            .acquire(&AcquireRequest::new("orders"))
            .await
            .unwrap()
            .into_handle()
            .unwrap();
        let token = handle.fencing_token().unwrap();
        assert!(token > previous);
        previous = token;
        manager.release(&handle).await.unwrap();
    }
    assert_eq!(previous, 5);
    assert_eq!(nodes[0].increment_calls(), 5);
}

#[tokio::test]
async fn test_fencing_unavailable_when_canonical_node_down() {
    let nodes = nodes(3);
    nodes[0].set_available(false);
    let manager = manager(&nodes, QuorumConfig::default());

    let handle = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .expect("quorum is still reachable");

    assert!(handle.is_held());
    assert_eq!(handle.fencing_token(), None);
    assert_eq!(nodes[1].counter("orders:fencing"), None);
}

#[tokio::test]
async fn test_slow_node_bounded_by_call_timeout() {
    let nodes = nodes(3);
    nodes[2].set_latency(Duration::from_secs(5));
    let config = QuorumConfig {
        call_timeout: Duration::from_millis(100),
        ..Default::default()
    };
    let manager = manager(&nodes, config);

    let started = Instant::now();
    let handle = manager
        .acquire(&AcquireRequest::new("orders").with_ttl(Duration::from_secs(2)))
        .await
        .unwrap()
        .into_handle()
        .expect("two fast nodes form a quorum");

    assert!(started.elapsed() < Duration::from_secs(1));
    // The slow node's time counts against validity
    assert!(handle.validity().unwrap() <= Duration::from_millis(1900));
    assert_eq!(nodes[2].get("orders"), None);
}

#[tokio::test]
async fn test_wait_deadline_interrupts_attempt() {
    let nodes = nodes(3);
    for node in &nodes {
        node.set_latency(Duration::from_millis(300));
    }
    let config = QuorumConfig {
        call_timeout: Duration::from_secs(1),
        ..Default::default()
    };
    let manager = manager(&nodes, config);

    let started = Instant::now();
    let outcome = manager
        .acquire(&AcquireRequest::new("orders").with_wait(Duration::from_millis(50)))
        .await
        .unwrap();

    assert!(!outcome.is_held());
    assert!(started.elapsed() < Duration::from_millis(250));

    // Cleanup of the interrupted attempt runs in the background
    tokio::time::sleep(Duration::from_millis(50)).await;
    for node in &nodes {
        assert_eq!(node.compare_and_delete_calls(), 1);
        assert_eq!(node.get("orders"), None);
    }
}

#[tokio::test]
async fn test_run_locked_releases_afterwards() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let token = run_locked(&manager, &AcquireRequest::new("orders"), |handle| async move {
        assert!(handle.is_held());
        handle.fencing_token()
    })
    .await
    .unwrap();

    assert_eq!(token, Some(Some(1)));
    for node in &nodes {
        assert_eq!(node.get("orders"), None);
    }
}

#[tokio::test]
async fn test_run_locked_skips_when_contended() {
    let nodes = nodes(1);
    let manager = manager(&nodes, QuorumConfig::default());
    let _held = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    let ran = run_locked(&manager, &fast_retry("orders"), |_| async { true })
        .await
        .unwrap();
    assert_eq!(ran, None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_contention() {
    let nodes = nodes(3);
    let manager = Arc::new(manager(&nodes, QuorumConfig::default()));
    let in_section = Arc::new(AtomicBool::new(false));
    let entered = Arc::new(AtomicUsize::new(0));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = manager.clone();
        let in_section = in_section.clone();
        let entered = entered.clone();
        tasks.push(tokio::spawn(async move {
            let request = AcquireRequest::new("orders").with_retry(200, Duration::from_millis(5));
            run_locked(manager.as_ref(), &request, move |_| async move {
                assert!(
                    !in_section.swap(true, Ordering::SeqCst),
                    "two holders inside the critical section"
                );
                tokio::time::sleep(Duration::from_millis(2)).await;
                in_section.store(false, Ordering::SeqCst);
                entered.fetch_add(1, Ordering::SeqCst);
            })
            .await
        }));
    }

    for task in tasks {
        assert!(task.await.unwrap().unwrap().is_some());
    }
    assert_eq!(entered.load(Ordering::SeqCst), 16);
}

#[tokio::test]
async fn test_unbounded_wait_acquires() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let handle = manager
        .acquire(&AcquireRequest::new("orders").with_wait(Duration::MAX))
        .await
        .unwrap()
        .into_handle()
        .expect("an unbounded wait still acquires a free lock");
    assert!(handle.is_held());
    assert!(manager.release(&handle).await.unwrap());
}

#[tokio::test]
async fn test_oversized_ttl_rejected() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let request = AcquireRequest::new("orders").with_ttl(Duration::from_secs(u64::MAX / 2));
    assert!(matches!(
        manager.acquire(&request).await,
        Err(fencelock_core::LockError::IllegalArgument(_))
    ));
    assert_eq!(nodes[0].set_if_absent_calls(), 0);
}

#[tokio::test]
async fn test_huge_backoff_capped_by_wait() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());
    let holder = manager
        .acquire(&AcquireRequest::new("orders"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();

    let started = Instant::now();
    let request = AcquireRequest::new("orders")
        .with_retry(5, Duration::MAX)
        .with_wait(Duration::from_millis(50));
    let outcome = manager.acquire(&request).await.unwrap();

    assert!(!outcome.is_held());
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(holder.is_held());
}

#[tokio::test]
async fn test_opaque_resource_name() {
    let nodes = nodes(3);
    let manager = manager(&nodes, QuorumConfig::default());

    let handle = manager
        .acquire(&AcquireRequest::new("users/42 counter"))
        .await
        .unwrap()
        .into_handle()
        .unwrap();
    assert_eq!(handle.resource(), "users/42 counter");
    assert_eq!(nodes[1].get("users/42 counter").as_deref(), Some(handle.token()));
    assert_eq!(nodes[0].counter("users/42 counter:fencing"), Some(1));
    assert!(manager.release(&handle).await.unwrap());
}
