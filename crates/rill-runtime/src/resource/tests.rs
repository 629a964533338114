use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use proptest::prelude::*;
use rill_base::{ExitCase, StreamError};

use super::{Finalizer, ScopedResource};

#[derive(Default)]
struct Probe {
    runs: AtomicUsize,
    leases_at_run: Mutex<Vec<usize>>,
    exits: Mutex<Vec<String>>,
}

fn finalizer(probe: &Arc<Probe>, resource: &Arc<ScopedResource>) -> Finalizer {
    let probe = Arc::clone(probe);
    let resource = Arc::clone(resource);
    Box::new(move |exit: ExitCase| {
        Box::pin(async move {
            probe.runs.fetch_add(1, Ordering::SeqCst);
            probe.leases_at_run.lock().push(resource.leases());
            probe.exits.lock().push(format!("{exit:?}"));
            Ok(())
        })
    })
}

#[tokio::test]
async fn release_runs_finalizer_once() {
    let probe = Arc::new(Probe::default());
    let resource = Arc::new(ScopedResource::new());
    assert!(resource.acquired(finalizer(&probe, &resource), false).await.unwrap());
    resource.release(ExitCase::Completed).await.unwrap();
    resource.release(ExitCase::Cancelled).await.unwrap();
    assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*probe.exits.lock(), vec!["Completed".to_string()]);
    assert!(!resource.is_open());
    assert!(resource.lease().is_none());
}

#[tokio::test]
async fn lease_defers_finalizer_until_cancelled() {
    let probe = Arc::new(Probe::default());
    let resource = Arc::new(ScopedResource::new());
    resource.acquired(finalizer(&probe, &resource), false).await.unwrap();
    let first = resource.lease().unwrap();
    let second = resource.lease().unwrap();
    resource.release(ExitCase::Completed).await.unwrap();
    assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
    first.cancel().await.unwrap();
    assert_eq!(probe.runs.load(Ordering::SeqCst), 0);
    second.cancel().await.unwrap();
    assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
    assert_eq!(*probe.leases_at_run.lock(), vec![0]);
}

#[tokio::test]
async fn acquiring_a_released_resource_finalizes_immediately() {
    let probe = Arc::new(Probe::default());
    let resource = Arc::new(ScopedResource::new());
    resource.release(ExitCase::Completed).await.unwrap();
    let retained = resource.acquired(finalizer(&probe, &resource), false).await.unwrap();
    assert!(!retained);
    assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancelled_acquisition_is_released_with_cancelled() {
    let probe = Arc::new(Probe::default());
    let resource = Arc::new(ScopedResource::new());
    let retained = resource.acquired(finalizer(&probe, &resource), true).await.unwrap();
    assert!(!retained);
    assert_eq!(*probe.exits.lock(), vec!["Cancelled".to_string()]);
    resource.release(ExitCase::Completed).await.unwrap();
    assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn finalizer_errors_surface_from_release() {
    let resource = Arc::new(ScopedResource::new());
    let failing: Finalizer = Box::new(|_| Box::pin(async { Err(StreamError::msg("close failed")) }));
    resource.acquired(failing, false).await.unwrap();
    let err = resource.release(ExitCase::Completed).await.unwrap_err();
    assert_eq!(err.to_string(), "close failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_leases_and_release_finalize_once() {
    for _ in 0..50 {
        let probe = Arc::new(Probe::default());
        let resource = Arc::new(ScopedResource::new());
        resource.acquired(finalizer(&probe, &resource), false).await.unwrap();
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let resource = Arc::clone(&resource);
            tasks.push(tokio::spawn(async move {
                if let Some(lease) = resource.lease() {
                    tokio::task::yield_now().await;
                    lease.cancel().await.unwrap();
                }
            }));
        }
        let releaser = Arc::clone(&resource);
        tasks.push(tokio::spawn(async move {
            releaser.release(ExitCase::Completed).await.unwrap();
        }));
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
        assert_eq!(*probe.leases_at_run.lock(), vec![0]);
    }
}

#[derive(Clone, Debug)]
enum Op {
    Acquire,
    Release,
    Lease,
    Cancel(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        Just(Op::Acquire),
        Just(Op::Release),
        Just(Op::Lease),
        (0usize..4).prop_map(Op::Cancel),
    ]
}

proptest! {
    #[test]
    fn finalizer_runs_exactly_once_for_any_interleaving(ops in prop::collection::vec(op_strategy(), 0..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        runtime.block_on(async {
            let probe = Arc::new(Probe::default());
            let resource = Arc::new(ScopedResource::new());
            let mut acquired = false;
            let mut leases = Vec::new();
            for op in ops {
                match op {
                    Op::Acquire if !acquired => {
                        acquired = true;
                        resource.acquired(finalizer(&probe, &resource), false).await.unwrap();
                    }
                    Op::Acquire => {}
                    Op::Release => resource.release(ExitCase::Completed).await.unwrap(),
                    Op::Lease => leases.extend(resource.lease()),
                    Op::Cancel(idx) if idx < leases.len() => {
                        leases.swap_remove(idx).cancel().await.unwrap();
                    }
                    Op::Cancel(_) => {}
                }
                assert!(probe.runs.load(Ordering::SeqCst) <= 1);
            }
            if !acquired {
                resource.acquired(finalizer(&probe, &resource), false).await.unwrap();
            }
            resource.release(ExitCase::Completed).await.unwrap();
            for lease in leases {
                lease.cancel().await.unwrap();
            }
            assert_eq!(probe.runs.load(Ordering::SeqCst), 1);
            assert_eq!(*probe.leases_at_run.lock(), vec![0]);
        });
    }
}
