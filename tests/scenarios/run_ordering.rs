//! Test: overlapping run requests are serialised and the newest wins

use crate::helpers::*;
use image_pipeline::RunState;

#[tokio::test]
async fn test_newer_request_supersedes_running_one() {
    let h = Harness::new(
        &[
            ("plus one", "cv::add(src, dst, 1);"),
            ("plus two", "cv::add(src, dst, 2);"),
        ],
        &[("a", 1), ("b", 2)],
    )
    .await;

    let (first, second) = tokio::join!(h.orchestrator.rerun(), h.orchestrator.rerun());
    let first = first.unwrap();
    let second = second.unwrap();

    assert!(first.superseded);
    assert_eq!(first.steps_run, 0);
    assert!(!first.is_complete());

    assert!(!second.superseded);
    assert!(second.is_complete());
    assert_eq!(second.steps_run, 2);

    // Only the surviving run rendered steps
    assert_eq!(h.presenter.steps().len(), 2);
    assert_eq!(last_values(&h.presenter), [Some(4), Some(5)]);
    assert_no_double_release(h.ledger());
}

#[tokio::test]
async fn test_state_returns_to_idle() {
    let h = Harness::new(&[("plus one", "cv::add(src, dst, 1);")], &[("a", 1)]).await;
    let mut states = h.orchestrator.subscribe();
    assert_eq!(*states.borrow_and_update(), RunState::Idle);

    h.orchestrator.rerun().await.unwrap();

    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), RunState::Idle);
    assert!(!h.orchestrator.state().is_busy());
}

#[tokio::test]
async fn test_state_is_idle_after_failed_load() {
    let h = Harness::new(&[("plus one", "cv::add(src, dst, 1);")], &[]).await;

    assert!(h.orchestrator.rerun().await.is_err());

    assert_eq!(h.orchestrator.state(), RunState::Idle);
}

#[tokio::test]
async fn test_sequential_runs_replace_batch() {
    let h = Harness::new(&[("plus one", "cv::add(src, dst, 1);")], &[("a", 1), ("b", 2)]).await;

    for _ in 0..3 {
        let summary = h.orchestrator.rerun().await.unwrap();
        assert!(summary.is_complete());
    }

    // Every run starts again from the originals
    assert_eq!(last_values(&h.presenter), [Some(2), Some(3)]);
    assert_eq!(h.ledger().live().len(), 2);
    assert_eq!(
        h.presenter
            .events()
            .iter()
            .filter(|e| **e == Event::Clear)
            .count(),
        3
    );
}
