//! Test: one bad image or bad step never takes the run down

use crate::helpers::*;
use image_pipeline::StepError;

#[tokio::test]
async fn test_runtime_error_isolated_to_item() {
    let h = Harness::new(
        &[
            (
                "picky",
                "if src.value == 2 { cv::fail(\"bad image\"); } cv::add(src, dst, 100);",
            ),
            ("plus one", "cv::add(src, dst, 1);"),
        ],
        &[("a", 1), ("b", 2), ("c", 3)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert!(summary.is_complete());
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].step_name, "picky");
    assert_eq!(summary.errors[0].label.as_deref(), Some("b"));
    assert!(summary.errors[0].message.contains("bad image"));

    let steps = h.presenter.steps();
    match &steps[0] {
        Event::Step {
            values,
            error: Some(error),
            fallbacks,
            ..
        } => {
            assert_eq!(values, &[Some(101), Some(2), Some(103)]);
            assert_eq!(error.index, 1);
            assert_eq!(error.label, "b");
            assert!(matches!(error.error, StepError::Runtime { .. }));
            assert_eq!(*fallbacks, 1);
        }
        other => panic!("expected a failed step, got {:?}", other),
    }
    assert_eq!(last_values(&h.presenter), [Some(102), Some(3), Some(104)]);
    assert_no_double_release(h.ledger());
}

#[tokio::test]
async fn test_only_first_failure_reported() {
    let h = Harness::new(&[("always fails", "cv::fail(\"nope\");")], &[("a", 1), ("b", 2), ("c", 3)]).await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].label.as_deref(), Some("a"));
    match &h.presenter.steps()[0] {
        Event::Step {
            values,
            error: Some(error),
            fallbacks,
            ..
        } => {
            assert_eq!(values, &[Some(1), Some(2), Some(3)]);
            assert_eq!(error.index, 0);
            assert_eq!(*fallbacks, 3);
        }
        other => panic!("expected a failed step, got {:?}", other),
    }
}

#[tokio::test]
async fn test_panic_in_operation_is_contained() {
    let h = Harness::new(
        &[("explodes", "cv::boom();"), ("plus one", "cv::add(src, dst, 1);")],
        &[("a", 1), ("b", 2)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert_eq!(summary.steps_run, 2);
    match &h.presenter.steps()[0] {
        Event::Step {
            error: Some(error), ..
        } => {
            assert!(
                matches!(&error.error, StepError::Panicked(message) if message.contains("boom from step code")),
                "{:?}",
                error
            );
        }
        other => panic!("expected a failed step, got {:?}", other),
    }
    assert_eq!(last_values(&h.presenter), [Some(2), Some(3)]);
    assert_no_double_release(h.ledger());

    let vision = h.vision.clone();
    drop(h.orchestrator);
    assert!(vision.ledger.live().is_empty());
}

#[tokio::test]
async fn test_syntax_error_degrades_to_passthrough() {
    let h = Harness::new(
        &[
            ("broken", "cv::add(src, dst,"),
            ("plus one", "cv::add(src, dst, 1);"),
        ],
        &[("a", 1), ("b", 2)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert_eq!(summary.steps_run, 2);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0].step_name, "broken (syntax error)");
    assert_eq!(summary.errors[0].label, None);

    let steps = h.presenter.steps();
    match &steps[0] {
        Event::Step {
            name,
            values,
            syntax_error,
            error,
            ..
        } => {
            assert_eq!(name, "broken (syntax error)");
            assert!(*syntax_error);
            assert!(error.is_none());
            assert_eq!(values, &[Some(1), Some(2)]);
        }
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(last_values(&h.presenter), [Some(2), Some(3)]);
}

#[tokio::test]
async fn test_released_output_falls_back() {
    let h = Harness::new(
        &[("release dst", "cv::set(dst, 4); dst.release();")],
        &[("a", 1)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert!(summary.has_errors());
    assert_eq!(last_values(&h.presenter), [Some(1)]);
    assert_no_double_release(h.ledger());
}

#[tokio::test]
async fn test_step_releasing_its_input() {
    let h = Harness::new(
        &[
            ("release src", "src.release(); cv::set(dst, 1);"),
            ("plus one", "cv::add(src, dst, 1);"),
        ],
        &[("a", 7), ("b", 9)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert!(summary.errors[0].message.contains("released its input"));
    match &h.presenter.steps()[0] {
        Event::Step {
            values, fallbacks, ..
        } => {
            assert_eq!(values, &[Some(7), Some(9)]);
            assert_eq!(*fallbacks, 2);
        }
        other => panic!("unexpected event {:?}", other),
    }
    // Later steps still see usable images
    assert_eq!(last_values(&h.presenter), [Some(8), Some(10)]);
    assert_no_double_release(h.ledger());
}

#[tokio::test]
async fn test_failed_step_falls_back_to_unmodified_input() {
    let h = Harness::new(
        &[("scribble then fail", "cv::set(src, 99); cv::fail(\"late\");")],
        &[("a", 3)],
    )
    .await;

    let summary = h.orchestrator.rerun().await.unwrap();

    assert_eq!(summary.errors.len(), 1);
    assert_eq!(last_values(&h.presenter), [Some(3)]);
    assert_no_double_release(h.ledger());
}
