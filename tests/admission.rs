//! Admission-controller integration.
//!
//! Invariant: a request arriving while the latest sample exceeds any
//! threshold is rejected with the configured `Retry-After`; otherwise it
//! is admitted. Samples are injected through the pressure cell.

use rxserve_admission::{
    AdmissionConfig, AdmissionController, AdmissionDecision, PressureCell, PressureSample,
    PressureSignals, RejectReason, Sampler, StaticSignals,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sample(heap: f64, util: f64, pending: usize) -> PressureSample {
    PressureSample {
        taken_at: Instant::now(),
        heap_load: heap,
        threadpool_util: util,
        pending_work_depth: pending,
    }
}

#[test]
fn decisions_follow_the_latest_injected_sample() {
    let cell = PressureCell::new();
    let controller = AdmissionController::builder(cell.clone()).build();

    assert_eq!(controller.decide(), AdmissionDecision::Admit);

    cell.publish(sample(0.90, 0.0, 0));
    assert!(matches!(
        controller.decide(),
        AdmissionDecision::Reject {
            reason: RejectReason::Memory,
            ..
        }
    ));

    cell.publish(sample(0.10, 0.0, 0));
    assert_eq!(controller.decide(), AdmissionDecision::Admit);
}

#[test]
fn rejections_carry_the_configured_retry_after() {
    let cell = PressureCell::new();
    cell.publish(sample(0.0, 0.0, 500));
    let controller = AdmissionController::builder(cell)
        .config(AdmissionConfig {
            retry_after_seconds: 7,
            ..AdmissionConfig::default()
        })
        .build();

    let AdmissionDecision::Reject { retry_after, .. } = controller.decide() else {
        panic!("expected rejection");
    };
    assert_eq!(retry_after, 7);
}

#[test]
fn detail_strings_name_the_violated_signal() {
    let cell = PressureCell::new();
    let controller = AdmissionController::builder(cell.clone()).build();

    cell.publish(sample(0.90, 0.0, 0));
    let AdmissionDecision::Reject { detail, .. } = controller.decide() else {
        panic!("expected rejection");
    };
    assert_eq!(detail, "Memory: 90% >= 85%");

    cell.publish(sample(0.0, 0.93, 0));
    let AdmissionDecision::Reject { detail, .. } = controller.decide() else {
        panic!("expected rejection");
    };
    assert_eq!(detail, "ThreadPool: 93% >= 90%");

    cell.publish(sample(0.0, 0.0, 120));
    let AdmissionDecision::Reject { detail, .. } = controller.decide() else {
        panic!("expected rejection");
    };
    assert_eq!(detail, "PendingWork: 120 >= 100");
}

#[tokio::test]
async fn sampler_feeds_the_controller_end_to_end() {
    let signals = Arc::new(StaticSignals::new(1_000, 10));
    let cell = PressureCell::new();
    let controller = AdmissionController::builder(cell.clone()).build();
    let shutdown = tokio_util::sync::CancellationToken::new();

    let handle = Sampler::new(
        Arc::clone(&signals) as Arc<dyn PressureSignals>,
        cell,
        Duration::from_millis(10),
    )
    .spawn(shutdown.clone());

    // Healthy at first.
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(controller.decide(), AdmissionDecision::Admit);

    // Drive heap usage over the 85% threshold and wait a sampler period.
    signals.set_heap_used(950);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert!(matches!(
        controller.decide(),
        AdmissionDecision::Reject {
            reason: RejectReason::Memory,
            ..
        }
    ));

    // Recovery clears the rejection within a period as well.
    signals.set_heap_used(100);
    tokio::time::sleep(Duration::from_millis(40)).await;
    assert_eq!(controller.decide(), AdmissionDecision::Admit);

    shutdown.cancel();
    handle.await.unwrap();
}

#[test]
fn shutdown_rejections_win_over_healthy_samples() {
    let cell = PressureCell::new();
    cell.publish(sample(0.0, 0.0, 0));
    let controller = AdmissionController::builder(cell).build();

    controller.begin_shutdown();
    assert!(matches!(
        controller.decide(),
        AdmissionDecision::Reject {
            reason: RejectReason::ShuttingDown,
            ..
        }
    ));
}
