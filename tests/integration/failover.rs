//! Image provider failover tests against a running orchestrator.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use reelforge::core::ImageProvider;
use reelforge::orchestration::{TaskOutcome, WorkerEvent};

use crate::fixtures::{
    drain, orchestrator, test_settings, test_task, MockImages, Mocks, WorkDir, TEST_TIMEOUT,
};

/// Test: Automatic failover
/// Given a Recraft mock that always errors and a threshold of two failures
/// When images are generated
/// Then the task switches to Pollinations and completes with its images
#[tokio::test]
async fn test_failing_provider_switches_automatically() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(1, 3).with_recraft(MockImages::failing("recraft"));
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, orchestrator.run()).await);

    assert_eq!(report.outcome, TaskOutcome::Completed);
    let images = dir.scenario_dir("en", 1).join("images");
    for k in 1..=3 {
        assert!(images.join(format!("img_{}.jpg", k)).exists(), "img_{} missing", k);
        assert!(!images.join(format!("img_{}.png", k)).exists());
    }

    // Two failures trip the threshold before the switch.
    assert!(mocks.recraft.calls.load(Ordering::SeqCst) >= 2);
    assert!(mocks.pollinations.calls.load(Ordering::SeqCst) >= 3);

    let switches: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::ServiceSwitched { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        switches.first(),
        Some(&(ImageProvider::Recraft, ImageProvider::Pollinations))
    );
}

/// Test: Return to default
/// Given a Recraft mock that errors exactly twice and a threshold of two
/// When three images are generated
/// Then the task moves to Pollinations for one image and reports the move
/// back to Recraft, which makes the rest
#[tokio::test]
async fn test_return_to_default_is_reported() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(1, 3);
    mocks.recraft.failures.store(2, Ordering::SeqCst);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, orchestrator.run()).await);

    assert_eq!(report.outcome, TaskOutcome::Completed);
    let images = dir.scenario_dir("en", 1).join("images");
    assert!(images.join("img_1.jpg").exists());
    assert!(images.join("img_2.png").exists());
    assert!(images.join("img_3.png").exists());
    assert_eq!(mocks.pollinations.calls.load(Ordering::SeqCst), 1);

    let switches: Vec<_> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            WorkerEvent::ServiceSwitched { from, to } => Some((from, to)),
            _ => None,
        })
        .collect();
    assert_eq!(
        switches,
        vec![
            (ImageProvider::Recraft, ImageProvider::Pollinations),
            (ImageProvider::Pollinations, ImageProvider::Recraft),
        ]
    );
}

/// Given a Recraft mock that errors once,
/// When images are generated,
/// Then the same provider is retried and no switch happens.
#[tokio::test]
async fn test_single_error_retries_same_provider() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(1, 2);
    mocks.recraft.failures.store(1, Ordering::SeqCst);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = orchestrator.run().await;

    assert_eq!(report.outcome, TaskOutcome::Completed);
    assert_eq!(mocks.recraft.calls.load(Ordering::SeqCst), 3);
    assert_eq!(mocks.pollinations.calls.load(Ordering::SeqCst), 0);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WorkerEvent::ServiceSwitched { .. })));
}

/// Given auto-failover disabled and a provider that keeps erroring,
/// When the task is cancelled during the backoff,
/// Then it ends Cancelled without ever switching.
#[tokio::test]
async fn test_disabled_failover_keeps_provider_until_cancelled() {
    let dir = WorkDir::new(&["en"]);
    let mut settings = test_settings();
    settings.auto_fallback_image_service = false;
    let settings = Arc::new(settings);
    let mocks = Mocks::new(1, 1).with_recraft(MockImages::failing("recraft"));
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let cancel = CancellationToken::new();
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, cancel.clone());

    let handle = tokio::spawn(orchestrator.run());
    while mocks.recraft.calls.load(Ordering::SeqCst) < 5 {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    cancel.cancel();
    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, handle).await).unwrap();

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    assert_eq!(mocks.pollinations.calls.load(Ordering::SeqCst), 0);
    assert!(!drain(&mut rx)
        .iter()
        .any(|e| matches!(e, WorkerEvent::ServiceSwitched { .. })));
}

// ============================================================================
// Batch provider
// ============================================================================

/// Test: Batch order
/// Given the batch provider whose calls finish in reverse order
/// When every prompt of the task is generated in one batch
/// Then each image lands at the index of its own prompt
#[tokio::test]
async fn test_batch_images_keep_prompt_order() {
    let dir = WorkDir::new(&["en", "uk"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(2, 3);
    let task = test_task(1, &dir, &["en", "uk"], ImageProvider::Googler);
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, orchestrator.run()).await);

    assert_eq!(report.outcome, TaskOutcome::Completed);
    assert_eq!(mocks.googler.batches.load(Ordering::SeqCst), 1);
    assert_eq!(mocks.recraft.calls.load(Ordering::SeqCst), 0);

    for lang in ["en", "uk"] {
        for n in 1..=2 {
            let images = dir.scenario_dir(lang, n).join("images");
            for k in 1..=3 {
                let bytes = std::fs::read(images.join(format!("img_{}.jpg", k))).unwrap();
                let prompt = String::from_utf8(bytes).unwrap();
                assert!(
                    prompt.starts_with(&format!("picture {} for Story {} of", k, n)),
                    "{} scenario {} image {} got {:?}",
                    lang,
                    n,
                    k,
                    prompt
                );
            }
        }
    }
}
