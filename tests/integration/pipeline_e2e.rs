//! End-to-end pipeline tests.
//!
//! These drive a single orchestrator through every phase against mock
//! services and check what lands in the working directory.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio_test::assert_ok;
use tokio_util::sync::CancellationToken;

use reelforge::core::ImageProvider;
use reelforge::orchestration::{TaskOutcome, WorkerEvent};
use reelforge::workflow::TaskPhase;

use crate::fixtures::{drain, orchestrator, test_settings, test_task, Mocks, WorkDir, TEST_TIMEOUT};

/// Test: E2E Happy Path
/// Given two languages whose scripts split into three scenarios each
/// When the task runs to completion
/// Then every scenario gets a title, narration, subtitles and a final video
#[tokio::test]
async fn test_two_languages_three_scenarios_each() {
    let dir = WorkDir::new(&["en", "uk"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(3, 2);
    let task = test_task(1, &dir, &["en", "uk"], ImageProvider::Recraft);
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, orchestrator.run()).await);

    assert_eq!(report.outcome, TaskOutcome::Completed);
    assert_eq!(report.scenario_count, 6);
    assert_eq!(report.videos.len(), 6);
    let phases: Vec<_> = report.history.iter().map(|e| e.phase).collect();
    assert_eq!(
        phases,
        vec![
            TaskPhase::Created,
            TaskPhase::ScriptGeneration,
            TaskPhase::AssetGeneration,
            TaskPhase::Montage,
            TaskPhase::Finalize,
            TaskPhase::Completed,
        ]
    );

    // 2 scenario splits + 6 prompt lists + 6 titles
    assert_eq!(mocks.text.calls.load(Ordering::SeqCst), 14);
    assert_eq!(mocks.text.title_calls.load(Ordering::SeqCst), 6);
    assert_eq!(mocks.recraft.calls.load(Ordering::SeqCst), 12);
    assert_eq!(mocks.pollinations.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.elevenlabs.submits.load(Ordering::SeqCst), 3);
    assert_eq!(mocks.voicemaker.calls.load(Ordering::SeqCst), 3);
    assert_eq!(mocks.transcriber.calls.load(Ordering::SeqCst), 6);
    assert!(!mocks.transcriber.overlapped.load(Ordering::SeqCst));
    assert_eq!(mocks.assembler.montages.load(Ordering::SeqCst), 6);
    assert_eq!(mocks.assembler.burns.load(Ordering::SeqCst), 6);

    for lang in ["en", "uk"] {
        for n in 1..=3 {
            let scenario = dir.scenario_dir(lang, n);
            assert!(scenario.join("scenario.txt").exists());
            assert!(scenario.join("images").join("img_1.png").exists());
            assert!(scenario.join("images").join("img_2.png").exists());
            assert!(scenario.join("audio.mp3").exists());
            let ass = std::fs::read_to_string(scenario.join("subtitles.ass")).unwrap();
            assert!(ass.contains("[Events]"));
            assert!(ass.contains("and goodbye"));
            let title = std::fs::read_to_string(scenario.join("title.txt")).unwrap();
            assert_eq!(title, format!("Title: Story {}", n));
        }
        // Titles name the videos; temporary montages are gone.
        assert_eq!(
            dir.videos(lang),
            vec!["Title Story 1.mp4", "Title Story 2.mp4", "Title Story 3.mp4"]
        );
    }

    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        WorkerEvent::Status { lane: 1, message } if message.contains("Montage")
    )));
    assert!(!events
        .iter()
        .any(|e| matches!(e, WorkerEvent::ServiceSwitched { .. })));
}

/// Given a working directory without source texts,
/// When the task runs,
/// Then it fails in script generation and never reaches assembly.
#[tokio::test]
async fn test_missing_source_text_fails_task() {
    let dir = WorkDir::empty();
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(3, 2);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = orchestrator.run().await;

    match &report.outcome {
        TaskOutcome::Failed(error) => assert!(error.contains("no source text"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(report.history.last().map(|e| e.phase), Some(TaskPhase::Failed));
    assert_eq!(mocks.text.calls.load(Ordering::SeqCst), 0);
    assert_eq!(mocks.assembler.montages.load(Ordering::SeqCst), 0);
}

/// Given a transcriber that errors,
/// When the asset phase runs,
/// Then the whole task fails but images and audio already produced stay.
#[tokio::test]
async fn test_asset_failure_keeps_side_effects() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(2, 1);
    mocks.transcriber.fail.store(true, Ordering::SeqCst);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = orchestrator.run().await;

    match &report.outcome {
        TaskOutcome::Failed(error) => assert!(error.contains("assets phase failed"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
    let phases: Vec<_> = report.history.iter().map(|e| e.phase).collect();
    assert!(!phases.contains(&TaskPhase::Montage));
    assert_eq!(mocks.assembler.montages.load(Ordering::SeqCst), 0);
    for n in 1..=2 {
        let scenario = dir.scenario_dir("en", n);
        assert!(scenario.join("images").join("img_1.png").exists());
        assert!(scenario.join("audio.mp3").exists());
    }
}

/// Given a narration job the remote marks as errored,
/// When the asset phase runs,
/// Then the task fails instead of polling forever.
#[tokio::test]
async fn test_errored_narration_job_fails_task() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(1, 1);
    mocks.elevenlabs.fail_jobs.store(true, Ordering::SeqCst);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, orchestrator.run()).await);

    match &report.outcome {
        TaskOutcome::Failed(error) => assert!(error.contains("voice quota exceeded"), "{}", error),
        other => panic!("expected failure, got {:?}", other),
    }
}

/// Given a task with one unknown language next to a configured one,
/// When it runs,
/// Then the unknown lane is skipped and the other still completes.
#[tokio::test]
async fn test_unknown_language_is_skipped() {
    let dir = WorkDir::new(&["uk"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(1, 1);
    let task = test_task(1, &dir, &["xx", "uk"], ImageProvider::Recraft);
    let (orchestrator, mut rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = orchestrator.run().await;

    assert_eq!(report.outcome, TaskOutcome::Completed);
    assert_eq!(report.scenario_count, 1);
    // The configured lane keeps its position in the task.
    let events = drain(&mut rx);
    assert!(events.iter().any(|e| matches!(e, WorkerEvent::Status { lane: 0, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        WorkerEvent::Status { lane: 1, message } if message.contains("Scenarios")
    )));
}

// ============================================================================
// Cancellation
// ============================================================================

/// Test: Cancellation during assembly
/// Given a montage that only ends when cancelled
/// When the token fires mid-montage
/// Then the task reports Cancelled, not Failed, and no video is finalized
#[tokio::test]
async fn test_cancel_during_montage() {
    let dir = WorkDir::new(&["en"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(2, 1);
    mocks.assembler.block_montage.store(true, Ordering::SeqCst);
    let task = test_task(1, &dir, &["en"], ImageProvider::Recraft);
    let cancel = CancellationToken::new();
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, cancel.clone());

    let handle = tokio::spawn(orchestrator.run());
    assert_ok!(tokio::time::timeout(TEST_TIMEOUT, mocks.assembler.montage_started.notified()).await);
    cancel.cancel();

    let report = assert_ok!(tokio::time::timeout(TEST_TIMEOUT, handle).await).unwrap();

    assert_eq!(report.outcome, TaskOutcome::Cancelled);
    let phases: Vec<_> = report.history.iter().map(|e| e.phase).collect();
    assert_eq!(phases.last(), Some(&TaskPhase::Cancelled));
    assert!(phases.contains(&TaskPhase::Montage));
    assert!(!phases.contains(&TaskPhase::Finalize));
    assert_eq!(mocks.assembler.burns.load(Ordering::SeqCst), 0);
    assert!(dir.videos("en").is_empty());
}
