//! Worker pool bounds observed through a full task run.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use reelforge::core::ImageProvider;
use reelforge::orchestration::{Pools, TaskOutcome};

use crate::fixtures::{orchestrator, test_settings, test_task, Mocks, WorkDir};

/// Test: Assembly throttling
/// Given an assembly pool of width 2 and six scenarios
/// When montage and finalize run
/// Then never more than two assembly units run at once
#[tokio::test]
async fn test_assembly_pool_is_bounded() {
    let dir = WorkDir::new(&["en", "uk"]);
    let settings = Arc::new(test_settings());
    let mocks = Mocks::new(3, 1);
    let task = test_task(1, &dir, &["en", "uk"], ImageProvider::Recraft);
    let pools = Pools::from_settings(&settings.pools);
    let (orchestrator, _rx) = orchestrator(&task, &settings, &mocks, CancellationToken::new());

    let report = orchestrator.with_pools(pools.clone()).run().await;

    assert_eq!(report.outcome, TaskOutcome::Completed);
    assert_eq!(pools.assembly.width(), Some(2));
    assert_eq!(pools.assembly.spawned_count(), 12);
    assert!(pools.assembly.peak() <= 2, "assembly peak {}", pools.assembly.peak());
    assert!(pools.general.peak() <= 4, "general peak {}", pools.general.peak());
    // Three asset branches, each a coordinator.
    assert_eq!(pools.coordinators.spawned_count(), 3);
    assert_eq!(pools.assembly.active_count(), 0);
}
