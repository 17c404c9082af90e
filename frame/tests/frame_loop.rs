//! End-to-end frame loop tests against the validating dummy backend.

mod common;

use redlilium_frame::backend::FrameBackend;
use redlilium_frame::bvh::{self, BvhNode};
use redlilium_frame::program::ProgramId;
use rstest::rstest;
use redlilium_frame::cluster::{ClusterCounters, TileGrid};
use redlilium_frame::sort::{SORT_SENTINEL, key_index, padded_count};
use redlilium_frame::{
    CullingMethod, DebugView, ExecutionDomain, Extent2d, FrameConfig, FrameOutcome, LightRecord,
    QueueTopology, RendererSettings, StageId, SurfaceEvent,
};

fn clustered(light_count: u32) -> FrameConfig {
    FrameConfig::default()
        .with_culling(CullingMethod::Clustered)
        .with_light_count(light_count)
}

#[test]
fn test_clustered_sort_output_is_monotonic() {
    let config = clustered(10_000);
    let scene = common::scene(10_000);
    let (mut driver, handle) =
        common::driver(Extent2d::new(640, 360), RendererSettings::default(), config);

    for _ in 0..2 {
        let outcome = driver.run_frame(&config, &scene).unwrap();
        assert!(matches!(outcome, FrameOutcome::Presented { .. }));
    }

    let set = driver
        .resources()
        .sort()
        .set(driver.double_buffer().read_set());
    let keys: Vec<u64> = driver.backend().read_buffer(set.keys);
    let sorted: Vec<LightRecord> = driver.backend().read_buffer(set.output);

    assert!(keys[..10_000].windows(2).all(|w| w[0] < w[1]));
    for (i, key) in keys[..10_000].iter().enumerate() {
        assert_eq!(sorted[i], scene.lights[key_index(*key) as usize]);
    }
    let padded = padded_count(10_000) as usize;
    assert!(keys[10_000..padded].iter().all(|&k| k == SORT_SENTINEL));

    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
}

#[test]
fn test_clustered_bvh_root_bounds_every_light() {
    let config = clustered(2_000);
    let scene = common::scene(2_000);
    let settings = RendererSettings::default();
    let (mut driver, handle) = common::driver(Extent2d::new(320, 180), settings, config);
    driver.run_frame(&config, &scene).unwrap();

    let levels = bvh::plan_levels(2_000, settings.subgroup_size);
    let root = levels.last().unwrap().output_offset as usize;
    let nodes: Vec<BvhNode> = driver
        .backend()
        .read_buffer(driver.resources().sort().bvh_nodes);
    assert!(scene.lights.iter().all(|light| nodes[root].contains(light)));
    assert!(handle.report().is_clean());
}

#[test]
fn test_switch_to_tiled_matches_every_acquire() {
    let config = clustered(10_000);
    let scene = common::scene(10_000);
    let (mut driver, handle) =
        common::driver(Extent2d::new(1920, 1080), RendererSettings::default(), config);
    driver.run_frame(&config, &scene).unwrap();

    handle.clear_history();
    let transfers_before = handle.report().matched_transfers;
    let tiled = config.with_culling(CullingMethod::Tiled);
    driver.run_frame(&tiled, &scene).unwrap();

    assert_eq!(driver.graph().method(), CullingMethod::Tiled);
    assert_eq!(driver.stats().graph_rebuilds, 1);
    assert_eq!(driver.resources().tiled().grid, TileGrid::new(Extent2d::new(1920, 1080), 32));

    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
    // Light buffer: handoff -> copy, copy -> tiled cull.
    assert_eq!(report.matched_transfers - transfers_before, 2);
    assert!(
        report
            .submissions
            .iter()
            .any(|s| s.stage == StageId::TiledCull)
    );
}

#[test]
fn test_tile_grid_for_full_hd() {
    let grid = TileGrid::new(Extent2d::new(1920, 1080), 32);
    assert_eq!((grid.tiles_x, grid.tiles_y), (60, 34));
}

#[test]
fn test_zero_area_resize_resumes_cleanly() {
    let config = clustered(500);
    let scene = common::scene(500);
    let (mut driver, handle) =
        common::driver(Extent2d::new(800, 600), RendererSettings::default(), config);
    driver.run_frame(&config, &scene).unwrap();

    handle.push_event(SurfaceEvent::Resize(Extent2d::new(0, 0)));
    assert_eq!(driver.run_frame(&config, &scene).unwrap(), FrameOutcome::Dropped);
    assert_eq!(driver.extent(), Extent2d::new(800, 600));

    for _ in 0..3 {
        assert!(matches!(
            driver.run_frame(&config, &scene).unwrap(),
            FrameOutcome::Presented { .. }
        ));
    }
    let report = handle.report();
    assert_eq!(report.surface_waits, 1);
    assert!(report.is_clean(), "{:#?}", report.violations);
}

#[test]
fn test_empty_frame_compaction_dispatch_is_one() {
    let config = clustered(0);
    let scene = common::scene(0);
    let (mut driver, _handle) =
        common::driver(Extent2d::new(256, 256), RendererSettings::default(), config);
    driver.run_frame(&config, &scene).unwrap();

    let counters: Vec<ClusterCounters> = driver
        .backend()
        .read_buffer(driver.resources().cluster().counters);
    assert_eq!(counters[0].compact_dispatch, [1, 1, 1]);
    assert_eq!(ClusterCounters::COMPACT_ARGS_OFFSET, 0);
}

#[rstest]
#[case(1)]
#[case(37)]
#[case(300)]
fn test_flagged_clusters_drive_light_cull_dispatch(#[case] touched: u32) {
    let config = clustered(64);
    let scene = common::scene(64);
    // 8 x 8 tiles of 32 pixels with 32 depth slices: 2048 cluster keys.
    let (mut driver, handle) =
        common::driver(Extent2d::new(256, 256), RendererSettings::default(), config);
    let keys: Vec<u32> = (0..touched).map(|i| i * 5).collect();
    handle.touch_clusters(keys.iter().copied());
    for _ in 0..2 {
        driver.run_frame(&config, &scene).unwrap();
    }

    let cluster = driver.resources().cluster();
    let counters: Vec<ClusterCounters> = driver.backend().read_buffer(cluster.counters);
    assert_eq!(counters[0].unique_count, touched);
    assert_eq!(counters[0].cull_dispatch, [touched, 1, 1]);
    assert_eq!(counters[0].overflow, 0);

    let mut unique: Vec<u32> = driver.backend().read_buffer(cluster.unique_clusters);
    unique.truncate(touched as usize);
    unique.sort_unstable();
    assert_eq!(unique, keys);

    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
    let groups_of = |program: ProgramId| {
        report
            .indirect_dispatches
            .iter()
            .filter(|d| d.program == program)
            .map(|d| d.groups)
            .collect::<Vec<_>>()
    };
    assert_eq!(groups_of(ProgramId::ClusterCompact), vec![[touched + 1, 1, 1]; 2]);
    assert_eq!(groups_of(ProgramId::LightCull), vec![[touched, 1, 1]; 2]);
}

#[test]
fn test_saturated_page_pool_counts_overflow() {
    let config = clustered(64);
    let settings = RendererSettings::default().with_page_capacity(16);
    let (mut driver, handle) = common::driver(Extent2d::new(256, 256), settings, config);
    handle.touch_clusters(0..40);
    driver.run_frame(&config, &common::scene(64)).unwrap();

    let counters: Vec<ClusterCounters> = driver
        .backend()
        .read_buffer(driver.resources().cluster().counters);
    assert_eq!(counters[0].unique_count, 16);
    assert_eq!(counters[0].overflow, 24);
    assert_eq!(counters[0].cull_dispatch, [16, 1, 1]);

    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
    let cull = report
        .indirect_dispatches
        .iter()
        .find(|d| d.program == ProgramId::LightCull)
        .map(|d| d.groups);
    assert_eq!(cull, Some([16, 1, 1]));
}

// 100, 300 and 1000 lights sort in 2, 4 and 5 phases.
#[rstest]
#[case(100)]
#[case(300)]
#[case(1000)]
fn test_light_sort_never_waits_behind_composition(#[case] light_count: u32) {
    let config = clustered(light_count);
    let scene = common::scene(light_count);
    let (mut driver, handle) =
        common::driver(Extent2d::new(320, 240), RendererSettings::default(), config);
    let mut outputs = Vec::new();
    for _ in 0..4 {
        driver.run_frame(&config, &scene).unwrap();
        outputs.push(driver.double_buffer().read_set());
    }
    assert!(outputs.windows(2).all(|w| w[0] != w[1]), "{outputs:?}");

    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
    let submissions = &report.submissions;
    let sorts = submissions
        .iter()
        .enumerate()
        .filter(|(_, s)| s.stage == StageId::LightSort);
    for (index, _) in sorts.skip(1) {
        let previous_composition = submissions[..index]
            .iter()
            .rposition(|s| s.stage == StageId::Composition)
            .unwrap();
        // Everything the sort depends on, directly or not, is async work or
        // was submitted before the previous frame's composition.
        let mut pending = vec![index];
        while let Some(current) = pending.pop() {
            for (earlier, record) in submissions[..current].iter().enumerate() {
                if !submissions[current].waits_on(record) {
                    continue;
                }
                assert!(
                    record.domain == ExecutionDomain::Async || earlier < previous_composition,
                    "light sort at {index} waits on '{}' at {earlier}",
                    record.stage
                );
                pending.push(earlier);
            }
        }
    }
}

#[test]
fn test_every_method_runs_with_debug_view() {
    for method in CullingMethod::ALL {
        let config = FrameConfig::default()
            .with_culling(method)
            .with_light_count(256)
            .with_debug_view(DebugView::Normal);
        let scene = common::scene(256);
        let (mut driver, handle) =
            common::driver(Extent2d::new(200, 100), RendererSettings::default(), config);
        for _ in 0..3 {
            driver.run_frame(&config, &scene).unwrap();
        }
        driver.wait_idle().unwrap();
        let report = handle.report();
        assert!(report.is_clean(), "{method}: {:#?}", report.violations);
        assert_eq!(report.presents.len(), 3);
    }
}

#[test]
fn test_single_frame_in_flight_general_only() {
    let config = clustered(1_000);
    let settings = RendererSettings::default()
        .with_frames_in_flight(1)
        .with_topology(QueueTopology::GeneralOnly);
    let scene = common::scene(1_000);
    let (mut driver, handle) = common::driver(Extent2d::new(640, 480), settings, config);
    for _ in 0..3 {
        match driver.run_frame(&config, &scene).unwrap() {
            FrameOutcome::Presented { slot, .. } => assert_eq!(slot.index(), 0),
            FrameOutcome::Dropped => panic!("unexpected drop"),
        }
    }
    let report = handle.report();
    assert!(report.is_clean(), "{:#?}", report.violations);
    assert_eq!(report.matched_transfers, 0);
    assert_eq!(driver.backend().name(), "Dummy Backend");
}
