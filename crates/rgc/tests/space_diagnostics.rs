//! Region Space Diagnostics, Monitoring and Configuration
//!
//! Dumps, fragmentation reports, statistics, events, the read-barrier table
//! and configuration failures.

mod common;

use common::{SpaceFixture, REGION};
use rgc::barrier::{ReadBarrierTable, RegionTrapTable};
use rgc::{RegionSpace, RgcError, SpaceConfig, SpaceEvent, ThreadRegistry};

// ============================================================================
// Dumps
// ============================================================================

#[test]
fn test_dump_header_names_bounds() -> anyhow::Result<()> {
    let fixture = SpaceFixture::small();
    let mut out = String::new();
    fixture.space.dump(&mut out)?;

    assert_eq!(
        out,
        format!(
            "test space {:#x}-{:#x}",
            fixture.space.begin(),
            fixture.space.limit()
        )
    );
    Ok(())
}

#[test]
fn test_dump_regions_lines() {
    let fixture = SpaceFixture::small();
    let registry = ThreadRegistry::new();
    let thread = registry.register("A").unwrap();
    fixture.alloc(100);
    fixture.space.alloc_large(REGION + 8).unwrap();
    fixture.space.alloc_new_tlab(&thread);

    let mut all = String::new();
    fixture.space.dump_regions(&mut all).unwrap();
    let lines: Vec<&str> = all.lines().collect();

    assert_eq!(lines.len(), 8);
    assert!(lines[0].starts_with("Region[0]="));
    assert!(lines[0].contains("state=Allocated type=ToSpace"));
    assert!(lines[0].contains("is_newly_allocated=true"));
    assert!(lines[1].contains("state=Large"));
    assert!(lines[1].contains(&format!("object_size={} tails=1", REGION + 8)));
    assert!(lines[2].contains("state=LargeTail"));
    assert!(lines[3].contains(&format!("thread={}", thread.id())));
    assert!(lines[4].contains("state=Free type=None"));
    assert!(lines[4].contains("live_bytes=unmeasured"));

    let mut non_free = String::new();
    fixture.space.dump_non_free_regions(&mut non_free).unwrap();
    assert_eq!(non_free.lines().count(), 4);
}

#[test]
fn test_dump_shows_cursor_top() {
    let fixture = SpaceFixture::small();
    let a = fixture.alloc(48);

    let mut out = String::new();
    fixture.space.dump_non_free_regions(&mut out).unwrap();

    assert!(out.contains(&format!(
        "{:#x}-{:#x}-{:#x}",
        a.addr,
        a.addr + 48,
        a.addr + REGION
    )));
}

// ============================================================================
// Fragmentation report
// ============================================================================

#[test]
fn test_fragmentation_report_uses_current_region_when_reserve_is_touched() {
    let fixture = SpaceFixture::small();
    fixture.fill_regions(3);
    fixture.alloc(REGION - 4096);

    let mut out = String::new();
    fixture
        .space
        .log_fragmentation_alloc_failure(&mut out, 8192)
        .unwrap();

    assert_eq!(
        out,
        "; failed due to fragmentation (largest possible contiguous allocation 4096 bytes)"
    );
}

#[test]
fn test_fragmentation_report_counts_longest_free_run() {
    let fixture = SpaceFixture::small();
    let first = fixture.space.alloc_large(REGION + 8).unwrap();
    fixture.alloc(64);
    fixture.space.free_large(first.addr, first.bytes_allocated).unwrap();

    // Regions 0-1 free, 2 in use, 3-7 free
    let mut out = String::new();
    fixture
        .space
        .log_fragmentation_alloc_failure(&mut out, 6 * REGION)
        .unwrap();

    assert!(out.ends_with(&format!(
        "(largest possible contiguous allocation {} bytes)",
        5 * REGION
    )));
}

#[test]
fn test_fragmentation_report_appends() {
    let fixture = SpaceFixture::small();
    let mut out = String::from("alloc of 1 MiB failed");
    fixture
        .space
        .log_fragmentation_alloc_failure(&mut out, REGION * 4)
        .unwrap();

    assert!(out.starts_with("alloc of 1 MiB failed; failed due to fragmentation"));
}

// ============================================================================
// Statistics and events
// ============================================================================

#[test]
fn test_space_size_queries() {
    let fixture = SpaceFixture::small();
    fixture.fill_survivor_regions(2);
    fixture.space.record_live_bytes(0, REGION).unwrap();
    fixture.space.record_live_bytes(1, 0).unwrap();

    assert_eq!(fixture.space.to_space_size(), 2 * REGION);
    fixture.space.set_from_space(None, false);

    assert_eq!(fixture.space.to_space_size(), 0);
    assert_eq!(fixture.space.unevac_from_space_size(), REGION);
    assert_eq!(fixture.space.from_space_size(), REGION);

    fixture.space.clear_from_space();
    assert_eq!(fixture.space.from_space_size(), 0);
    assert_eq!(fixture.space.unevac_from_space_size(), 0);
    assert_eq!(fixture.space.to_space_size(), REGION);
}

#[test]
fn test_stats_json() -> anyhow::Result<()> {
    let fixture = SpaceFixture::small();
    fixture.alloc(128);

    let stats = fixture.space.stats();
    let json: serde_json::Value = serde_json::from_str(&stats.to_json())?;

    assert_eq!(json["name"], "test space");
    assert_eq!(json["num_regions"], 8);
    assert_eq!(json["num_non_free_regions"], 1);
    assert_eq!(json["bytes_allocated"], 128);
    assert_eq!(json["epoch"], 1);
    Ok(())
}

#[test]
fn test_cycle_stats_recorded_per_epoch() {
    let fixture = SpaceFixture::small();
    fixture.alloc(64);
    fixture.collect(false);
    fixture.alloc(64);
    fixture.collect(true);

    let history = fixture.space.cycle_stats().get_history();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].epoch, 2);
    assert_eq!(history[1].epoch, 3);
    assert!(history.iter().all(|c| c.completed));
    assert!(history[1].forced);
    assert_eq!(history[0].freed_regions, 1);
    assert_eq!(fixture.space.cycle_stats().get_aggregated().total_cycles, 2);
}

#[test]
fn test_collection_events_in_order() {
    let fixture = SpaceFixture::small();
    fixture.alloc(64);
    fixture.collect(false);

    let events: Vec<SpaceEvent> = fixture
        .events()
        .into_iter()
        .filter(|e| {
            matches!(
                e,
                SpaceEvent::EvacuationPlanned { .. } | SpaceEvent::FromSpaceCleared { .. }
            )
        })
        .collect();

    assert_eq!(
        events,
        vec![
            SpaceEvent::EvacuationPlanned {
                epoch: 2,
                evacuated_regions: 1,
                retained_regions: 0,
                evacuated_bytes: 64,
                forced: false,
            },
            SpaceEvent::FromSpaceCleared {
                epoch: 2,
                freed_regions: 1,
                freed_bytes: 64,
                promoted_regions: 0,
                bitmap_cleared_regions: 0,
            },
        ]
    );
    let json: serde_json::Value = serde_json::from_str(&events[0].to_json()).unwrap();
    assert_eq!(json["type"], "evacuation_planned");
}

#[test]
fn test_tlab_events_carry_usage() {
    let fixture = SpaceFixture::small();
    let registry = ThreadRegistry::new();
    let thread = registry.register("A").unwrap();

    fixture.space.alloc_thread_local(&thread, 24, 8).unwrap();
    fixture.space.alloc_thread_local(&thread, 40, 8).unwrap();
    fixture.space.revoke_all_thread_local_buffers(&registry);

    assert!(fixture.events().contains(&SpaceEvent::TlabRevoked {
        thread: thread.id().as_u64(),
        region: 0,
        objects: 2,
        bytes: 64,
    }));
}

#[test]
fn test_walk_live_objects_skips_free_regions() {
    let fixture = SpaceFixture::small();
    let a = fixture.alloc(64);
    let b = fixture.alloc(64);
    let bitmap = fixture.space.live_bitmap();
    bitmap.set(a.addr);
    bitmap.set(b.addr);
    // Stale mark in a Free region is never visited
    bitmap.set(fixture.region_begin(6));

    let mut seen = Vec::new();
    fixture.space.walk_live_objects(|addr| seen.push(addr));

    assert_eq!(seen, vec![a.addr, b.addr]);
}

// ============================================================================
// Read-barrier table
// ============================================================================

#[test]
fn test_read_barrier_table_kept_in_step() {
    let fixture = SpaceFixture::small();
    let table = RegionTrapTable::new(fixture.space.begin(), fixture.space.capacity(), REGION);
    fixture.alloc(64);
    fixture.space.alloc_large(REGION + 8).unwrap();

    fixture.space.set_from_space(Some(&table), false);

    // Set for non-free regions, cleared for free ones
    assert_eq!(table.count_set(), 3);
    assert!(table.is_set(fixture.region_begin(0)));
    assert!(table.is_set(fixture.region_begin(2)));
    assert!(!table.is_set(fixture.region_begin(3)));
    assert!(!table.is_all_cleared());
}

// ============================================================================
// Construction and configuration
// ============================================================================

#[test]
fn test_invalid_configurations_rejected() {
    let bad = [
        SpaceConfig {
            region_size: 3 * 4096,
            ..Default::default()
        },
        SpaceConfig {
            capacity: REGION + 1,
            ..Default::default()
        },
        SpaceConfig {
            capacity: 0,
            ..Default::default()
        },
        SpaceConfig {
            evacuate_live_percent_threshold: 101,
            ..Default::default()
        },
        SpaceConfig {
            alignment: 12,
            ..Default::default()
        },
    ];
    for config in bad {
        let result = RegionSpace::create(config.clone());
        assert!(
            matches!(result, Err(RgcError::Configuration(_))),
            "accepted {:?}",
            config
        );
    }
}

#[test]
fn test_threshold_is_configurable() {
    let fixture = SpaceFixture::with_config(SpaceConfig {
        name: "aggressive".to_string(),
        capacity: 8 * REGION,
        evacuate_live_percent_threshold: 90,
        ..Default::default()
    });
    fixture.fill_survivor_regions(1);
    // 80% live: retained at 75, evacuated at 90
    fixture.space.record_live_bytes(0, REGION * 8 / 10).unwrap();

    let plan = fixture.space.set_from_space(None, false);
    assert_eq!(plan.evacuated_regions, 1);
}

#[test]
fn test_mem_map_failure_is_heap_initialization() {
    let result = RegionSpace::create_mem_map("broken", REGION + 4096, REGION);
    assert!(matches!(result, Err(RgcError::HeapInitialization(_))));

    let result = RegionSpace::create_mem_map("broken", 4 * REGION, 3 * 4096);
    assert!(matches!(result, Err(RgcError::HeapInitialization(_))));
}

#[test]
fn test_registry_shutdown_refuses_new_threads() {
    let registry = ThreadRegistry::new();
    registry.register("early").unwrap();
    registry.begin_shutdown();

    assert!(registry.is_shutting_down());
    assert!(matches!(
        registry.register("late"),
        Err(RgcError::InvalidState { .. })
    ));
    assert_eq!(registry.len(), 1);
}
