//! Region Space Concurrency Tests
//!
//! Many threads allocating through the shared cursor, TLABs and the
//! evacuation cursor at once. Every allocation must be disjoint and the
//! per-region accounting must add up once the threads are done.

mod common;

use common::{assert_counter_consistent, assert_disjoint, assert_verified, SpaceFixture, REGION};
use rgc::{Allocation, ThreadRegistry};
use std::sync::{Arc, Barrier};
use std::thread;

const THREADS: usize = 8;

#[test]
fn test_concurrent_shared_allocation_is_disjoint() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let barrier = Arc::new(Barrier::new(THREADS));
    let per_thread = 1000;
    let size = 256;

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread)
                    .map(|_| fixture.space.alloc(size, 8).unwrap())
                    .collect::<Vec<Allocation>>()
            })
        })
        .collect();

    let allocations: Vec<Allocation> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_eq!(allocations.len(), THREADS * per_thread);
    assert!(allocations.iter().all(|a| fixture.space.contains(a.addr)));
    assert_disjoint(&allocations);

    // Sizes are multiples of the alignment, so regions hold no padding
    assert_eq!(fixture.space.bytes_allocated(), THREADS * per_thread * size);
    assert_verified(&fixture.space);
    assert_counter_consistent(&fixture.space);
}

#[test]
fn test_concurrent_mixed_sizes_across_region_boundaries() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..200)
                    .map(|i| {
                        let size = 8 * (1 + (t * 31 + i * 17) % 512);
                        fixture.space.alloc(size, 8).unwrap()
                    })
                    .collect::<Vec<Allocation>>()
            })
        })
        .collect();

    let allocations: Vec<Allocation> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();

    assert_disjoint(&allocations);
    for a in &allocations {
        let index = fixture.space.region_index_of(a.addr).unwrap();
        let region = fixture.snapshot(index);
        // No object straddles a region boundary
        assert!(a.addr + a.bytes_allocated <= region.end());
        assert!(a.addr + a.bytes_allocated <= region.top());
    }
    assert_verified(&fixture.space);
}

#[test]
fn test_concurrent_tlab_allocation_then_revoke_all() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let registry = Arc::new(ThreadRegistry::new());
    let barrier = Arc::new(Barrier::new(THREADS));
    let per_thread = 2000;
    let size = 64;

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let fixture = Arc::clone(&fixture);
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let me = registry.register(format!("mutator-{}", t)).unwrap();
                barrier.wait();
                (0..per_thread)
                    .map(|_| fixture.space.alloc_thread_local(&me, size, 8).unwrap())
                    .collect::<Vec<Allocation>>()
            })
        })
        .collect();

    let allocations: Vec<Allocation> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_disjoint(&allocations);
    assert_eq!(registry.len(), THREADS);

    fixture.space.revoke_all_thread_local_buffers(&registry);
    fixture.space.assert_all_thread_local_buffers_revoked(&registry);

    assert_eq!(fixture.space.objects_allocated(), THREADS * per_thread);
    assert_eq!(fixture.space.bytes_allocated(), THREADS * per_thread * size);
    assert_eq!(fixture.space.stats().tlab_regions, 0);
    assert_verified(&fixture.space);
}

#[test]
fn test_concurrent_mutator_and_evacuation_cursors() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..500)
                    .map(|_| {
                        if t % 2 == 0 {
                            fixture.space.alloc(128, 8).unwrap()
                        } else {
                            fixture.space.alloc_for_evacuation(128, 8).unwrap()
                        }
                    })
                    .collect::<Vec<Allocation>>()
            })
        })
        .collect();

    let allocations: Vec<Allocation> = handles
        .into_iter()
        .flat_map(|h| h.join().unwrap())
        .collect();
    assert_disjoint(&allocations);

    // Mutator and survivor objects never share a region
    let newly: Vec<bool> = allocations
        .iter()
        .map(|a| {
            let index = fixture.space.region_index_of(a.addr).unwrap();
            fixture.snapshot(index).is_newly_allocated()
        })
        .collect();
    let mutator_objects = newly.iter().filter(|&&n| n).count();
    assert_eq!(mutator_objects, THREADS / 2 * 500);
    assert_verified(&fixture.space);
}

#[test]
fn test_concurrent_large_allocation_and_free() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let fixture = Arc::clone(&fixture);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    let large = fixture.space.alloc_large(2 * REGION + 8).unwrap();
                    fixture
                        .space
                        .free_large(large.addr, large.bytes_allocated)
                        .unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(fixture.space.num_non_free_regions(), 0);
    assert_verified(&fixture.space);
}

#[test]
fn test_registry_churn_during_revocation() {
    let fixture = Arc::new(SpaceFixture::with_regions(64));
    let registry = Arc::new(ThreadRegistry::new());
    let barrier = Arc::new(Barrier::new(5));
    let rounds = 6;

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let fixture = Arc::clone(&fixture);
            let registry = Arc::clone(&registry);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for round in 0..rounds {
                    let me = registry.register(format!("w{}-{}", t, round)).unwrap();
                    assert!(fixture.space.alloc_new_tlab(&me));
                    fixture.space.revoke_thread_local_buffers(&me);
                    assert!(!me.has_tlab());
                    registry.unregister(me.id());
                }
            })
        })
        .collect();

    barrier.wait();
    for _ in 0..50 {
        fixture.space.revoke_all_thread_local_buffers(&registry);
    }
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(registry.is_empty());
    assert_eq!(fixture.space.num_non_free_regions(), 4 * rounds);
    assert_eq!(fixture.space.stats().tlab_regions, 0);
    assert_verified(&fixture.space);
}
