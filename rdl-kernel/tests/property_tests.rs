//! Property-based checks for the invariants that matter independent of
//! any one example: wrap-around addressing and event ordering.

use proptest::prelude::*;
use rdl_kernel::torus::{Cell, LATTICE_DIM};
use rdl_kernel::RdlKernel;

proptest! {
    #[test]
    fn cell_coordinates_are_always_in_range(x in any::<i32>(), y in any::<i32>(), z in any::<i32>()) {
        let c = Cell::new(x, y, z);
        prop_assert!(c.x >= 0 && c.x < LATTICE_DIM);
        prop_assert!(c.y >= 0 && c.y < LATTICE_DIM);
        prop_assert!(c.z >= 0 && c.z < LATTICE_DIM);
    }

    #[test]
    fn node_id_roundtrips_for_any_in_range_coordinate(
        x in 0..LATTICE_DIM,
        y in 0..LATTICE_DIM,
        z in 0..LATTICE_DIM,
    ) {
        let c = Cell::new(x, y, z);
        let id = c.node_id();
        prop_assert_eq!(Cell::from_node_id(id), c);
    }

    #[test]
    fn wrap_is_idempotent(x in any::<i32>()) {
        let once = Cell::new(x, 0, 0);
        let twice = Cell::new(once.x, 0, 0);
        prop_assert_eq!(once, twice);
    }

    #[test]
    fn events_are_always_delivered_in_nondecreasing_timestamp_order(
        payloads in prop::collection::vec(any::<i32>(), 0..64),
    ) {
        let mut k = RdlKernel::new();
        k.spawn_process(0, 0, 0);
        for &payload in &payloads {
            k.inject_event((0, 0, 0), (0, 0, 0), payload);
        }
        let mut last_time = 0u64;
        loop {
            let delivered = k.run(1);
            if delivered == 0 {
                break;
            }
            prop_assert!(k.current_time() >= last_time);
            last_time = k.current_time();
        }
    }

    #[test]
    fn process_count_never_exceeds_requested_spawns_when_within_capacity(
        n in 0usize..16,
    ) {
        let mut k = RdlKernel::new();
        let mut spawned = 0usize;
        for i in 0..n {
            let (ok, _) = k.spawn_process(i as i32, 0, 0);
            if ok {
                spawned += 1;
            }
        }
        prop_assert_eq!(k.process_count(), spawned);
    }
}
