use crate::lookup::{Lookup, LookupError, NUM_SLOTS};

#[test]
fn resolve_is_deterministic() {
    let lookup = Lookup::new(4).unwrap();
    let a = lookup.resolve("temperature.room1");
    let b = lookup.resolve("temperature.room1");
    assert_eq!(a, b);
}

#[test]
fn resolve_stays_in_bounds() {
    let lookup = Lookup::new(3).unwrap();
    for i in 0..2000 {
        let name = format!("series-{i}");
        let pool = lookup.resolve(&name);
        assert!(pool < 3);
    }
}

#[test]
fn new_rejects_zero_pools() {
    assert!(matches!(Lookup::new(0), Err(LookupError::NoPools)));
}

#[test]
fn rebuild_grows_minimally() {
    let lookup = Lookup::new(2).unwrap();
    let before: Vec<usize> = (0..NUM_SLOTS).collect();
    let owners_before: Vec<usize> = before
        .iter()
        .map(|slot_name| lookup.resolve(&format!("s{slot_name}")))
        .collect();

    lookup.rebuild(3).unwrap();
    assert_eq!(lookup.pool_count(), 3);

    // Not every series should have moved pools; growth should be partial.
    let owners_after: Vec<usize> = before
        .iter()
        .map(|slot_name| lookup.resolve(&format!("s{slot_name}")))
        .collect();
    let moved = owners_before
        .iter()
        .zip(owners_after.iter())
        .filter(|(a, b)| a != b)
        .count();
    assert!(moved > 0, "growth should reassign at least one series");
    assert!(
        moved < owners_before.len(),
        "growth should not reassign every series"
    );
    // Growing 2 -> 3 pools should move roughly NUM_SLOTS/3 slots total, not
    // a single slot.
    let expected = NUM_SLOTS / 3;
    assert!(
        moved > expected / 2,
        "expected growth to move close to {expected} slots, only moved {moved}"
    );
}

#[test]
fn rebuild_gives_each_new_pool_its_fair_share_of_slots() {
    // spec.md §4.1: growing from N to N+1 pools moves ~NUM_SLOTS/(N+1)
    // slots to the new pool, not a single slot total.
    let lookup = Lookup::new(1).unwrap();
    lookup.rebuild(2).unwrap();

    let counts = lookup.slot_counts();
    assert_eq!(counts.len(), 2);
    assert_eq!(counts.iter().sum::<usize>(), NUM_SLOTS);

    let target = NUM_SLOTS / 2;
    let tolerance = NUM_SLOTS / 16;
    for (pool, &count) in counts.iter().enumerate() {
        assert!(
            count.abs_diff(target) <= tolerance,
            "pool {pool} owns {count} slots, expected close to {target}"
        );
    }
}

#[test]
fn rebuild_from_one_to_three_pools_splits_slots_across_both_new_pools() {
    let lookup = Lookup::new(1).unwrap();
    lookup.rebuild(3).unwrap();

    let counts = lookup.slot_counts();
    assert_eq!(counts.len(), 3);
    assert_eq!(counts.iter().sum::<usize>(), NUM_SLOTS);

    let target = NUM_SLOTS / 3;
    let tolerance = NUM_SLOTS / 16;
    for (pool, &count) in counts.iter().enumerate() {
        assert!(
            count.abs_diff(target) <= tolerance,
            "pool {pool} owns {count} slots, expected close to {target}"
        );
    }
}

#[test]
fn rebuild_bumps_generation() {
    let lookup = Lookup::new(2).unwrap();
    assert_eq!(lookup.generation(), 0);
    lookup.rebuild(3).unwrap();
    assert_eq!(lookup.generation(), 1);
    // Rebuilding to the same count is a no-op.
    lookup.rebuild(3).unwrap();
    assert_eq!(lookup.generation(), 1);
}

#[test]
fn rebuild_rejects_too_many_pools() {
    let lookup = Lookup::new(1).unwrap();
    let err = lookup.rebuild(u32::from(u16::MAX) as usize + 1).unwrap_err();
    assert!(matches!(err, LookupError::TooManyPools(_, _)));
}
