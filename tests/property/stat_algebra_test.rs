// tests/property/stat_algebra_test.rs

//! The `NodeStat` combining operations form commutative, associative
//! algebras: `+` aggregates a group, `*` bottlenecks a couple.

use mastermind::core::stats::NodeStat;
use proptest::prelude::*;

/// Integer-valued fields keep floating-point addition exact, so the
/// algebraic laws can be checked with strict equality.
fn arb_stat() -> impl Strategy<Value = NodeStat> {
    (
        (
            0u32..1_000_000,  // ts
            any::<u32>(),     // last_read
            any::<u32>(),     // last_write
            0u32..1_000_000,  // total_space
            0u32..1_000_000,  // free_space
            0u32..=1000,      // rel_space (thousandths)
        ),
        (
            0u32..10_000, // load_average
            0u32..10_000, // read_rps
            0u32..10_000, // write_rps
            0u32..10_000, // max_read_rps
            0u32..10_000, // max_write_rps
        ),
    )
        .prop_map(|((ts, lr, lw, total, free, rel), (la, rr, wr, mr, mw))| NodeStat {
            ts: ts as f64,
            last_read: lr as u64,
            last_write: lw as u64,
            total_space: total as f64,
            free_space: free as f64,
            rel_space: rel as f64 / 1000.0,
            load_average: la as f64,
            read_rps: rr as f64,
            write_rps: wr as f64,
            max_read_rps: mr as f64,
            max_write_rps: mw as f64,
        })
}

proptest! {
    #[test]
    fn prop_aggregate_is_commutative(a in arb_stat(), b in arb_stat()) {
        prop_assert_eq!(a + b, b + a);
    }

    #[test]
    fn prop_aggregate_is_associative(a in arb_stat(), b in arb_stat(), c in arb_stat()) {
        prop_assert_eq!((a + b) + c, a + (b + c));
    }

    #[test]
    fn prop_bottleneck_is_commutative(a in arb_stat(), b in arb_stat()) {
        prop_assert_eq!(a * b, b * a);
    }

    #[test]
    fn prop_bottleneck_is_associative(a in arb_stat(), b in arb_stat(), c in arb_stat()) {
        prop_assert_eq!((a * b) * c, a * (b * c));
    }

    #[test]
    fn prop_bottleneck_never_exceeds_members(a in arb_stat(), b in arb_stat()) {
        let combined = a * b;
        prop_assert!(combined.free_space <= a.free_space.min(b.free_space));
        prop_assert!(combined.max_write_rps <= a.max_write_rps.min(b.max_write_rps));
    }
}
