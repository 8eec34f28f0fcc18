// tests/property/meta_roundtrip_test.rs

//! Metadata encodings survive a pack/parse round trip, and re-packing is
//! byte-stable.

use mastermind::core::topology::{CoupleId, CoupleMeta, DEFAULT_NAMESPACE, GroupMeta};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_v2_meta_round_trip(
        couple in prop::collection::vec(1u32..10_000, 1..6),
        namespace in "[a-z][a-z0-9]{0,10}",
        frozen in any::<bool>(),
    ) {
        let meta = GroupMeta {
            version: 2,
            couple,
            namespace,
            frozen,
        };
        let blob = meta.pack().unwrap();
        let parsed = GroupMeta::parse(&blob).unwrap();
        prop_assert_eq!(&parsed, &meta);
        prop_assert_eq!(parsed.pack().unwrap(), blob);
    }

    #[test]
    fn prop_v1_meta_normalises_to_default_namespace(
        couple in prop::collection::vec(1u32..10_000, 1..6),
    ) {
        let blob = rmp_serde::to_vec(&couple).unwrap();
        let parsed = GroupMeta::parse(&blob).unwrap();
        prop_assert_eq!(parsed.version, 1);
        prop_assert_eq!(parsed.couple, couple);
        prop_assert_eq!(parsed.namespace, DEFAULT_NAMESPACE);
        prop_assert!(!parsed.frozen);
    }

    #[test]
    fn prop_couple_meta_round_trip(frozen in any::<bool>()) {
        let meta = CoupleMeta { frozen };
        let parsed = CoupleMeta::parse(&meta.pack().unwrap()).unwrap();
        prop_assert_eq!(parsed, meta);
    }

    #[test]
    fn prop_couple_id_display_parse_round_trip(
        ids in prop::collection::vec(1u32..10_000, 1..6),
    ) {
        let id = CoupleId::new(ids);
        let parsed: CoupleId = id.to_string().parse().unwrap();
        prop_assert_eq!(parsed, id);
    }
}
