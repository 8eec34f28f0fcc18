// tests/property_test.rs

//! Property-based tests for the coordinator.
//!
//! These verify invariants that should hold regardless of input values:
//! the statistics combining algebra and the metadata round-trips.

mod property {
    pub mod meta_roundtrip_test;
    pub mod stat_algebra_test;
}
