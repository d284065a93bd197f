//! Property-based test suites for the servient core.
//!
//! These use proptest to validate the correctness properties of the
//! subscription ids, the change bus and the TD document round-trip.

pub mod bus_tests;
