//! Table-driven tests for the event status roll-up.
//!
//! The roll-up is the single source of truth for Event.status; every
//! delivery transition funnels through it, so the decision table is pinned
//! here case by case.

use fanout_core::DeliveryStatus::{Dead, Failed, Pending, Sent};
use fanout_core::{rollup_status, DeliveryStatus, EventStatus};

#[test]
fn rollup_decision_table() {
    let cases: &[(&[DeliveryStatus], EventStatus)] = &[
        (&[], EventStatus::Delivered),
        (&[Sent], EventStatus::Delivered),
        (&[Sent, Sent], EventStatus::Delivered),
        (&[Dead], EventStatus::Dead),
        (&[Dead, Dead], EventStatus::Dead),
        (&[Sent, Dead], EventStatus::PartiallyDelivered),
        (&[Dead, Sent, Sent], EventStatus::PartiallyDelivered),
        (&[Pending, Sent], EventStatus::Processing),
        (&[Pending], EventStatus::Processing),
        (&[Failed], EventStatus::Processing),
        (&[Failed, Dead], EventStatus::Processing),
        (&[Pending, Failed, Sent, Dead], EventStatus::Processing),
    ];

    for (deliveries, expected) in cases {
        assert_eq!(
            rollup_status(deliveries),
            *expected,
            "deliveries {deliveries:?} should roll up to {expected:?}"
        );
    }
}

#[test]
fn rollup_is_order_insensitive() {
    let forward = [Sent, Dead, Pending];
    let reverse = [Pending, Dead, Sent];

    assert_eq!(rollup_status(&forward), rollup_status(&reverse));
}

#[test]
fn terminal_mix_requires_both_outcomes() {
    // One terminal kind alone never yields the partial state.
    assert_ne!(rollup_status(&[Sent, Sent]), EventStatus::PartiallyDelivered);
    assert_ne!(rollup_status(&[Dead, Dead]), EventStatus::PartiallyDelivered);
}
