//! Property-based tests for subscription ids and change-bus fan-out.

use proptest::prelude::*;
use std::collections::HashSet;

use crate::bus::{ChangeBus, PropertyChangeEvent, SubscriptionId};

// =============================================================================
// Subscription ID uniqueness and format
// =============================================================================

proptest! {
    /// For any number of generated subscription ids, all are unique, render
    /// with the `sub_` prefix and parse back to themselves.
    #[test]
    fn prop_subscription_id_uniqueness(count in 1usize..500) {
        let mut seen = HashSet::new();
        for _ in 0..count {
            let id = SubscriptionId::new();
            let rendered = id.to_string();

            prop_assert!(rendered.starts_with("sub_"), "missing prefix: {}", rendered);
            prop_assert_eq!(rendered.len(), 40, "unexpected length: {}", &rendered);
            prop_assert_eq!(SubscriptionId::parse(&rendered).unwrap(), id);
            prop_assert!(seen.insert(id), "duplicate id: {}", rendered);
        }
        prop_assert_eq!(seen.len(), count);
    }
}

// =============================================================================
// Ordered delivery below capacity
// =============================================================================

proptest! {
    /// For any burst of writes below the queue capacity, every subscriber
    /// present before the first write sees exactly the written sequence, in
    /// order, with no loss flagged.
    #[test]
    fn prop_ordered_lossless_delivery_below_capacity(
        values in prop::collection::vec(any::<i64>(), 1..60),
        subscriber_count in 1usize..4,
    ) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let bus = ChangeBus::new(64);
            let mut subscribers: Vec<_> = (0..subscriber_count)
                .map(|_| bus.observe_property("p"))
                .collect();

            for value in &values {
                bus.publish_property_change(PropertyChangeEvent {
                    name: "p".to_string(),
                    value: serde_json::json!(value),
                });
            }

            for subscriber in &mut subscribers {
                for expected in &values {
                    let delivery = subscriber.recv().await.unwrap();
                    assert_eq!(delivery.item.value, serde_json::json!(expected));
                    assert!(!delivery.lost_events);
                }
                assert!(subscriber.try_recv().is_none());
            }
        });
    }
}

// =============================================================================
// Overflow keeps the newest events
// =============================================================================

proptest! {
    /// For any burst larger than the queue capacity, the subscriber is
    /// flagged as lossy exactly once and still receives the newest events
    /// in order.
    #[test]
    fn prop_overflow_drops_oldest(extra in 1usize..50) {
        tokio::runtime::Runtime::new().unwrap().block_on(async {
            let capacity = 16usize;
            let total = capacity + extra;

            let bus = ChangeBus::new(capacity);
            let mut subscriber = bus.observe_property("p");

            for i in 0..total {
                bus.publish_property_change(PropertyChangeEvent {
                    name: "p".to_string(),
                    value: serde_json::json!(i),
                });
            }

            let first = subscriber.recv().await.unwrap();
            assert!(first.lost_events, "overflow must be flagged");
            assert_eq!(first.item.value, serde_json::json!(total - capacity));

            for i in (total - capacity + 1)..total {
                let delivery = subscriber.recv().await.unwrap();
                assert!(!delivery.lost_events);
                assert_eq!(delivery.item.value, serde_json::json!(i));
            }
        });
    }
}
