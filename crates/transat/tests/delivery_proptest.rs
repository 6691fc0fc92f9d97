use std::collections::HashSet;
use std::sync::Arc;

use proptest::prelude::*;
use transat::{FaillibleStorage, FailurePlan, PublisherConfig, ResilientPublisher};

/// Current-thread runtime with a paused clock: retry sleeps cost no wall time.
fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .expect("runtime")
}

proptest! {
    /// Dropping the first k writes costs exactly k extra attempts on that backend.
    #[test]
    fn drop_first_k_costs_k_plus_one(ka in 0..20u64, kb in 0..20u64, message in any::<u32>()) {
        let a = Arc::new(FaillibleStorage::new("a", FailurePlan::DropFirst(ka)));
        let b = Arc::new(FaillibleStorage::new("b", FailurePlan::DropFirst(kb)));
        let p: ResilientPublisher<u32> =
            ResilientPublisher::pair(a.clone(), b.clone(), PublisherConfig::new());

        runtime().block_on(p.send(message)).expect("send");

        prop_assert_eq!(a.store_calls(), ka + 1);
        prop_assert_eq!(b.store_calls(), kb + 1);
    }

    /// Whatever the drop pattern, every sent message ends up held once in each
    /// backend, and re-sending everything issues no further writes.
    #[test]
    fn eventual_delivery_without_duplicates(
        messages in prop::collection::vec(0..50u32, 1..40),
        rate_a in 0.0..0.9f64,
        rate_b in 0.0..0.9f64,
        seed in any::<u64>(),
    ) {
        let a = Arc::new(FaillibleStorage::new(
            "a",
            FailurePlan::Random { drop_rate: rate_a, seed },
        ));
        let b = Arc::new(FaillibleStorage::new(
            "b",
            FailurePlan::Random { drop_rate: rate_b, seed: seed.wrapping_add(1) },
        ));
        let p: ResilientPublisher<u32> =
            ResilientPublisher::pair(a.clone(), b.clone(), PublisherConfig::new().unbounded());

        let rt = runtime();
        for m in &messages {
            rt.block_on(p.send(*m)).expect("send");
        }

        let expected: HashSet<u32> = messages.iter().copied().collect();
        prop_assert_eq!(a.values(), expected.clone());
        prop_assert_eq!(b.values(), expected);

        let calls = (a.store_calls(), b.store_calls());
        for m in &messages {
            rt.block_on(p.send(*m)).expect("resend");
        }
        prop_assert_eq!((a.store_calls(), b.store_calls()), calls);
    }
}
