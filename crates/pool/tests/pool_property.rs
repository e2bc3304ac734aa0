//! Property tests for pool accounting invariants.
//!
//! After any sequence of acquire, release and destroy calls:
//! `size == available + in_use + creating` and `size <= max_size`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use nebula_pool::{Factory, Pool, PoolConfig, PoolStats, Pooled};
use proptest::prelude::*;

// ---------------------------------------------------------------------------
// Test factory
// ---------------------------------------------------------------------------

struct Counting {
    next: AtomicU64,
}

impl Factory for Counting {
    type Resource = u64;
    type Error = std::io::Error;

    async fn create(&self) -> std::io::Result<u64> {
        Ok(self.next.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: u64) -> std::io::Result<()> {
        Ok(())
    }

    fn validate(&self, resource: &u64) -> bool {
        // Every seventh resource goes stale.
        resource % 7 != 6
    }
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Acquire,
    Release,
    Destroy,
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => Just(Op::Acquire),
        2 => Just(Op::Release),
        1 => Just(Op::Destroy),
    ]
}

fn check(stats: &PoolStats, max_size: usize) -> Result<(), TestCaseError> {
    prop_assert_eq!(
        stats.size,
        stats.available + stats.in_use + stats.creating,
        "unaccounted resources: {:?}",
        stats
    );
    prop_assert!(stats.size <= max_size, "size above max: {:?}", stats);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn accounting_holds_for_any_sequence(
        max_size in 1usize..6,
        min_fraction in 0usize..=100,
        max_uses in prop_oneof![Just(None), (1usize..4).prop_map(Some)],
        ops in proptest::collection::vec(arb_op(), 1..40),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        rt.block_on(async {
            let min_size = max_size * min_fraction / 100;
            let pool = Pool::new(
                Counting { next: AtomicU64::new(0) },
                PoolConfig {
                    min_size,
                    max_size,
                    max_uses,
                    acquire_timeout: Duration::from_millis(50),
                    ..Default::default()
                },
            )
            .unwrap();
            let mut held: Vec<Pooled<u64>> = Vec::new();

            for op in &ops {
                match op {
                    Op::Acquire => {
                        // Exhaustion ends in a timeout, which is fine.
                        if let Ok(guard) = pool.acquire().await {
                            held.push(guard);
                        }
                    }
                    Op::Release => {
                        if let Some(guard) = held.pop() {
                            pool.release(guard);
                        }
                    }
                    Op::Destroy => {
                        if let Some(guard) = held.pop() {
                            pool.destroy(guard);
                        }
                    }
                }
                check(&pool.stats(), max_size)?;
                prop_assert_eq!(pool.in_use(), held.len());

                tokio::time::sleep(Duration::from_millis(5)).await;
                let stats = pool.stats();
                check(&stats, max_size)?;
                prop_assert_eq!(stats.creating, 0);
            }

            drop(held);
            let stats = pool.stats();
            check(&stats, max_size)?;
            prop_assert_eq!(stats.in_use, 0);
            prop_assert_eq!(stats.waiting, 0);

            Ok(())
        })?;
    }
}
