//! Property tests for invariants 1, 2 and 6.

mod common;

use std::sync::Arc;

use pacer::{Connection, Options};
use proptest::prelude::*;

use common::{descriptor, StubTransport};

fn options_with(depth: usize, update: f64) -> Options {
    Options {
        records: 200,
        depth,
        lambda: 0.0,
        ia: "fixed:0".to_string(),
        keysize: "fixed:8".to_string(),
        valuesize: "fixed:16".to_string(),
        update,
        time: 0.05,
        moderate: false,
        skip: false,
        no_nodelay: false,
        loadonly: false,
    }
}

proptest! {
    /// Invariant 1: queue size never exceeds `options.depth`, checked after
    /// every response the run loop processes.
    #[test]
    fn queue_never_exceeds_depth(depth in 1usize..8, seed in any::<u64>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(StubTransport::new(200).with_rx_bytes(16));
            let mut conn =
                Connection::new(transport, &descriptor(), options_with(depth, 0.3), false, seed)
                    .unwrap();
            conn.start(0.0).unwrap();

            for _ in 0..40 {
                prop_assert!(conn.queue_size() <= depth);
                let Some(ev) = conn.recv_response().await else {
                    break;
                };
                conn.handle_response(ev).unwrap();
                prop_assert!(conn.queue_size() <= depth);
            }
            Ok(())
        })?;
    }

    /// Invariant 2: completed operations never report negative latency.
    #[test]
    fn completed_ops_have_nonnegative_latency(depth in 1usize..6, seed in any::<u64>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(StubTransport::new(200).with_rx_bytes(8));
            let mut conn =
                Connection::new(transport, &descriptor(), options_with(depth, 0.5), false, seed)
                    .unwrap();
            conn.start(0.0).unwrap();

            for _ in 0..30 {
                let Some(ev) = conn.recv_response().await else {
                    break;
                };
                conn.handle_response(ev).unwrap();
            }
            // No panics and no InvariantViolation means every finish_op()
            // saw end_time >= start_time, which is all Operation::finish
            // ever allows by construction.
            prop_assert!(conn.stats().gets() + conn.stats().posts() > 0);
            Ok(())
        })?;
    }

    /// Invariant 6: ops == gets + posts + (misses are a subset of ops, not
    /// additional to it).
    #[test]
    fn ops_accounts_for_every_completion(seed in any::<u64>()) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let transport = Arc::new(StubTransport::new(404).with_rx_bytes(8));
            let mut conn =
                Connection::new(transport, &descriptor(), options_with(2, 0.5), false, seed)
                    .unwrap();
            conn.start(0.0).unwrap();

            for _ in 0..20 {
                let Some(ev) = conn.recv_response().await else {
                    break;
                };
                conn.handle_response(ev).unwrap();
            }
            // ops == gets + posts only holds at quiescence: stop the writer
            // from reissuing and drain whatever is still outstanding before
            // comparing, since depth > 1 otherwise leaves ops ahead of
            // gets()+posts() by up to `depth` while ops are still in flight.
            conn.stop();
            while conn.queue_size() > 0 {
                let Some(ev) = conn.recv_response().await else {
                    break;
                };
                conn.handle_response(ev).unwrap();
            }
            let stats = conn.stats();
            prop_assert_eq!(stats.ops, stats.gets() + stats.posts());
            prop_assert!(stats.get_misses <= stats.ops);
            Ok(())
        })?;
    }
}
