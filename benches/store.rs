//! Benchmarks for the store hot paths using divan.
//!
//! Run with: `cargo bench --bench store`

use divan::{black_box, Bencher};
use nodestore::{NodeClass, NodeId, NodeMap};

fn main() {
    divan::main();
}

fn populated(n: u32) -> NodeMap {
    let store = NodeMap::new();
    for v in 0..n {
        let mut node = store.new_node(NodeClass::Variable);
        node.head_mut().node_id = NodeId::numeric(0, v + 1);
        node.head_mut().display_name = "bench".into();
        store.insert(node).unwrap();
    }
    store
}

// =============================================================================
// Lookup paths
// =============================================================================

mod lookup {
    use super::{black_box, populated, Bencher, NodeId};

    #[divan::bench(sample_count = 100, sample_size = 1000)]
    fn read_hit(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        let id = NodeId::numeric(0, 501);
        bencher.bench_local(|| black_box(store.read(black_box(&id), |n| n.head().write_mask)));
    }

    #[divan::bench(sample_count = 100, sample_size = 1000)]
    fn read_miss(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        let id = NodeId::numeric(0, 1_000_001);
        bencher.bench_local(|| black_box(store.read(black_box(&id), |n| n.head().write_mask)));
    }

    #[divan::bench(sample_count = 100, sample_size = 1000)]
    fn get_release(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        let id = NodeId::numeric(0, 501);
        bencher.bench_local(|| {
            let pinned = store.get(black_box(&id)).unwrap();
            black_box(pinned.head().write_mask);
            store.release(pinned);
        });
    }
}

// =============================================================================
// Mutation paths
// =============================================================================

mod mutation {
    use super::{black_box, populated, Bencher, NodeClass, NodeId, NodeMap};

    #[divan::bench(sample_count = 50, sample_size = 100)]
    fn insert_remove(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        let id = NodeId::numeric(1, 7);
        bencher.bench_local(|| {
            let mut node = store.new_node(NodeClass::Object);
            node.head_mut().node_id = id.clone();
            store.insert(node).unwrap();
            store.remove(black_box(&id)).unwrap();
        });
    }

    #[divan::bench(sample_count = 50, sample_size = 100)]
    fn copy_replace(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        let id = NodeId::numeric(0, 501);
        bencher.bench_local(|| {
            let mut copy = store.get_copy(black_box(&id)).unwrap();
            copy.head_mut().write_mask ^= 1;
            store.replace(copy).unwrap();
        });
    }

    #[divan::bench(sample_count = 20, sample_size = 10)]
    fn insert_1k_with_growth(bencher: Bencher<'_, '_>) {
        bencher
            .with_inputs(NodeMap::new)
            .bench_local_values(|store| {
                for v in 0..1_000u32 {
                    let mut node = store.new_node(NodeClass::Variable);
                    node.head_mut().node_id = NodeId::numeric(0, v + 1);
                    store.insert(node).unwrap();
                }
                store
            });
    }
}

// =============================================================================
// Scans
// =============================================================================

mod scan {
    use super::{black_box, populated, Bencher};

    #[divan::bench(sample_count = 50, sample_size = 10)]
    fn iterate_1k(bencher: Bencher<'_, '_>) {
        let store = populated(1_000);
        bencher.bench_local(|| {
            let mut total = 0u64;
            store.iterate(|node| total += u64::from(node.head().write_mask));
            black_box(total)
        });
    }
}
