//! Property-based kernel tests (proptest).

use proptest::prelude::*;

use alsh_index::expand::expand_parallel;
use alsh_index::scatter::zero_fill_missing_parallel;
use alsh_index::votes::count_votes_parallel;
use alsh_index::{
    count_votes, expand, most_freq, open_index, zero_fill_missing, Backend, Device,
    ExecutionConfig, HashInitParams, ItemId, KernelOp, LaunchPlan, SignRandomProjection, Tensor4,
};

fn plan(op: KernelOp, n: usize) -> LaunchPlan {
    LaunchPlan::compile(op, n, 4, 8)
}

proptest! {
    #[test]
    fn prop_tally_is_a_histogram(
        ids in prop::collection::vec(0u64..1_000, 0..300),
        table_size in 1usize..64,
    ) {
        let tally = count_votes(&ids, table_size).unwrap();
        prop_assert_eq!(tally.len(), table_size);
        prop_assert_eq!(tally.iter().sum::<u64>(), ids.len() as u64);
        for (b, &count) in tally.iter().enumerate() {
            let expected = ids.iter().filter(|&&id| (id % table_size as u64) as usize == b).count();
            prop_assert_eq!(count, expected as u64);
        }
    }

    #[test]
    fn prop_parallel_tally_matches_sequential(
        ids in prop::collection::vec(any::<u64>(), 0..2_000),
        table_size in 1usize..128,
    ) {
        let sequential = count_votes(&ids, table_size).unwrap();
        let parallel = count_votes_parallel(&ids, table_size, &plan(KernelOp::CountVotes, ids.len())).unwrap();
        prop_assert_eq!(sequential, parallel);
    }

    #[test]
    fn prop_top_k_ordering(
        tally in prop::collection::vec(0u64..10, 1..40),
        k_seed in any::<usize>(),
    ) {
        let k = k_seed % (tally.len() + 1);
        let top = most_freq(&tally, k).unwrap();
        prop_assert_eq!(top.len(), k);

        // descending by count, ascending id on ties
        for pair in top.windows(2) {
            let (a, b) = (pair[0] as usize, pair[1] as usize);
            prop_assert!(tally[a] > tally[b] || (tally[a] == tally[b] && a < b));
        }
        // nothing left out beats the last pick
        if let Some(&last) = top.last() {
            let last = last as usize;
            for b in 0..tally.len() {
                if !top.contains(&(b as u64)) {
                    prop_assert!(tally[b] < tally[last] || (tally[b] == tally[last] && b > last));
                }
            }
        }
    }

    #[test]
    fn prop_top_k_rejects_k_above_table_size(len in 1usize..20, extra in 1usize..5) {
        prop_assert!(most_freq(&vec![1; len], len + extra).is_err());
    }

    #[test]
    fn prop_expand_covers_each_window(
        selected in prop::collection::vec(0u64..10_000, 0..50),
        kernel_size in 1usize..6,
    ) {
        let area = (kernel_size * kernel_size) as u64;
        let out = expand(&selected, kernel_size).unwrap();
        prop_assert_eq!(out.len(), selected.len() * area as usize);
        for (window, &id) in out.chunks(area as usize).zip(&selected) {
            let expected: Vec<u64> = (id * area..id * area + area).collect();
            prop_assert_eq!(window, expected.as_slice());
        }
        let parallel = expand_parallel(&selected, kernel_size, &plan(KernelOp::Expand, selected.len())).unwrap();
        prop_assert_eq!(out, parallel);
    }

    #[test]
    fn prop_scatter_places_channels(
        full in 1usize..8,
        picks in prop::collection::vec(any::<prop::sample::Index>(), 1..8),
        batch in 1usize..3,
    ) {
        let mut indices: Vec<usize> = picks.iter().map(|p| p.index(full)).collect();
        indices.sort_unstable();
        indices.dedup();
        let c = indices.len();
        let computed = Tensor4::from_vec(
            [batch, c, 2, 1],
            (0..batch * c * 2).map(|v| v as f32 + 1.0).collect(),
            Device::Cpu,
        ).unwrap();
        let shape = [batch, full, 2, 1];

        let out = zero_fill_missing(computed.clone(), Some(&indices), shape, Device::Cpu).unwrap();
        prop_assert_eq!(out.shape(), shape);
        for n in 0..batch {
            for ch in 0..full {
                match indices.iter().position(|&p| p == ch) {
                    Some(j) => prop_assert_eq!(out.plane(n, ch), computed.plane(n, j)),
                    None => prop_assert!(out.plane(n, ch).iter().all(|&v| v == 0.0)),
                }
            }
        }
        let parallel = zero_fill_missing_parallel(computed, Some(&indices), shape, Device::Cpu).unwrap();
        prop_assert_eq!(out, parallel);
    }

    #[test]
    fn prop_insert_conserves_entries(
        raw in prop::collection::vec(prop::collection::vec(-4.0f32..4.0, 3), 1..40),
        seed in any::<u64>(),
    ) {
        let bank = SignRandomProjection::new(2, 8, HashInitParams { seed }, 3, 3).unwrap();
        let index = open_index(Backend::Cpu, Box::new(bank), raw.len(), &ExecutionConfig::default()).unwrap();
        let rows: Vec<&[f32]> = raw.iter().map(Vec::as_slice).collect();
        let ids: Vec<ItemId> = (100..100 + raw.len() as u64).collect();
        index.insert_data(&rows, &ids).unwrap();

        prop_assert_eq!(index.stats().total_entries, 2 * raw.len());
        for t in 0..2 {
            let mut stored: Vec<ItemId> = (0..8).flat_map(|b| index.bucket(t, b).unwrap()).collect();
            stored.sort_unstable();
            prop_assert_eq!(&stored, &ids);
        }
    }
}
