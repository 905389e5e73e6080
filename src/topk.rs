//! Top-k bucket selection.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use crate::error::{IndexError, IndexResult};
use crate::hash_bank::BucketId;

/// Default number of buckets selected per table
pub const DEFAULT_TOP_K: usize = 5;

/// The `k` most frequent buckets of `tally`.
///
/// Ordered by count descending; equal counts order by the smaller bucket id
/// first. Zero-count buckets fill the quota when fewer than `k` buckets
/// were voted for.
pub fn most_freq(tally: &[u64], k: usize) -> IndexResult<Vec<BucketId>> {
    if k > tally.len() {
        return Err(IndexError::OutOfRangeK {
            k,
            table_size: tally.len(),
        });
    }
    if k == 0 {
        return Ok(Vec::new());
    }

    // Rank key: higher count wins, then lower bucket id. The heap keeps the
    // k best keys with the worst one on top.
    let mut heap: BinaryHeap<Reverse<(u64, Reverse<usize>)>> = BinaryHeap::with_capacity(k + 1);
    for (bucket, &count) in tally.iter().enumerate() {
        heap.push(Reverse((count, Reverse(bucket))));
        if heap.len() > k {
            heap.pop();
        }
    }

    Ok(heap
        .into_sorted_vec()
        .into_iter()
        .map(|Reverse((_, Reverse(bucket)))| bucket as BucketId)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_most_freq_orders_by_count_then_id() {
        assert_eq!(most_freq(&[1, 3, 0, 1], 2).unwrap(), vec![1, 0]);
    }

    #[test]
    fn test_ties_break_by_smaller_id() {
        assert_eq!(most_freq(&[2, 2, 2, 2], 3).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn test_zero_buckets_fill_quota() {
        assert_eq!(most_freq(&[0, 0, 5, 0], 3).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn test_k_equal_to_table_size_returns_all() {
        assert_eq!(most_freq(&[1, 4, 2], 3).unwrap(), vec![1, 2, 0]);
    }

    #[test]
    fn test_k_zero() {
        assert!(most_freq(&[1, 2], 0).unwrap().is_empty());
    }

    #[test]
    fn test_k_beyond_table_size() {
        assert!(matches!(
            most_freq(&[1, 2], 3),
            Err(IndexError::OutOfRangeK {
                k: 3,
                table_size: 2
            })
        ));
    }
}
