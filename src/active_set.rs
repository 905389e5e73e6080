//! Active set assembly: the union of the items stored in the selected
//! buckets of every table.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::hash_bank::{BucketId, ItemId, TableBuckets};
use crate::table::BucketTable;

/// Whether repeated item ids survive the union
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DedupPolicy {
    /// Every stored occurrence is returned
    Keep,
    /// Each id once, at the position of its first occurrence
    #[default]
    FirstOccurrence,
}

/// Result of one active-set query
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActiveSet {
    /// Items to compute, in table order then selected-bucket order
    pub items: Vec<ItemId>,
    /// Bucket of every patch in every table; names the rows a refill clears
    pub buckets: TableBuckets,
    /// Buckets chosen per table
    pub selected: Vec<Vec<BucketId>>,
}

impl ActiveSet {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Concatenate the rows of `selected[t]` from `tables[t]` for every table.
pub fn union_buckets(
    tables: &[&BucketTable],
    selected: &[Vec<BucketId>],
    policy: DedupPolicy,
) -> IndexResult<Vec<ItemId>> {
    if selected.len() != tables.len() {
        return Err(IndexError::ShapeMismatch {
            context: "selected buckets per table",
            expected: tables.len(),
            actual: selected.len(),
        });
    }

    let mut items = Vec::new();
    for (table, buckets) in tables.iter().zip(selected) {
        for &bucket in buckets {
            table.extend_from_row(bucket, &mut items);
        }
    }

    if policy == DedupPolicy::FirstOccurrence {
        let mut seen = HashSet::with_capacity(items.len());
        items.retain(|id| seen.insert(*id));
    }
    Ok(items)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables() -> (BucketTable, BucketTable) {
        let a = BucketTable::new(0, 4, 8);
        a.append_batch(&[0, 0, 1, 2], &[3, 1, 2, 5]).unwrap();
        let b = BucketTable::new(1, 4, 8);
        b.append_batch(&[3, 3, 0], &[1, 4, 6]).unwrap();
        (a, b)
    }

    #[test]
    fn test_union_keeps_duplicates() {
        let (a, b) = tables();
        let items = union_buckets(&[&a, &b], &[vec![0, 1], vec![3]], DedupPolicy::Keep).unwrap();
        assert_eq!(items, vec![3, 1, 2, 1, 4]);
    }

    #[test]
    fn test_union_first_occurrence() {
        let (a, b) = tables();
        let items = union_buckets(
            &[&a, &b],
            &[vec![0, 1], vec![3]],
            DedupPolicy::FirstOccurrence,
        )
        .unwrap();
        assert_eq!(items, vec![3, 1, 2, 4]);
    }

    #[test]
    fn test_empty_buckets_contribute_nothing() {
        let (a, b) = tables();
        let items = union_buckets(&[&a, &b], &[vec![3], vec![1, 2]], DedupPolicy::Keep).unwrap();
        assert!(items.is_empty());
    }

    #[test]
    fn test_selection_must_cover_every_table() {
        let (a, b) = tables();
        assert!(matches!(
            union_buckets(&[&a, &b], &[vec![0]], DedupPolicy::Keep),
            Err(IndexError::ShapeMismatch { .. })
        ));
    }
}
