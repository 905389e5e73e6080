//! Bucket tables.
//!
//! # Layout
//!
//! ```text
//! TableStore
//!   `-- Vec<RwLock<BucketTable>>        (one per hash table)
//!         `-- BucketTable
//!               |-- slots:   [AtomicU64; table_size * capacity]   (arena)
//!               `-- lengths: [AtomicUsize; table_size]            (row fill)
//! ```
//!
//! Row `b` of a table owns slots `b * capacity .. (b + 1) * capacity`. An
//! append reserves the next slot with a bounded compare-and-swap on the row
//! length and only then writes the id, so concurrent appenders never share
//! a slot and a full row reports `CapacityExceeded` instead of spilling.
//!
//! Readers lock every table shared; mutations lock every table exclusively,
//! always in ascending table order.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{IndexError, IndexResult};
use crate::hash_bank::{BucketId, ItemId, TableBuckets};
use crate::votes::count_votes;

/// Fixed-capacity rows of item ids for one hash table
pub struct BucketTable {
    table: usize,
    table_size: usize,
    capacity: usize,
    slots: Vec<AtomicU64>,
    lengths: Vec<AtomicUsize>,
}

impl BucketTable {
    pub fn new(table: usize, table_size: usize, capacity: usize) -> Self {
        Self {
            table,
            table_size,
            capacity,
            slots: (0..table_size * capacity).map(|_| AtomicU64::new(0)).collect(),
            lengths: (0..table_size).map(|_| AtomicUsize::new(0)).collect(),
        }
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn row_index(&self, bucket: BucketId) -> usize {
        (bucket % self.table_size as u64) as usize
    }

    pub fn row_len(&self, bucket: BucketId) -> usize {
        self.lengths[self.row_index(bucket)].load(Ordering::Acquire)
    }

    /// Reserve the next free slot of `bucket` and store `item` in it.
    pub fn append(&self, bucket: BucketId, item: ItemId) -> IndexResult<()> {
        let row = self.row_index(bucket);
        let capacity = self.capacity;
        let slot = self.lengths[row]
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |len| {
                (len < capacity).then_some(len + 1)
            })
            .map_err(|_| IndexError::CapacityExceeded {
                table: self.table,
                bucket: row as u64,
                capacity,
            })?;
        self.slots[row * capacity + slot].store(item, Ordering::Release);
        Ok(())
    }

    /// Append `items[i]` to bucket `buckets[i]`, in batch order.
    pub fn append_batch(&self, buckets: &[BucketId], items: &[ItemId]) -> IndexResult<()> {
        for (&bucket, &item) in buckets.iter().zip(items) {
            self.append(bucket, item)?;
        }
        Ok(())
    }

    /// Reset a row to empty.
    pub fn clear(&self, bucket: BucketId) {
        self.lengths[self.row_index(bucket)].store(0, Ordering::Release);
    }

    /// Ids stored in `bucket`, in insertion order.
    pub fn row(&self, bucket: BucketId) -> Vec<ItemId> {
        let row = self.row_index(bucket);
        let len = self.lengths[row].load(Ordering::Acquire);
        let start = row * self.capacity;
        self.slots[start..start + len]
            .iter()
            .map(|slot| slot.load(Ordering::Acquire))
            .collect()
    }

    /// Append every id of `bucket` to `out`.
    pub fn extend_from_row(&self, bucket: BucketId, out: &mut Vec<ItemId>) {
        let row = self.row_index(bucket);
        let len = self.lengths[row].load(Ordering::Acquire);
        let start = row * self.capacity;
        out.extend(
            self.slots[start..start + len]
                .iter()
                .map(|slot| slot.load(Ordering::Acquire)),
        );
    }

    pub fn total_entries(&self) -> usize {
        self.lengths.iter().map(|l| l.load(Ordering::Acquire)).sum()
    }
}

/// Buckets to evict before a refill
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RowSelection {
    /// Row `t` lists the buckets to clear in table `t`
    PerTable(TableBuckets),
    /// The same buckets are cleared in every table
    Shared(Vec<BucketId>),
}

impl RowSelection {
    fn validate(&self, num_tables: usize) -> IndexResult<()> {
        match self {
            Self::PerTable(rows) if rows.num_tables() != num_tables => {
                Err(IndexError::ShapeMismatch {
                    context: "row selection tables",
                    expected: num_tables,
                    actual: rows.num_tables(),
                })
            }
            _ => Ok(()),
        }
    }

    fn buckets_for(&self, table: usize) -> &[BucketId] {
        match self {
            Self::PerTable(rows) => rows.row(table),
            Self::Shared(buckets) => buckets,
        }
    }

    /// `mask[b]` is set when row `b` of `table` is selected.
    fn mask(&self, table: usize, table_size: usize) -> Vec<bool> {
        let mut mask = vec![false; table_size];
        for &b in self.buckets_for(table) {
            mask[(b % table_size as u64) as usize] = true;
        }
        mask
    }
}

/// Bucket and item lists of one insertion, per table, in batch order
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TableBatch {
    buckets: Vec<Vec<BucketId>>,
    items: Vec<Vec<ItemId>>,
}

impl TableBatch {
    /// Every item under its bucket in every table.
    pub fn new(buckets: &TableBuckets, ids: &[ItemId]) -> IndexResult<Self> {
        check_width(buckets, ids)?;
        Ok(Self {
            buckets: buckets.rows().map(<[BucketId]>::to_vec).collect(),
            items: vec![ids.to_vec(); buckets.num_tables()],
        })
    }

    /// Only the entries that land in a row named by `selection`.
    ///
    /// Rows outside the selection are not cleared by a refill and still hold
    /// the items they held, so appending there again would duplicate them.
    pub fn restricted_to(
        buckets: &TableBuckets,
        ids: &[ItemId],
        selection: &RowSelection,
        table_size: usize,
    ) -> IndexResult<Self> {
        check_width(buckets, ids)?;
        selection.validate(buckets.num_tables())?;

        let mut batch = Self::default();
        for (t, row) in buckets.rows().enumerate() {
            let mask = selection.mask(t, table_size);
            let (kept_buckets, kept_items): (Vec<BucketId>, Vec<ItemId>) = row
                .iter()
                .zip(ids)
                .filter(|(&b, _)| mask[(b % table_size as u64) as usize])
                .map(|(&b, &id)| (b, id))
                .unzip();
            batch.buckets.push(kept_buckets);
            batch.items.push(kept_items);
        }
        Ok(batch)
    }

    pub fn num_tables(&self) -> usize {
        self.buckets.len()
    }

    pub fn buckets(&self, table: usize) -> &[BucketId] {
        &self.buckets[table]
    }

    pub fn items(&self, table: usize) -> &[ItemId] {
        &self.items[table]
    }

    /// Entries across every table.
    pub fn len(&self) -> usize {
        self.items.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn check_width(buckets: &TableBuckets, ids: &[ItemId]) -> IndexResult<()> {
    if buckets.width() != ids.len() {
        return Err(IndexError::ShapeMismatch {
            context: "bucket ids per table vs item ids",
            expected: ids.len(),
            actual: buckets.width(),
        });
    }
    Ok(())
}

/// Size and fill summary
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub num_tables: usize,
    pub table_size: usize,
    pub capacity: usize,
    pub total_entries: usize,
    pub non_empty_buckets: usize,
    pub max_row_len: usize,
}

/// All tables of one index behind per-table locks
pub struct TableStore {
    tables: Vec<RwLock<BucketTable>>,
    table_size: usize,
    capacity: usize,
}

impl TableStore {
    pub fn new(num_tables: usize, table_size: usize, capacity: usize) -> IndexResult<Self> {
        if num_tables == 0 || table_size == 0 {
            return Err(IndexError::InvalidParameter(
                "num_tables and table_size must be at least 1".to_string(),
            ));
        }
        if table_size.checked_mul(capacity).is_none() {
            return Err(IndexError::InvalidParameter(format!(
                "table_size {table_size} x capacity {capacity} overflows the slot arena"
            )));
        }
        Ok(Self {
            tables: (0..num_tables)
                .map(|t| RwLock::new(BucketTable::new(t, table_size, capacity)))
                .collect(),
            table_size,
            capacity,
        })
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn table_size(&self) -> usize {
        self.table_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Shared view of every table.
    pub fn read(&self) -> TablesRead<'_> {
        TablesRead {
            guards: self.tables.iter().map(RwLock::read).collect(),
        }
    }

    /// Exclusive view of every table, held until the guard drops.
    pub fn write(&self) -> TablesWrite<'_> {
        TablesWrite {
            guards: self.tables.iter().map(RwLock::write).collect(),
        }
    }

    pub fn bucket(&self, table: usize, bucket: BucketId) -> IndexResult<Vec<ItemId>> {
        self.check_address(table, bucket)?;
        Ok(self.tables[table].read().row(bucket))
    }

    pub fn row_len(&self, table: usize, bucket: BucketId) -> IndexResult<usize> {
        self.check_address(table, bucket)?;
        Ok(self.tables[table].read().row_len(bucket))
    }

    pub fn stats(&self) -> IndexStats {
        let view = self.read();
        let mut stats = IndexStats {
            num_tables: self.num_tables(),
            table_size: self.table_size,
            capacity: self.capacity,
            ..IndexStats::default()
        };
        for table in view.tables() {
            for b in 0..self.table_size as u64 {
                let len = table.row_len(b);
                stats.total_entries += len;
                if len > 0 {
                    stats.non_empty_buckets += 1;
                }
                stats.max_row_len = stats.max_row_len.max(len);
            }
        }
        stats
    }

    fn check_address(&self, table: usize, bucket: BucketId) -> IndexResult<()> {
        if table >= self.num_tables() {
            return Err(IndexError::InvalidParameter(format!(
                "table {table} out of range (num_tables = {})",
                self.num_tables()
            )));
        }
        if bucket >= self.table_size as u64 {
            return Err(IndexError::InvalidParameter(format!(
                "bucket {bucket} out of range (table_size = {})",
                self.table_size
            )));
        }
        Ok(())
    }
}

/// Read locks on every table
pub struct TablesRead<'a> {
    guards: Vec<RwLockReadGuard<'a, BucketTable>>,
}

impl TablesRead<'_> {
    pub fn tables(&self) -> Vec<&BucketTable> {
        self.guards.iter().map(|g| &**g).collect()
    }
}

/// Write locks on every table; one maintenance transaction
pub struct TablesWrite<'a> {
    guards: Vec<RwLockWriteGuard<'a, BucketTable>>,
}

impl TablesWrite<'_> {
    pub fn tables(&self) -> Vec<&BucketTable> {
        self.guards.iter().map(|g| &**g).collect()
    }

    /// Check that clearing `clearing` (if any) and then appending `batch`
    /// keeps every row within capacity. Nothing is mutated.
    pub fn validate_insert(&self, batch: &TableBatch, clearing: Option<&RowSelection>) -> IndexResult<()> {
        let num_tables = self.guards.len();
        if batch.num_tables() != num_tables {
            return Err(IndexError::ShapeMismatch {
                context: "hashed tables",
                expected: num_tables,
                actual: batch.num_tables(),
            });
        }
        if let Some(selection) = clearing {
            selection.validate(num_tables)?;
        }

        for (t, table) in self.guards.iter().enumerate() {
            let table_size = table.table_size();
            let cleared = clearing.map_or_else(|| vec![false; table_size], |s| s.mask(t, table_size));

            let incoming = count_votes(batch.buckets(t), table_size)?;
            for (b, &count) in incoming.iter().enumerate() {
                if count == 0 {
                    continue;
                }
                let base = if cleared[b] { 0 } else { table.row_len(b as u64) };
                if base + count as usize > table.capacity() {
                    return Err(IndexError::CapacityExceeded {
                        table: t,
                        bucket: b as u64,
                        capacity: table.capacity(),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn clear(&self, selection: &RowSelection) -> IndexResult<()> {
        selection.validate(self.guards.len())?;
        for (t, table) in self.guards.iter().enumerate() {
            for &b in selection.buckets_for(t) {
                table.clear(b);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_preserves_order() {
        let table = BucketTable::new(0, 4, 8);
        table.append_batch(&[1, 1, 2, 1], &[10, 11, 12, 13]).unwrap();
        assert_eq!(table.row(1), vec![10, 11, 13]);
        assert_eq!(table.row(2), vec![12]);
        assert!(table.row(0).is_empty());
        assert_eq!(table.total_entries(), 4);
    }

    #[test]
    fn test_append_past_capacity_fails() {
        let table = BucketTable::new(3, 2, 2);
        table.append(0, 1).unwrap();
        table.append(0, 2).unwrap();
        let err = table.append(0, 3).unwrap_err();
        assert!(matches!(
            err,
            IndexError::CapacityExceeded {
                table: 3,
                bucket: 0,
                capacity: 2
            }
        ));
        assert_eq!(table.row(0), vec![1, 2]);
    }

    #[test]
    fn test_bucket_ids_reduced_modulo_table_size() {
        let table = BucketTable::new(0, 4, 4);
        table.append(6, 42).unwrap();
        assert_eq!(table.row(2), vec![42]);
    }

    #[test]
    fn test_clear_only_touches_named_row() {
        let table = BucketTable::new(0, 4, 4);
        table.append_batch(&[0, 1, 2], &[5, 6, 7]).unwrap();
        table.clear(1);
        assert_eq!(table.row(0), vec![5]);
        assert!(table.row(1).is_empty());
        assert_eq!(table.row(2), vec![7]);
    }

    #[test]
    fn test_concurrent_appends_claim_distinct_slots() {
        let table = BucketTable::new(0, 1, 4000);
        std::thread::scope(|s| {
            for w in 0..4u64 {
                let table = &table;
                s.spawn(move || {
                    for i in 0..1000 {
                        table.append(0, w * 1000 + i).unwrap();
                    }
                });
            }
        });
        let mut row = table.row(0);
        row.sort_unstable();
        assert_eq!(row, (0..4000).collect::<Vec<_>>());
    }

    #[test]
    fn test_validate_insert_counts_cleared_rows_as_empty() {
        let store = TableStore::new(1, 2, 2).unwrap();
        {
            let txn = store.write();
            txn.tables()[0].append_batch(&[0, 0], &[1, 2]).unwrap();
        }
        let txn = store.write();
        let buckets = TableBuckets::from_rows(vec![vec![0, 0]]).unwrap();
        let batch = TableBatch::new(&buckets, &[3, 4]).unwrap();

        assert!(matches!(
            txn.validate_insert(&batch, None),
            Err(IndexError::CapacityExceeded { bucket: 0, .. })
        ));
        let clearing = RowSelection::Shared(vec![0]);
        assert!(txn.validate_insert(&batch, Some(&clearing)).is_ok());
    }

    #[test]
    fn test_batch_length_mismatch() {
        let buckets = TableBuckets::from_rows(vec![vec![0, 1], vec![2, 3]]).unwrap();
        assert!(matches!(
            TableBatch::new(&buckets, &[1]),
            Err(IndexError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_validate_insert_table_count_mismatch() {
        let store = TableStore::new(2, 4, 4).unwrap();
        let buckets = TableBuckets::from_rows(vec![vec![0, 1]]).unwrap();
        let batch = TableBatch::new(&buckets, &[1, 2]).unwrap();
        assert!(matches!(
            store.write().validate_insert(&batch, None),
            Err(IndexError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_restricted_batch_keeps_only_selected_rows() {
        let buckets = TableBuckets::from_rows(vec![vec![0, 2, 2, 5], vec![1, 3, 7, 6]]).unwrap();
        let selection = RowSelection::PerTable(TableBuckets::from_rows(vec![vec![2], vec![6]]).unwrap());
        let batch = TableBatch::restricted_to(&buckets, &[10, 11, 12, 13], &selection, 8).unwrap();
        assert_eq!(batch.buckets(0), &[2, 2]);
        assert_eq!(batch.items(0), &[11, 12]);
        assert_eq!(batch.buckets(1), &[6]);
        assert_eq!(batch.items(1), &[13]);
        assert_eq!(batch.len(), 3);
    }

    #[test]
    fn test_oversized_arena_rejected() {
        assert!(matches!(
            TableStore::new(1, usize::MAX, 2),
            Err(IndexError::InvalidParameter(_))
        ));
    }

    #[test]
    fn test_per_table_selection_must_cover_all_tables() {
        let store = TableStore::new(2, 4, 4).unwrap();
        let selection = RowSelection::PerTable(TableBuckets::from_rows(vec![vec![1]]).unwrap());
        assert!(store.write().clear(&selection).is_err());
    }

    #[test]
    fn test_stats() {
        let store = TableStore::new(2, 4, 3).unwrap();
        {
            let txn = store.write();
            let tables = txn.tables();
            tables[0].append_batch(&[0, 0, 3], &[1, 2, 3]).unwrap();
            tables[1].append_batch(&[2], &[1]).unwrap();
        }
        let stats = store.stats();
        assert_eq!(stats.total_entries, 4);
        assert_eq!(stats.non_empty_buckets, 3);
        assert_eq!(stats.max_row_len, 2);
        assert_eq!(stats.capacity, 3);
    }

    #[test]
    fn test_bucket_address_checked() {
        let store = TableStore::new(2, 4, 3).unwrap();
        assert!(store.bucket(2, 0).is_err());
        assert!(store.bucket(0, 4).is_err());
        assert!(store.bucket(1, 3).unwrap().is_empty());
    }
}
