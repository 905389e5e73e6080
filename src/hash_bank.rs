//! Hash function bank interface.
//!
//! The index never computes hashes itself. A `HashFunctionBank` maps each
//! vector (or each convolution patch) to one bucket id per table, and the
//! index stores item ids under those buckets.

use crate::error::{IndexError, IndexResult};
use crate::geometry::ConvGeometry;
use crate::tensor::Tensor4;

/// Identifier of a stored item (filter / channel / patch index)
pub type ItemId = u64;

/// Bucket identifier; reduced modulo `table_size` wherever it is tallied
pub type BucketId = u64;

/// Bucket ids laid out as a `(num_tables, width)` row-major matrix.
///
/// Row `t` holds one bucket id per hashed vector (or patch) for table `t`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableBuckets {
    num_tables: usize,
    width: usize,
    ids: Vec<BucketId>,
}

impl TableBuckets {
    pub fn new(num_tables: usize, width: usize, ids: Vec<BucketId>) -> IndexResult<Self> {
        let expected = num_tables * width;
        if ids.len() != expected {
            return Err(IndexError::ShapeMismatch {
                context: "table bucket matrix",
                expected,
                actual: ids.len(),
            });
        }
        Ok(Self {
            num_tables,
            width,
            ids,
        })
    }

    /// Build from one row per table. All rows must share a length.
    pub fn from_rows(rows: Vec<Vec<BucketId>>) -> IndexResult<Self> {
        let num_tables = rows.len();
        let width = rows.first().map_or(0, Vec::len);
        let mut ids = Vec::with_capacity(num_tables * width);
        for row in rows {
            if row.len() != width {
                return Err(IndexError::ShapeMismatch {
                    context: "table bucket row",
                    expected: width,
                    actual: row.len(),
                });
            }
            ids.extend(row);
        }
        Ok(Self {
            num_tables,
            width,
            ids,
        })
    }

    pub fn num_tables(&self) -> usize {
        self.num_tables
    }

    /// Number of hashed vectors (or patches) per table.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn row(&self, table: usize) -> &[BucketId] {
        &self.ids[table * self.width..(table + 1) * self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[BucketId]> {
        (0..self.num_tables).map(move |t| self.row(t))
    }
}

/// A family of `num_tables` hash functions sharing one bucket space.
///
/// Implementations must be deterministic for the lifetime of an index:
/// the same vector always lands in the same bucket of a given table.
pub trait HashFunctionBank: Send + Sync {
    fn num_tables(&self) -> usize;

    fn table_size(&self) -> usize;

    /// Length of the vectors this bank hashes.
    fn dim(&self) -> usize;

    /// Bucket id of every vector in every table, shape `(num_tables, vectors.len())`.
    fn hash(&self, vectors: &[&[f32]]) -> IndexResult<TableBuckets>;

    /// Bucket id of every convolution patch of `input`, shape
    /// `(num_tables, num_patches)`.
    fn hash_patches(&self, input: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets>;
}
