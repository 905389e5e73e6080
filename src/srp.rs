//! Sign random projection hash bank.
//!
//! Each table owns `num_hashes` Gaussian hyperplanes. A vector's bucket in
//! that table is its sign pattern against the hyperplanes, packed
//! little-endian into an integer and reduced modulo `table_size`.

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};
use crate::geometry::{extract_patches, ConvGeometry};
use crate::hash_bank::{BucketId, HashFunctionBank, TableBuckets};
use crate::tensor::Tensor4;

/// Hash family identifiers understood by [`build_bank`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HashFamily {
    #[default]
    #[serde(alias = "srp")]
    SignRandomProjection,
}

impl fmt::Display for HashFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SignRandomProjection => write!(f, "srp"),
        }
    }
}

impl FromStr for HashFamily {
    type Err = IndexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "srp" | "sign_random_projection" | "signrandomprojection" => {
                Ok(Self::SignRandomProjection)
            }
            _ => Err(IndexError::InvalidParameter(format!(
                "Unknown hash family: '{s}'. Valid options: srp"
            ))),
        }
    }
}

/// Initialization parameters shared by all families
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInitParams {
    pub seed: u64,
}

/// Construct the bank named by `family`.
pub fn build_bank(
    family: HashFamily,
    num_tables: usize,
    table_size: usize,
    params: HashInitParams,
    num_hashes: usize,
    dim: usize,
) -> IndexResult<Box<dyn HashFunctionBank>> {
    match family {
        HashFamily::SignRandomProjection => Ok(Box::new(SignRandomProjection::new(
            num_tables, table_size, params, num_hashes, dim,
        )?)),
    }
}

pub struct SignRandomProjection {
    num_tables: usize,
    table_size: usize,
    num_hashes: usize,
    dim: usize,
    /// `num_tables * num_hashes` hyperplanes of length `dim`, table-major
    planes: Vec<f32>,
}

impl SignRandomProjection {
    pub fn new(
        num_tables: usize,
        table_size: usize,
        params: HashInitParams,
        num_hashes: usize,
        dim: usize,
    ) -> IndexResult<Self> {
        if num_tables == 0 || table_size == 0 {
            return Err(IndexError::InvalidParameter(
                "num_tables and table_size must be at least 1".to_string(),
            ));
        }
        if num_hashes == 0 || num_hashes > 64 {
            return Err(IndexError::InvalidParameter(format!(
                "num_hashes must be in 1..=64, got {num_hashes}"
            )));
        }

        let mut rng = StdRng::seed_from_u64(params.seed);
        let planes = (0..num_tables * num_hashes * dim)
            .map(|_| rng.sample::<f32, _>(StandardNormal))
            .collect();

        Ok(Self {
            num_tables,
            table_size,
            num_hashes,
            dim,
            planes,
        })
    }

    pub fn num_hashes(&self) -> usize {
        self.num_hashes
    }

    fn bucket(&self, table: usize, vector: &[f32]) -> BucketId {
        let mut signature = 0u64;
        for h in 0..self.num_hashes {
            let start = (table * self.num_hashes + h) * self.dim;
            let plane = &self.planes[start..start + self.dim];
            let dot: f32 = vector.iter().zip(plane).map(|(&a, &b)| a * b).sum();
            if dot >= 0.0 {
                signature |= 1u64 << h;
            }
        }
        signature % self.table_size as u64
    }

    fn hash_rows(&self, rows: &[&[f32]]) -> IndexResult<TableBuckets> {
        if let Some(bad) = rows.iter().find(|r| r.len() != self.dim) {
            return Err(IndexError::ShapeMismatch {
                context: "hashed vector length",
                expected: self.dim,
                actual: bad.len(),
            });
        }
        let mut ids = Vec::with_capacity(self.num_tables * rows.len());
        for t in 0..self.num_tables {
            ids.extend(rows.iter().map(|row| self.bucket(t, row)));
        }
        TableBuckets::new(self.num_tables, rows.len(), ids)
    }
}

impl HashFunctionBank for SignRandomProjection {
    fn num_tables(&self) -> usize {
        self.num_tables
    }

    fn table_size(&self) -> usize {
        self.table_size
    }

    fn dim(&self) -> usize {
        self.dim
    }

    fn hash(&self, vectors: &[&[f32]]) -> IndexResult<TableBuckets> {
        self.hash_rows(vectors)
    }

    fn hash_patches(&self, input: &Tensor4, geometry: &ConvGeometry) -> IndexResult<TableBuckets> {
        let patches = extract_patches(input, geometry)?;
        if patches.patch_len() != self.dim {
            return Err(IndexError::ShapeMismatch {
                context: "patch length",
                expected: self.dim,
                actual: patches.patch_len(),
            });
        }
        self.hash_rows(&patches.as_rows())
    }
}
