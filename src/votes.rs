//! Vote counting: a histogram of bucket ids over one query batch.

use rayon::prelude::*;

use crate::error::{IndexError, IndexResult};
use crate::hash_bank::BucketId;
use crate::kernels::LaunchPlan;

/// Occurrences per bucket, indexed by bucket id
pub type VoteTally = Vec<u64>;

fn check_table_size(table_size: usize) -> IndexResult<()> {
    if table_size == 0 {
        return Err(IndexError::InvalidParameter(
            "table_size must be at least 1".to_string(),
        ));
    }
    Ok(())
}

fn tally_into(counts: &mut [u64], bucket_ids: &[BucketId]) {
    let table_size = counts.len() as u64;
    for &id in bucket_ids {
        counts[(id % table_size) as usize] += 1;
    }
}

/// Count how often each bucket occurs in `bucket_ids`.
///
/// Ids are reduced modulo `table_size` first. The result has exactly
/// `table_size` entries.
pub fn count_votes(bucket_ids: &[BucketId], table_size: usize) -> IndexResult<VoteTally> {
    check_table_size(table_size)?;
    let mut counts = vec![0u64; table_size];
    tally_into(&mut counts, bucket_ids);
    Ok(counts)
}

/// [`count_votes`] split across the current rayon pool.
///
/// Every worker tallies its own chunk into a private histogram; the partial
/// histograms are summed in a reduction, so no increment is ever shared.
pub fn count_votes_parallel(
    bucket_ids: &[BucketId],
    table_size: usize,
    plan: &LaunchPlan,
) -> IndexResult<VoteTally> {
    check_table_size(table_size)?;
    if !plan.is_parallel() {
        return count_votes(bucket_ids, table_size);
    }

    let counts = bucket_ids
        .par_chunks(plan.chunk_size)
        .map(|chunk| {
            let mut partial = vec![0u64; table_size];
            tally_into(&mut partial, chunk);
            partial
        })
        .reduce(
            || vec![0u64; table_size],
            |mut acc, partial| {
                for (a, p) in acc.iter_mut().zip(partial) {
                    *a += p;
                }
                acc
            },
        );
    Ok(counts)
}
