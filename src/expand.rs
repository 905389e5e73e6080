//! Window id expansion.
//!
//! A selected id `w` that stands for a whole `k x k` window expands to the
//! `k * k` consecutive scalar positions `w*k*k .. w*k*k + k*k`.

use rayon::prelude::*;

use crate::error::{IndexError, IndexResult};
use crate::kernels::LaunchPlan;

fn window_len(selected: &[u64], kernel_size: usize) -> IndexResult<u64> {
    if kernel_size == 0 {
        return Err(IndexError::InvalidParameter(
            "kernel_size must be at least 1".to_string(),
        ));
    }
    let area = (kernel_size as u64)
        .checked_mul(kernel_size as u64)
        .ok_or_else(|| IndexError::InvalidParameter(format!("kernel_size {kernel_size} too large")))?;
    let max_id = selected.iter().copied().max().unwrap_or(0);
    max_id
        .checked_add(1)
        .and_then(|n| n.checked_mul(area))
        .ok_or_else(|| {
            IndexError::InvalidParameter(format!(
                "window id {max_id} overflows when expanded by {area}"
            ))
        })?;
    Ok(area)
}

fn fill_window(window: &mut [u64], id: u64, area: u64) {
    let base = id * area;
    for (offset, slot) in window.iter_mut().enumerate() {
        *slot = base + offset as u64;
    }
}

/// Expand every window id into its `kernel_size²` positions, in input order.
pub fn expand(selected: &[u64], kernel_size: usize) -> IndexResult<Vec<u64>> {
    let area = window_len(selected, kernel_size)?;
    let mut out = vec![0u64; selected.len() * area as usize];
    for (window, &id) in out.chunks_exact_mut(area as usize).zip(selected) {
        fill_window(window, id, area);
    }
    Ok(out)
}

/// [`expand`] on the current rayon pool, one unit of work per window.
pub fn expand_parallel(selected: &[u64], kernel_size: usize, plan: &LaunchPlan) -> IndexResult<Vec<u64>> {
    if !plan.is_parallel() {
        return expand(selected, kernel_size);
    }
    let area = window_len(selected, kernel_size)?;
    let mut out = vec![0u64; selected.len() * area as usize];
    out.par_chunks_mut(area as usize)
        .zip(selected.par_iter())
        .with_min_len(plan.chunk_size)
        .for_each(|(window, &id)| fill_window(window, id, area));
    Ok(out)
}
