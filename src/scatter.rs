//! Dense reinflation of a sparsely computed tensor.
//!
//! A layer that only computed the active channels produces a tensor with
//! one channel per active index. Scattering places channel `j` of that
//! tensor at channel `indices[j]` of a zero-filled tensor of the full shape.

use rayon::prelude::*;

use crate::error::{IndexError, IndexResult};
use crate::tensor::{ensure_device, Device, Tensor4};

fn validate(computed: &Tensor4, indices: &[usize], shape: [usize; 4], device: Device) -> IndexResult<()> {
    ensure_device(device, computed.device())?;

    if indices.len() != computed.channels() {
        return Err(IndexError::ShapeMismatch {
            context: "scatter indices vs computed channels",
            expected: computed.channels(),
            actual: indices.len(),
        });
    }
    let [batch, _, height, width] = computed.shape();
    for (context, expected, actual) in [
        ("scatter batch", shape[0], batch),
        ("scatter height", shape[2], height),
        ("scatter width", shape[3], width),
    ] {
        if expected != actual {
            return Err(IndexError::ShapeMismatch {
                context,
                expected,
                actual,
            });
        }
    }
    if let Some(&bad) = indices.iter().find(|&&p| p >= shape[1]) {
        return Err(IndexError::InvalidParameter(format!(
            "scatter channel {bad} out of range (channels = {})",
            shape[1]
        )));
    }
    Ok(())
}

/// Reinflate `computed` into a zero-filled tensor of `shape` on `device`.
///
/// With no indices (or an empty list) nothing was skipped and `computed` is
/// returned unchanged.
pub fn zero_fill_missing(
    computed: Tensor4,
    indices: Option<&[usize]>,
    shape: [usize; 4],
    device: Device,
) -> IndexResult<Tensor4> {
    let indices = match indices {
        Some(indices) if !indices.is_empty() => indices,
        _ => return Ok(computed),
    };
    validate(&computed, indices, shape, device)?;

    let mut out = Tensor4::zeros(shape, device);
    for n in 0..shape[0] {
        for (j, &p) in indices.iter().enumerate() {
            out.plane_mut(n, p).copy_from_slice(computed.plane(n, j));
        }
    }
    Ok(out)
}

/// [`zero_fill_missing`] on the current rayon pool, one sample per unit.
pub fn zero_fill_missing_parallel(
    computed: Tensor4,
    indices: Option<&[usize]>,
    shape: [usize; 4],
    device: Device,
) -> IndexResult<Tensor4> {
    let indices = match indices {
        Some(indices) if !indices.is_empty() => indices,
        _ => return Ok(computed),
    };
    validate(&computed, indices, shape, device)?;

    let mut out = Tensor4::zeros(shape, device);
    let plane = out.plane_len();
    let sample_len = shape[1] * plane;
    if sample_len == 0 {
        return Ok(out);
    }
    out.data_mut()
        .par_chunks_mut(sample_len)
        .enumerate()
        .for_each(|(n, sample)| {
            for (j, &p) in indices.iter().enumerate() {
                sample[p * plane..(p + 1) * plane].copy_from_slice(computed.plane(n, j));
            }
        });
    Ok(out)
}
