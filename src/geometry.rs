//! Convolution geometry and patch extraction.
//!
//! A patch is the receptive field of one output position: `C * k * k`
//! scalars flattened channel-major (`c`, then kernel row, then kernel
//! column). Positions outside the input read as zero padding.

use crate::error::{IndexError, IndexResult};
use crate::tensor::Tensor4;

/// Shape parameters of a 2-D convolution with square kernels
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConvGeometry {
    pub kernel_size: usize,
    pub stride: usize,
    pub padding: usize,
    pub dilation: usize,
}

impl ConvGeometry {
    pub fn new(kernel_size: usize, stride: usize, padding: usize, dilation: usize) -> Self {
        Self {
            kernel_size,
            stride,
            padding,
            dilation,
        }
    }

    pub fn validate(&self) -> IndexResult<()> {
        if self.kernel_size == 0 {
            return Err(IndexError::InvalidParameter(
                "kernel_size must be at least 1".to_string(),
            ));
        }
        if self.stride == 0 {
            return Err(IndexError::InvalidParameter(
                "stride must be at least 1".to_string(),
            ));
        }
        if self.dilation == 0 {
            return Err(IndexError::InvalidParameter(
                "dilation must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Output extent along one spatial axis of length `input`.
    ///
    /// `(input + 2p - d(k-1) - 1) / s + 1`, or 0 if the dilated kernel does
    /// not fit in the padded input.
    pub fn output_extent(&self, input: usize) -> usize {
        let padded = input + 2 * self.padding;
        let span = self.dilation * (self.kernel_size - 1) + 1;
        if padded < span {
            0
        } else {
            (padded - span) / self.stride + 1
        }
    }

    /// Length of one flattened patch for an input with `channels` channels.
    pub fn patch_len(&self, channels: usize) -> usize {
        channels * self.kernel_size * self.kernel_size
    }
}

/// Flattened patches, one per (sample, out_row, out_col) in that order
#[derive(Clone, Debug)]
pub struct Patches {
    data: Vec<f32>,
    patch_len: usize,
    count: usize,
    out_height: usize,
    out_width: usize,
}

impl Patches {
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn patch_len(&self) -> usize {
        self.patch_len
    }

    pub fn out_dims(&self) -> (usize, usize) {
        (self.out_height, self.out_width)
    }

    pub fn get(&self, i: usize) -> &[f32] {
        &self.data[i * self.patch_len..(i + 1) * self.patch_len]
    }

    pub fn as_rows(&self) -> Vec<&[f32]> {
        (0..self.count).map(|i| self.get(i)).collect()
    }
}

/// Extract every patch implied by `geometry` from `input`.
pub fn extract_patches(input: &Tensor4, geometry: &ConvGeometry) -> IndexResult<Patches> {
    geometry.validate()?;

    let [batch, channels, height, width] = input.shape();
    let out_height = geometry.output_extent(height);
    let out_width = geometry.output_extent(width);
    let patch_len = geometry.patch_len(channels);
    let count = batch * out_height * out_width;
    let k = geometry.kernel_size;

    let mut data = Vec::with_capacity(count * patch_len);
    for n in 0..batch {
        for oh in 0..out_height {
            for ow in 0..out_width {
                for c in 0..channels {
                    for ki in 0..k {
                        for kj in 0..k {
                            data.push(sample_padded(input, geometry, n, c, oh, ow, ki, kj));
                        }
                    }
                }
            }
        }
    }

    Ok(Patches {
        data,
        patch_len,
        count,
        out_height,
        out_width,
    })
}

fn sample_padded(
    input: &Tensor4,
    g: &ConvGeometry,
    n: usize,
    c: usize,
    oh: usize,
    ow: usize,
    ki: usize,
    kj: usize,
) -> f32 {
    let [_, _, height, width] = input.shape();
    // Coordinates in the padded frame, shifted back into the input frame
    let ph = oh * g.stride + ki * g.dilation;
    let pw = ow * g.stride + kj * g.dilation;
    match (ph.checked_sub(g.padding), pw.checked_sub(g.padding)) {
        (Some(h), Some(w)) if h < height && w < width => input.get(n, c, h, w),
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Device;

    fn ramp(shape: [usize; 4]) -> Tensor4 {
        let volume = shape.iter().product::<usize>();
        Tensor4::from_vec(shape, (0..volume).map(|v| v as f32).collect(), Device::Cpu).unwrap()
    }

    #[test]
    fn test_output_extent() {
        // 3x3 kernel, stride 1, padding 1 keeps the size
        assert_eq!(ConvGeometry::new(3, 1, 1, 1).output_extent(8), 8);
        // no padding shrinks by k - 1
        assert_eq!(ConvGeometry::new(3, 1, 0, 1).output_extent(8), 6);
        // stride 2
        assert_eq!(ConvGeometry::new(2, 2, 0, 1).output_extent(8), 4);
        // dilation 2 makes a 3x3 kernel span 5
        assert_eq!(ConvGeometry::new(3, 1, 0, 2).output_extent(8), 4);
        // kernel larger than the input
        assert_eq!(ConvGeometry::new(5, 1, 0, 1).output_extent(3), 0);
    }

    #[test]
    fn test_extract_without_padding() {
        let input = ramp([1, 1, 3, 3]);
        let patches = extract_patches(&input, &ConvGeometry::new(2, 1, 0, 1)).unwrap();
        assert_eq!(patches.len(), 4);
        assert_eq!(patches.patch_len(), 4);
        assert_eq!(patches.get(0), &[0.0, 1.0, 3.0, 4.0]);
        assert_eq!(patches.get(3), &[4.0, 5.0, 7.0, 8.0]);
    }

    #[test]
    fn test_extract_with_padding_zero_fills() {
        let input = ramp([1, 1, 2, 2]);
        let patches = extract_patches(&input, &ConvGeometry::new(3, 1, 1, 1)).unwrap();
        assert_eq!(patches.out_dims(), (2, 2));
        // top-left window: padded row, then [pad, 0, 1], then [pad, 2, 3]
        assert_eq!(
            patches.get(0),
            &[0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_extract_is_channel_major() {
        let input = ramp([1, 2, 1, 1]);
        let patches = extract_patches(&input, &ConvGeometry::new(1, 1, 0, 1)).unwrap();
        assert_eq!(patches.len(), 1);
        assert_eq!(patches.get(0), &[0.0, 1.0]);
    }

    #[test]
    fn test_zero_stride_rejected() {
        let input = ramp([1, 1, 2, 2]);
        let err = extract_patches(&input, &ConvGeometry::new(1, 0, 0, 1)).unwrap_err();
        assert!(matches!(err, IndexError::InvalidParameter(_)));
    }
}
