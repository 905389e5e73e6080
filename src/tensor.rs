//! Dense NCHW tensors tagged with the execution context they live on.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IndexError, IndexResult};

/// Execution context an operand is resident on
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Device {
    #[default]
    Cpu,
    Gpu,
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cpu => write!(f, "cpu"),
            Self::Gpu => write!(f, "gpu"),
        }
    }
}

/// Fail with `DeviceMismatch` unless `actual` is `expected`.
pub fn ensure_device(expected: Device, actual: Device) -> IndexResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(IndexError::DeviceMismatch { expected, actual })
    }
}

/// Four-dimensional `f32` tensor in (batch, channel, height, width) order.
///
/// Filter banks use the same layout as (out_channels, in_channels, kh, kw).
#[derive(Clone, Debug, PartialEq)]
pub struct Tensor4 {
    shape: [usize; 4],
    data: Vec<f32>,
    device: Device,
}

impl Tensor4 {
    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: [usize; 4], device: Device) -> Self {
        Self {
            shape,
            data: vec![0.0; shape.iter().product()],
            device,
        }
    }

    /// Wrap an existing buffer. `data.len()` must equal the shape's volume.
    pub fn from_vec(shape: [usize; 4], data: Vec<f32>, device: Device) -> IndexResult<Self> {
        let volume: usize = shape.iter().product();
        if data.len() != volume {
            return Err(IndexError::ShapeMismatch {
                context: "tensor buffer",
                expected: volume,
                actual: data.len(),
            });
        }
        Ok(Self {
            shape,
            data,
            device,
        })
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn batch(&self) -> usize {
        self.shape[0]
    }

    pub fn channels(&self) -> usize {
        self.shape[1]
    }

    /// Number of scalars in one (channel) plane.
    pub fn plane_len(&self) -> usize {
        self.shape[2] * self.shape[3]
    }

    /// Same data, relabelled as resident on `device`.
    pub fn to_device(mut self, device: Device) -> Self {
        self.device = device;
        self
    }

    /// Flattened outer slices: one row of `C*H*W` scalars per batch entry.
    ///
    /// For a filter bank this yields one vector per output channel.
    pub fn rows(&self) -> Vec<&[f32]> {
        let row_len = self.shape[1] * self.plane_len();
        if row_len == 0 {
            return vec![&self.data[..0]; self.shape[0]];
        }
        self.data.chunks_exact(row_len).collect()
    }

    /// One (H, W) plane of sample `n`, channel `c`.
    pub fn plane(&self, n: usize, c: usize) -> &[f32] {
        let start = self.plane_offset(n, c);
        &self.data[start..start + self.plane_len()]
    }

    pub fn plane_mut(&mut self, n: usize, c: usize) -> &mut [f32] {
        let start = self.plane_offset(n, c);
        let len = self.plane_len();
        &mut self.data[start..start + len]
    }

    /// Scalar at (n, c, h, w).
    pub fn get(&self, n: usize, c: usize, h: usize, w: usize) -> f32 {
        self.data[self.plane_offset(n, c) + h * self.shape[3] + w]
    }

    fn plane_offset(&self, n: usize, c: usize) -> usize {
        (n * self.shape[1] + c) * self.plane_len()
    }
}
