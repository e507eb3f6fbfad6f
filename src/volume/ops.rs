//! Volume operations
//!
//! Working-copy conversion to 8 bits, separable 3D Gaussian smoothing and
//! maximum-intensity projection.

use rayon::prelude::*;

use super::types::{Extent, Volume};

// ============================================================
// Constants
// ============================================================

/// Smoothing applied before thresholding, per axis (x, y, z)
pub const THRESHOLD_BLUR_SIGMA: (f32, f32, f32) = (0.5, 0.5, 1.0);

/// Kernel half-width in units of sigma
const KERNEL_SIGMA_SPAN: f32 = 3.0;

// ============================================================
// Bit depth conversion
// ============================================================

/// Convert a stack channel to an 8-bit working copy
///
/// 8-bit sources are copied as is. Deeper sources are linearly stretched so
/// that the channel minimum maps to 0 and its maximum to 255.
pub fn to_8bit(volume: &Volume<u16>, bit_depth: u8) -> Volume<u8> {
    if bit_depth <= 8 {
        return volume.map(|v| v.min(u8::MAX as u16) as u8);
    }

    let (min, max) = volume
        .as_slice()
        .par_iter()
        .fold(|| (u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)))
        .reduce(|| (u16::MAX, u16::MIN), |a, b| (a.0.min(b.0), a.1.max(b.1)));

    if volume.is_empty() || max <= min {
        return volume.map(|_| 0u8);
    }

    let scale = 255.0 / f64::from(max - min);
    volume.map(|v| (f64::from(v - min) * scale).round().clamp(0.0, 255.0) as u8)
}

// ============================================================
// Gaussian smoothing
// ============================================================

/// Normalized 1D Gaussian kernel with radius ceil(3 sigma)
fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let radius = (KERNEL_SIGMA_SPAN * sigma).ceil().max(1.0) as i32;
    let mut kernel: Vec<f32> = (-radius..=radius)
        .map(|i| {
            let x = i as f32;
            (-x * x / (2.0 * sigma * sigma)).exp()
        })
        .collect();

    let sum: f32 = kernel.iter().sum();
    for k in &mut kernel {
        *k /= sum;
    }

    kernel
}

/// Convolve one axis in place, clamping samples at the volume edge
fn convolve_axis(data: &mut [f32], extent: Extent, kernel: &[f32], axis: usize) {
    let (w, h, d) = (extent.width, extent.height, extent.depth);
    let half = (kernel.len() / 2) as isize;
    let (len, stride) = match axis {
        0 => (w, 1),
        1 => (h, w),
        _ => (d, w * h),
    };
    if len < 2 {
        return;
    }

    let source = data.to_vec();
    let plane = w * h;

    data.par_chunks_mut(plane)
        .enumerate()
        .for_each(|(z, out)| {
            for y in 0..h {
                for x in 0..w {
                    let pos = match axis {
                        0 => x,
                        1 => y,
                        _ => z,
                    } as isize;
                    let base = z * plane + y * w + x;
                    let origin = base as isize - pos * stride as isize;

                    let mut sum = 0.0f32;
                    for (ki, &kv) in kernel.iter().enumerate() {
                        let p = (pos + ki as isize - half).clamp(0, len as isize - 1);
                        sum += source[(origin + p * stride as isize) as usize] * kv;
                    }
                    out[y * w + x] = sum;
                }
            }
        });
}

/// Separable 3D Gaussian blur with per-axis sigma
///
/// An axis with a non-positive sigma is left untouched.
pub fn gaussian_blur_3d(volume: &Volume<u8>, sigma: (f32, f32, f32)) -> Volume<u8> {
    if volume.is_empty() {
        return volume.clone();
    }

    let extent = volume.extent();
    let mut data: Vec<f32> = volume.as_slice().iter().map(|&v| f32::from(v)).collect();

    for (axis, s) in [sigma.0, sigma.1, sigma.2].into_iter().enumerate() {
        if s > 0.0 {
            convolve_axis(&mut data, extent, &gaussian_kernel(s), axis);
        }
    }

    let out = data
        .into_iter()
        .map(|v| v.round().clamp(0.0, 255.0) as u8)
        .collect();

    Volume::from_vec(extent.width, extent.height, extent.depth, out)
        .unwrap_or_else(|_| volume.clone())
}

// ============================================================
// Projection
// ============================================================

/// Maximum-intensity projection along z, as a single-slice volume
pub fn max_projection<T>(volume: &Volume<T>) -> Volume<T>
where
    T: Copy + Default + Ord,
{
    let extent = volume.extent();
    let mut projection = vec![T::default(); extent.plane_len()];
    for slice in volume.slices() {
        for (p, &v) in projection.iter_mut().zip(slice) {
            if v > *p {
                *p = v;
            }
        }
    }

    Volume::from_vec(extent.width, extent.height, 1, projection)
        .unwrap_or_else(|_| Volume::new(0, 0, 0))
}

// ============================================================
// Tests
// ============================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gaussian_kernel_normalized() {
        let kernel = gaussian_kernel(1.0);
        assert_eq!(kernel.len(), 7);
        let sum: f32 = kernel.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(kernel[3] > kernel[2]);
        assert!((kernel[0] - kernel[6]).abs() < 1e-7);
    }

    #[test]
    fn test_gaussian_kernel_small_sigma_radius() {
        // ceil(3 * 0.5) = 2
        assert_eq!(gaussian_kernel(0.5).len(), 5);
    }

    #[test]
    fn test_blur_preserves_constant_volume() {
        let vol = Volume::filled(Extent::new(6, 5, 4), 77u8);
        let blurred = gaussian_blur_3d(&vol, THRESHOLD_BLUR_SIGMA);
        assert!(blurred.as_slice().iter().all(|&v| v == 77));
    }

    #[test]
    fn test_blur_spreads_point() {
        let mut vol = Volume::<u8>::new(7, 7, 7);
        vol.set(3, 3, 3, 255);
        let blurred = gaussian_blur_3d(&vol, THRESHOLD_BLUR_SIGMA);
        assert!(blurred.get(3, 3, 3) < 255);
        assert!(blurred.get(3, 3, 4) > 0);
        assert_eq!(blurred.get(0, 0, 0), 0);
    }

    #[test]
    fn test_blur_zero_sigma_is_identity() {
        let mut vol = Volume::<u8>::new(4, 4, 4);
        vol.set(1, 2, 3, 200);
        let blurred = gaussian_blur_3d(&vol, (0.0, 0.0, 0.0));
        assert_eq!(blurred, vol);
    }

    #[test]
    fn test_to_8bit_passthrough() {
        let vol = Volume::from_vec(2, 1, 1, vec![3u16, 250]).unwrap();
        let out = to_8bit(&vol, 8);
        assert_eq!(out.as_slice(), &[3, 250]);
    }

    #[test]
    fn test_to_8bit_stretch() {
        let vol = Volume::from_vec(3, 1, 1, vec![1000u16, 2000, 3000]).unwrap();
        let out = to_8bit(&vol, 16);
        assert_eq!(out.as_slice(), &[0, 128, 255]);
    }

    #[test]
    fn test_to_8bit_flat_volume() {
        let vol = Volume::filled(Extent::new(2, 2, 2), 4000u16);
        let out = to_8bit(&vol, 16);
        assert!(out.as_slice().iter().all(|&v| v == 0));
    }

    #[test]
    fn test_max_projection() {
        let mut vol = Volume::<u16>::new(2, 2, 3);
        vol.set(0, 0, 0, 5);
        vol.set(0, 0, 2, 9);
        vol.set(1, 1, 1, 4);
        let proj = max_projection(&vol);
        assert_eq!(proj.depth(), 1);
        assert_eq!(proj.get(0, 0, 0), 9);
        assert_eq!(proj.get(1, 1, 0), 4);
        assert_eq!(proj.get(1, 0, 0), 0);
    }
}
