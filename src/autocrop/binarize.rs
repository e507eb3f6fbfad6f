//! Binarizer
//!
//! Turns a grayscale volume into a 0/255 mask, one z-slice per rayon task.

use rayon::prelude::*;

use crate::volume::Volume;

/// Foreground value of a binary volume
pub const FOREGROUND: u8 = 255;

/// Background value of a binary volume
pub const BACKGROUND: u8 = 0;

/// `255` where `value >= threshold`, `0` elsewhere
pub fn binarize(volume: &Volume<u8>, threshold: i32) -> Volume<u8> {
    let mut binary = volume.clone();
    let plane = volume.extent().plane_len().max(1);

    binary
        .as_mut_slice()
        .par_chunks_mut(plane)
        .for_each(|slice| {
            for v in slice.iter_mut() {
                *v = if i32::from(*v) >= threshold {
                    FOREGROUND
                } else {
                    BACKGROUND
                };
            }
        });

    binary
}

// ============================================================
// Tests
// ============================================================
