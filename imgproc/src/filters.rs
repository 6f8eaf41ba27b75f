//! Prefilters applied to both views before block matching.
//!
//! Both produce images in `[0, 2 * cap]` centered on `cap`, which removes
//! brightness offsets between the two cameras.

use crate::geometry::{map_coord, BorderMode};
use image::GrayImage;
use rayon::prelude::*;

/// Default aperture of the normalized-response prefilter.
pub const NORMALIZED_RESPONSE_WINDOW: u32 = 9;

#[inline]
fn at(raw: &[u8], width: usize, height: usize, x: isize, y: isize) -> i32 {
    let ix = map_coord(x, width, BorderMode::Replicate).unwrap_or(0);
    let iy = map_coord(y, height, BorderMode::Replicate).unwrap_or(0);
    raw[iy * width + ix] as i32
}

/// Horizontal Sobel derivative, truncated to `[-cap, cap]` and offset by `cap`.
pub fn sobel_x_prefilter(src: &GrayImage, cap: u8) -> GrayImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as usize, height as usize);
    let raw = src.as_raw();
    let cap = cap as i32;
    let mut dst = GrayImage::new(width, height);
    if w == 0 || h == 0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as isize;
            for (x, px) in row.iter_mut().enumerate() {
                let x = x as isize;
                let right = at(raw, w, h, x + 1, y - 1)
                    + 2 * at(raw, w, h, x + 1, y)
                    + at(raw, w, h, x + 1, y + 1);
                let left = at(raw, w, h, x - 1, y - 1)
                    + 2 * at(raw, w, h, x - 1, y)
                    + at(raw, w, h, x - 1, y + 1);
                *px = ((right - left).clamp(-cap, cap) + cap) as u8;
            }
        });
    dst
}

/// Difference between each pixel and its `window x window` neighborhood mean,
/// truncated to `[-cap, cap]` and offset by `cap`.
pub fn normalized_response_prefilter(src: &GrayImage, window: u32, cap: u8) -> GrayImage {
    let (width, height) = src.dimensions();
    let (w, h) = (width as usize, height as usize);
    let raw = src.as_raw();
    let cap = cap as i32;
    let half = (window.max(1) / 2) as isize;
    let count = (2 * half + 1) * (2 * half + 1);
    let mut dst = GrayImage::new(width, height);
    if w == 0 || h == 0 {
        return dst;
    }

    dst.as_mut()
        .par_chunks_mut(w)
        .enumerate()
        .for_each(|(y, row)| {
            let y = y as isize;
            for (x, px) in row.iter_mut().enumerate() {
                let x = x as isize;
                let mut sum = 0i32;
                for dy in -half..=half {
                    for dx in -half..=half {
                        sum += at(raw, w, h, x + dx, y + dy);
                    }
                }
                let center = at(raw, w, h, x, y);
                let response = (center * count as i32 - sum) / count as i32;
                *px = (response.clamp(-cap, cap) + cap) as u8;
            }
        });
    dst
}
