use crate::{Error, Result};
use image::{ImageBuffer, Pixel};
use rayon::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    #[default]
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    Constant(u8),
    Replicate,
    Reflect101,
}

/// Resolves an out-of-range coordinate according to `mode`.
/// `None` means the constant border value applies.
pub fn map_coord(coord: isize, len: usize, mode: BorderMode) -> Option<usize> {
    let n = len as isize;
    if n <= 0 {
        return None;
    }

    match mode {
        BorderMode::Constant(_) => {
            if coord < 0 || coord >= n {
                None
            } else {
                Some(coord as usize)
            }
        }
        BorderMode::Replicate => Some(coord.clamp(0, n - 1) as usize),
        BorderMode::Reflect101 => {
            if n == 1 {
                return Some(0);
            }
            let period = 2 * n - 2;
            let mut c = coord % period;
            if c < 0 {
                c += period;
            }
            if c >= n {
                c = period - c;
            }
            Some(c as usize)
        }
    }
}

struct Source<'a> {
    raw: &'a [u8],
    width: usize,
    height: usize,
    channels: usize,
}

impl Source<'_> {
    fn channel(&self, x: isize, y: isize, c: usize, border: BorderMode) -> f32 {
        match (
            map_coord(x, self.width, border),
            map_coord(y, self.height, border),
        ) {
            (Some(ix), Some(iy)) => self.raw[(iy * self.width + ix) * self.channels + c] as f32,
            _ => match border {
                BorderMode::Constant(v) => v as f32,
                _ => 0.0,
            },
        }
    }

    fn sample_into(
        &self,
        x: f32,
        y: f32,
        interpolation: Interpolation,
        border: BorderMode,
        out: &mut [u8],
    ) {
        if !x.is_finite() || !y.is_finite() {
            let v = match border {
                BorderMode::Constant(v) => v,
                _ => 0,
            };
            out.fill(v);
            return;
        }
        match interpolation {
            Interpolation::Nearest => {
                let xi = x.round() as isize;
                let yi = y.round() as isize;
                for (c, px) in out.iter_mut().enumerate() {
                    *px = self.channel(xi, yi, c, border) as u8;
                }
            }
            Interpolation::Linear => {
                let x0 = x.floor() as isize;
                let y0 = y.floor() as isize;
                let fx = x - x0 as f32;
                let fy = y - y0 as f32;
                for (c, px) in out.iter_mut().enumerate() {
                    let v00 = self.channel(x0, y0, c, border);
                    let v10 = self.channel(x0 + 1, y0, c, border);
                    let v01 = self.channel(x0, y0 + 1, c, border);
                    let v11 = self.channel(x0 + 1, y0 + 1, c, border);
                    let v0 = v00 * (1.0 - fx) + v10 * fx;
                    let v1 = v01 * (1.0 - fx) + v11 * fx;
                    *px = (v0 * (1.0 - fy) + v1 * fy).round().clamp(0.0, 255.0) as u8;
                }
            }
        }
    }
}

/// Builds a `width x height` image whose pixel `(x, y)` is sampled from
/// `src` at `(map_x[i], map_y[i])` with `i = y * width + x`.
///
/// Works for any 8-bit pixel layout, so the same maps rectify both
/// grayscale and color frames.
pub fn remap<P>(
    src: &ImageBuffer<P, Vec<u8>>,
    map_x: &[f32],
    map_y: &[f32],
    width: u32,
    height: u32,
    interpolation: Interpolation,
    border: BorderMode,
) -> Result<ImageBuffer<P, Vec<u8>>>
where
    P: Pixel<Subpixel = u8>,
{
    let expected = width as usize * height as usize;
    if map_x.len() != expected || map_y.len() != expected {
        return Err(Error::DimensionMismatch(format!(
            "remap maps have {}/{} entries, expected {}x{} = {}",
            map_x.len(),
            map_y.len(),
            width,
            height,
            expected
        )));
    }

    let mut dst: ImageBuffer<P, Vec<u8>> = ImageBuffer::new(width, height);
    if expected == 0 {
        return Ok(dst);
    }
    crate::validate_image_size(src.width(), src.height())?;

    let channels = P::CHANNEL_COUNT as usize;
    let source = Source {
        raw: src.as_raw(),
        width: src.width() as usize,
        height: src.height() as usize,
        channels,
    };
    let w = width as usize;

    let buf: &mut [u8] = &mut dst;
    buf.par_chunks_mut(w * channels)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, px) in row.chunks_exact_mut(channels).enumerate() {
                let idx = y * w + x;
                source.sample_into(map_x[idx], map_y[idx], interpolation, border, px);
            }
        });

    Ok(dst)
}
