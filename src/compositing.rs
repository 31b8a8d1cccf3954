//! Porter-Duff compositing of the sharp subject over the blurred frame.
//!
//! Two ordered per-pixel operations:
//! 1. **dest-in**: `foreground.alpha = source.alpha * mask / 255`, colour untouched
//! 2. **source-over**: the extracted foreground painted onto the blurred background
//!
//! All rasters carry straight (unassociated) alpha.

use image::Rgba;

use crate::error::{Error, Result};
use crate::raster::{Mask, Raster};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

fn check_dimensions(what: &'static str, expected: (u32, u32), actual: (u32, u32)) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(Error::DimensionMismatch {
            what,
            expected,
            actual,
        })
    }
}

/// Multiply each pixel's alpha by the mask (`dest-in`).
///
/// Pixels where the mask is 0 become fully transparent; colour channels are
/// copied unchanged.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the mask and raster sizes differ.
pub fn extract_foreground(source: &Raster, mask: &Mask) -> Result<Raster> {
    check_dimensions("mask", source.dimensions(), mask.dimensions())?;

    let mut foreground = source.clone();
    let apply = |(px, &m): (&mut [u8], &u8)| {
        px[3] = mul_div_255(px[3], m);
    };

    #[cfg(feature = "parallel")]
    foreground
        .par_chunks_mut(4)
        .zip(mask.as_raw().par_iter())
        .for_each(apply);

    #[cfg(not(feature = "parallel"))]
    foreground
        .chunks_mut(4)
        .zip(mask.as_raw().iter())
        .for_each(apply);

    Ok(foreground)
}

/// `a * b / 255`, rounded to nearest.
fn mul_div_255(a: u8, b: u8) -> u8 {
    let product = u32::from(a) * u32::from(b) + 128;
    #[allow(clippy::cast_possible_truncation)]
    {
        ((product + (product >> 8)) >> 8) as u8
    }
}

/// Source-over for a single straight-alpha pixel pair.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn over_pixel(fg: Rgba<u8>, bg: Rgba<u8>) -> Rgba<u8> {
    let fa = f32::from(fg[3]) / 255.0;
    let ba = f32::from(bg[3]) / 255.0;
    let out_a = fa + ba * (1.0 - fa);
    if out_a <= 0.0 {
        return Rgba([0, 0, 0, 0]);
    }

    let mut out = [0_u8; 4];
    for (c, slot) in out.iter_mut().take(3).enumerate() {
        let value = (f32::from(fg[c]) * fa + f32::from(bg[c]) * ba * (1.0 - fa)) / out_a;
        *slot = value.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgba(out)
}

/// Paint `foreground` over `background` (`source-over`).
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] if the two rasters differ in size.
pub fn overlay(background: &Raster, foreground: &Raster) -> Result<Raster> {
    check_dimensions("foreground", background.dimensions(), foreground.dimensions())?;

    let (width, height) = background.dimensions();
    let mut result = Raster::new(width, height);
    let blend = |((out, bg), fg): ((&mut [u8], &[u8]), &[u8])| {
        let px = over_pixel(
            Rgba([fg[0], fg[1], fg[2], fg[3]]),
            Rgba([bg[0], bg[1], bg[2], bg[3]]),
        );
        out.copy_from_slice(&px.0);
    };

    #[cfg(feature = "parallel")]
    result
        .par_chunks_mut(4)
        .zip(background.par_chunks(4))
        .zip(foreground.par_chunks(4))
        .for_each(blend);

    #[cfg(not(feature = "parallel"))]
    result
        .chunks_mut(4)
        .zip(background.chunks(4))
        .zip(foreground.chunks(4))
        .for_each(blend);

    Ok(result)
}

/// Keep the masked subject of `source` sharp over `blurred`.
///
/// Runs [`extract_foreground`] then [`overlay`]. All three inputs must share
/// dimensions; this is checked before any pixel is written.
///
/// # Errors
///
/// Returns [`Error::DimensionMismatch`] naming the first input that differs
/// from `source`.
pub fn composite(blurred: &Raster, source: &Raster, mask: &Mask) -> Result<Raster> {
    check_dimensions("blurred background", source.dimensions(), blurred.dimensions())?;
    check_dimensions("mask", source.dimensions(), mask.dimensions())?;

    let foreground = extract_foreground(source, mask)?;
    overlay(blurred, &foreground)
}
