//! Separable Gaussian blur over straight-alpha RGBA rasters.
//!
//! Colour channels are premultiplied by alpha before convolution and divided
//! back out afterwards, so transparent pixels contribute no colour to their
//! neighbours. Edges are clamped (the border pixel repeats outward).

use std::f64::consts::{FRAC_2_SQRT_PI, PI, SQRT_2};

use crate::error::{Error, Result};
use crate::raster::Raster;

#[cfg(feature = "parallel")]
use rayon::prelude::*;

const CHANNELS: usize = 4;

/// Kernel extent in standard deviations on each side of the centre tap.
const KERNEL_SIGMAS: f64 = 3.0;

/// erf(3 / sqrt(2)), the share of a continuous Gaussian within three sigmas.
const ERF_KERNEL_SIGMAS: f64 = 0.997_300_203_936_739_8;

/// Reach (in taps) up to which the folded tail is summed term by term.
const EXACT_TAIL_REACH: f64 = 4096.0;

/// Normalized 1D Gaussian kernel with running sums for edge folding.
///
/// The kernel never extends past the longest line it will be applied to.
/// Weight that would fall beyond that point lands on the border pixel anyway,
/// so it is kept as `tail` mass on each side instead of as taps.
struct Kernel {
    weights: Vec<f32>,
    /// `cumulative[i]` is `tail` plus the sum of `weights[..i]`.
    cumulative: Vec<f64>,
    tail: f64,
    half: usize,
}

/// Sum of unnormalized Gaussian taps over `-reach..=reach`, from the integral
/// of the continuous curve over the same cells.
fn discrete_mass(sigma: f64, reach: f64) -> f64 {
    let z0 = KERNEL_SIGMAS / SQRT_2;
    let z = (reach + 0.5) / (sigma * SQRT_2);
    let erf = ERF_KERNEL_SIGMAS + FRAC_2_SQRT_PI * (-z0 * z0).exp() * (z - z0);
    sigma * (2.0 * PI).sqrt() * erf
}

impl Kernel {
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn gaussian(sigma: f32, longest_line: usize) -> Self {
        let sigma = f64::from(sigma);
        let two_sigma_sq = 2.0 * sigma * sigma;
        let tap = |d: f64| (-d * d / two_sigma_sq).exp();

        let reach = (sigma * KERNEL_SIGMAS).ceil().max(1.0);
        let half = reach.min(longest_line.max(1) as f64) as usize;

        let raw: Vec<f64> = (0..=2 * half)
            .map(|i| tap(i as f64 - half as f64))
            .collect();
        let inner: f64 = raw.iter().sum();
        let total = if half as f64 >= reach {
            inner
        } else if reach <= EXACT_TAIL_REACH {
            let side: f64 = (half + 1..=reach as usize).map(|d| tap(d as f64)).sum();
            inner + 2.0 * side
        } else {
            discrete_mass(sigma, reach).max(inner)
        };
        let tail = (total - inner) / (2.0 * total);

        let mut weights = Vec::with_capacity(raw.len());
        let mut cumulative = Vec::with_capacity(raw.len() + 1);
        let mut running = tail;
        cumulative.push(running);
        for w in raw {
            let w = w / total;
            weights.push(w as f32);
            running += w;
            cumulative.push(running);
        }

        Self {
            weights,
            cumulative,
            tail,
            half,
        }
    }

    /// True when every neighbour tap is too small to register.
    fn is_identity(&self) -> bool {
        self.weights[self.half] >= 1.0
    }

    /// Convolve one line of `n` RGBA pixels.
    ///
    /// Taps falling outside the line are folded into the border pixels via the
    /// cumulative sums, so cost per pixel is bounded by the line length rather
    /// than the kernel length.
    #[allow(clippy::cast_possible_truncation)]
    fn convolve_line(&self, src: &[f32], dst: &mut [f32]) {
        let n = src.len() / CHANNELS;
        let last = (n - 1) * CHANNELS;
        let span = 2 * self.half;

        for x in 0..n {
            let k0 = self.half.saturating_sub(x);
            let k1 = span.min(self.half + (n - 1 - x));
            let left = self.cumulative[k0] as f32;
            let right =
                (self.cumulative[span + 1] - self.cumulative[k1 + 1] + self.tail) as f32;

            let mut acc = [0.0_f32; CHANNELS];
            for (c, a) in acc.iter_mut().enumerate() {
                *a = left * src[c] + right * src[last + c];
            }
            for k in k0..=k1 {
                let w = self.weights[k];
                let base = (x + k - self.half) * CHANNELS;
                for (c, a) in acc.iter_mut().enumerate() {
                    *a += w * src[base + c];
                }
            }
            dst[x * CHANNELS..(x + 1) * CHANNELS].copy_from_slice(&acc);
        }
    }

    fn convolve_rows(&self, src: &[f32], row_len: usize) -> Vec<f32> {
        let mut dst = vec![0.0_f32; src.len()];

        #[cfg(feature = "parallel")]
        src.par_chunks(row_len)
            .zip(dst.par_chunks_mut(row_len))
            .for_each(|(s, d)| self.convolve_line(s, d));

        #[cfg(not(feature = "parallel"))]
        src.chunks(row_len)
            .zip(dst.chunks_mut(row_len))
            .for_each(|(s, d)| self.convolve_line(s, d));

        dst
    }
}

/// Swap rows and columns of an interleaved RGBA float buffer.
fn transpose(src: &[f32], width: usize, height: usize) -> Vec<f32> {
    let mut dst = vec![0.0_f32; src.len()];
    for y in 0..height {
        for x in 0..width {
            let from = (y * width + x) * CHANNELS;
            let to = (x * height + y) * CHANNELS;
            dst[to..to + CHANNELS].copy_from_slice(&src[from..from + CHANNELS]);
        }
    }
    dst
}

fn premultiply(raster: &Raster) -> Vec<f32> {
    let mut out = Vec::with_capacity(raster.as_raw().len());
    for px in raster.as_raw().chunks_exact(CHANNELS) {
        let a = f32::from(px[3]);
        let scale = a / 255.0;
        out.extend_from_slice(&[
            f32::from(px[0]) * scale,
            f32::from(px[1]) * scale,
            f32::from(px[2]) * scale,
            a,
        ]);
    }
    out
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn unpremultiply(buf: &[f32], width: u32, height: u32) -> Raster {
    let mut raster = Raster::new(width, height);
    for (out, px) in raster.pixels_mut().zip(buf.chunks_exact(CHANNELS)) {
        let alpha = px[3].round().clamp(0.0, 255.0);
        // Fully transparent pixels stay [0, 0, 0, 0].
        if alpha < 1.0 {
            continue;
        }
        let unscale = 255.0 / px[3];
        for (o, &c) in out.0.iter_mut().zip(&px[..3]) {
            *o = (c * unscale).round().clamp(0.0, 255.0) as u8;
        }
        out.0[3] = alpha as u8;
    }
    raster
}

/// Reject radii that are not positive, finite numbers.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] for zero, negative, NaN or infinite radii.
pub fn check_radius(radius: f32) -> Result<()> {
    if radius.is_finite() && radius > 0.0 {
        Ok(())
    } else {
        Err(Error::InvalidParameter(format!(
            "blur radius must be positive, got {radius}"
        )))
    }
}

/// Blur every channel of `raster`, alpha included.
///
/// `radius` is the Gaussian standard deviation in pixels. Any positive, finite
/// radius is accepted. Radii far larger than the image spread it towards its
/// edge-weighted mean; cost is bounded by the image size, not the radius.
/// Radii too small to move any weight off the centre tap return the input.
///
/// # Errors
///
/// Returns [`Error::InvalidParameter`] if `radius` is not a positive, finite
/// number.
pub fn gaussian_blur(raster: &Raster, radius: f32) -> Result<Raster> {
    check_radius(radius)?;

    let (width, height) = raster.dimensions();
    if width == 0 || height == 0 {
        return Ok(raster.clone());
    }
    let (w, h) = (width as usize, height as usize);

    let kernel = Kernel::gaussian(radius, w.max(h));
    if kernel.is_identity() {
        log::debug!("sigma {radius} leaves {width}x{height} raster unchanged");
        return Ok(raster.clone());
    }
    log::debug!(
        "blurring {width}x{height} raster, sigma {radius}, {} taps",
        kernel.weights.len()
    );

    let premultiplied = premultiply(raster);
    let horizontal = kernel.convolve_rows(&premultiplied, w * CHANNELS);
    let columns = transpose(&horizontal, w, h);
    let vertical = kernel.convolve_rows(&columns, h * CHANNELS);
    let result = transpose(&vertical, h, w);

    Ok(unpremultiply(&result, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn checkerboard(size: u32, block: u32) -> Raster {
        Raster::from_fn(size, size, |x, y| {
            if ((x / block) + (y / block)) % 2 == 0 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        })
    }

    fn intensity_variance(raster: &Raster) -> f64 {
        let values: Vec<f64> = raster.pixels().map(|p| f64::from(p[0])).collect();
        #[allow(clippy::cast_precision_loss)]
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
    }

    #[test]
    fn non_positive_radius_is_rejected() {
        let img = checkerboard(8, 2);
        for radius in [0.0, -1.0, -0.5, f32::NAN, f32::INFINITY] {
            let err = gaussian_blur(&img, radius).unwrap_err();
            assert!(
                matches!(err, Error::InvalidParameter(_)),
                "radius {radius} should be rejected"
            );
        }
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = Kernel::gaussian(2.5, 100);
        let sum: f32 = kernel.weights.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
        assert!(kernel.tail.abs() < f64::EPSILON);
        assert_eq!(kernel.weights.len(), 2 * kernel.half + 1);
        for i in 0..kernel.half {
            let mirrored = kernel.weights[2 * kernel.half - i];
            assert!((kernel.weights[i] - mirrored).abs() < 1e-7);
        }
        assert!((kernel.cumulative[kernel.weights.len()] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn kernel_stops_at_the_longest_line() {
        for sigma in [500.0, 3.0e6, 1.0e9, f32::MAX] {
            let kernel = Kernel::gaussian(sigma, 8);
            assert_eq!(kernel.half, 8, "sigma {sigma}");
            assert!(kernel.tail > 0.4, "sigma {sigma}: tail {}", kernel.tail);
            let total = kernel.cumulative[kernel.weights.len()] + kernel.tail;
            assert!((total - 1.0).abs() < 1e-9, "sigma {sigma}: total {total}");
        }
    }

    #[test]
    fn estimated_tail_matches_summed_tail() {
        let sigma = 3000.0_f64;
        let reach = 9000_i32;
        let tap = |d: i32| (-f64::from(d * d) / (2.0 * sigma * sigma)).exp();
        let total: f64 = (-reach..=reach).map(tap).sum();
        let inner: f64 = (-10..=10).map(tap).sum();
        let expected = (total - inner) / (2.0 * total);

        #[allow(clippy::cast_possible_truncation)]
        let kernel = Kernel::gaussian(sigma as f32, 10);
        assert!(
            (kernel.tail - expected).abs() < 1e-6,
            "tail {} vs {expected}",
            kernel.tail
        );
    }

    #[test]
    fn tiny_radius_returns_the_input() {
        let img = Raster::from_pixel(4, 4, Rgba([200, 100, 50, 255]));
        for radius in [1e-30, 1e-20, f32::MIN_POSITIVE, 0.1] {
            assert_eq!(gaussian_blur(&img, radius).unwrap(), img, "radius {radius}");
        }

        let img = checkerboard(8, 1);
        assert_eq!(gaussian_blur(&img, 1e-30).unwrap(), img);
    }

    #[test]
    fn huge_radius_leaves_uniform_image_unchanged() {
        let img = Raster::from_pixel(4, 4, Rgba([200, 100, 50, 255]));
        for radius in [3.0e6, 1.0e9, f32::MAX] {
            assert_eq!(gaussian_blur(&img, radius).unwrap(), img, "radius {radius}");
        }
    }

    #[test]
    fn uniform_image_is_unchanged() {
        let img = Raster::from_pixel(9, 7, Rgba([12, 200, 77, 255]));
        let blurred = gaussian_blur(&img, 3.0).unwrap();
        assert_eq!(blurred, img);
    }

    #[test]
    fn variance_falls_as_radius_grows() {
        let img = checkerboard(64, 8);
        let mut previous = intensity_variance(&img);
        for radius in [1.0, 2.0, 4.0, 8.0] {
            let blurred = gaussian_blur(&img, radius).unwrap();
            let variance = intensity_variance(&blurred);
            assert!(
                variance < previous,
                "radius {radius}: variance {variance} not below {previous}"
            );
            previous = variance;
        }
    }

    #[test]
    fn radius_larger_than_image_stays_correct() {
        let img = Raster::from_fn(10, 6, |x, _| {
            if x < 5 {
                Rgba([0, 0, 0, 255])
            } else {
                Rgba([255, 255, 255, 255])
            }
        });
        let blurred = gaussian_blur(&img, 500.0).unwrap();
        assert_eq!(blurred.dimensions(), (10, 6));
        for px in blurred.pixels() {
            assert_eq!(px[3], 255);
            assert!(
                (120..=135).contains(&px[0]),
                "huge radius should average to mid-grey, got {}",
                px[0]
            );
        }
    }

    #[test]
    fn transparent_regions_do_not_leak_colour() {
        // Left half transparent red, right half opaque blue.
        let img = Raster::from_fn(40, 4, |x, _| {
            if x < 20 {
                Rgba([255, 0, 0, 0])
            } else {
                Rgba([0, 0, 255, 255])
            }
        });
        let blurred = gaussian_blur(&img, 2.0).unwrap();

        assert_eq!(blurred.get_pixel(0, 2)[3], 0, "far corner stays transparent");

        let edge = blurred.get_pixel(19, 2);
        assert!(edge[3] > 0 && edge[3] < 255);
        assert_eq!(edge[0], 0, "no red from transparent pixels");
        assert_eq!(edge[2], 255, "colour of the opaque side survives");
    }

    #[test]
    fn single_pixel_image() {
        let img = Raster::from_pixel(1, 1, Rgba([1, 2, 3, 4]));
        assert_eq!(gaussian_blur(&img, 10.0).unwrap(), img);
    }
}
