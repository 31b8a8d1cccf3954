//! Blur the background of a photo while keeping its subject sharp.
//!
//! The pipeline decodes any JPEG, PNG or WebP into a canonical RGBA raster,
//! asks a pluggable [`SegmentationProvider`] for a foreground mask, blurs the
//! raster with a separable Gaussian, and composites the masked original over
//! the blurred copy (`dest-in`, then `source-over`). The result is PNG.
//!
//! # Quick Start
//!
//! ```no_run
//! use backdrop_blur::{BlurOptions, Compositor, MaskFileProvider};
//!
//! let compositor = Compositor::new(MaskFileProvider::new("mask.png"), BlurOptions::default());
//! let input = std::fs::read("photo.jpg").unwrap();
//! let output = compositor.blur_background(&input, 10.0).unwrap();
//! std::fs::write("photo_blurred.png", output.bytes()).unwrap();
//! ```
//!
//! # Segmentation
//!
//! Providers are tried in memory first. If that fails, the raster is written
//! to a uniquely named scratch PNG and the provider is called once more with
//! its path; the scratch file is always removed before the call returns.
//!
//! ```no_run
//! use backdrop_blur::{BlurOptions, CommandProvider, Compositor, INPUT_PLACEHOLDER};
//!
//! let segmenter = CommandProvider::new("rembg", vec!["i".into(), INPUT_PLACEHOLDER.into(), "-".into()]);
//! let compositor = Compositor::new(segmenter, BlurOptions::default());
//! ```

#![deny(missing_docs)]

pub mod blur;
pub mod cancel;
pub mod compositing;
mod engine;
pub mod error;
pub mod naming;
pub mod provider;
pub mod raster;
pub mod segmentation;

pub use cancel::CancelToken;
pub use engine::{
    default_output_path, is_supported_image, BlurOptions, Compositor, ProcessResult,
    RadiusPolicy, StoredImage, DEFAULT_MAX_INPUT_BYTES,
};
pub use error::{Error, Result, Stage};
pub use provider::{CommandProvider, FnProvider, MaskFileProvider, INPUT_PLACEHOLDER};
pub use raster::{CompositeResult, Mask, Raster};
pub use segmentation::{SegmentationProvider, SegmenterAdapter};
