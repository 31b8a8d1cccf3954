//! Pipeline driver and its call sites.

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::blur;
use crate::cancel::CancelToken;
use crate::compositing;
use crate::error::{Error, Result, Stage};
use crate::naming;
use crate::raster::{self, CompositeResult};
use crate::segmentation::{SegmentationProvider, SegmenterAdapter};

/// Default cap on accepted input size (10 MiB).
pub const DEFAULT_MAX_INPUT_BYTES: usize = 10 * 1024 * 1024;

/// Default blur radius per call site.
///
/// The pipeline itself always takes an explicit radius; these are caller
/// policies and neither value is more canonical than the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadiusPolicy {
    /// Results persisted to a store directory. Defaults to 10.
    Store,
    /// Results handed straight back to the caller. Defaults to 20.
    Direct,
}

impl RadiusPolicy {
    /// The radius used when the caller supplies none.
    #[must_use]
    pub fn default_radius(self) -> f32 {
        match self {
            Self::Store => 10.0,
            Self::Direct => 20.0,
        }
    }

    /// The caller's radius if it is a positive number, else the default.
    #[must_use]
    pub fn resolve(self, requested: Option<f32>) -> f32 {
        requested
            .filter(|r| r.is_finite() && *r > 0.0)
            .unwrap_or_else(|| self.default_radius())
    }
}

/// Options controlling pipeline behavior.
#[derive(Debug, Clone)]
pub struct BlurOptions {
    /// Directory for the segmentation fallback's scratch files.
    pub scratch_dir: PathBuf,
    /// Reject inputs larger than this many bytes. `None` disables the check.
    pub max_input_bytes: Option<usize>,
    /// Enable verbose logging.
    pub verbose: bool,
    /// Suppress non-error output.
    pub quiet: bool,
}

impl Default for BlurOptions {
    fn default() -> Self {
        Self {
            scratch_dir: std::env::temp_dir(),
            max_input_bytes: Some(DEFAULT_MAX_INPUT_BYTES),
            verbose: false,
            quiet: false,
        }
    }
}

/// A result persisted by [`Compositor::process_to_store`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// Full path of the written file.
    pub path: PathBuf,
    /// File name within the store directory.
    pub filename: String,
    /// Name the input arrived with.
    pub original_name: String,
    /// Size of the stored PNG in bytes.
    pub file_size: u64,
}

/// Result of processing a single image file.
#[derive(Debug)]
pub struct ProcessResult {
    /// Path of the input file.
    pub path: PathBuf,
    /// Where the output was written, on success.
    pub output: Option<PathBuf>,
    /// Whether processing succeeded.
    pub success: bool,
    /// Stage that failed, if any.
    pub failed_stage: Option<Stage>,
    /// Human-readable status message.
    pub message: String,
}

/// Runs the background-blur pipeline against one segmentation provider.
///
/// Holds no per-call state; a single instance can serve concurrent calls
/// from multiple threads.
pub struct Compositor {
    provider: Box<dyn SegmentationProvider>,
    options: BlurOptions,
}

impl Compositor {
    /// Create a compositor around `provider`.
    pub fn new(provider: impl SegmentationProvider + 'static, options: BlurOptions) -> Self {
        Self {
            provider: Box::new(provider),
            options,
        }
    }

    /// The options this compositor was built with.
    #[must_use]
    pub fn options(&self) -> &BlurOptions {
        &self.options
    }

    /// Blur everything but the segmented subject of `input`.
    ///
    /// `input` may be JPEG, PNG or WebP; the result is always PNG with alpha.
    ///
    /// # Errors
    ///
    /// See [`blur_background_cancellable`](Self::blur_background_cancellable).
    pub fn blur_background(&self, input: &[u8], radius: f32) -> Result<CompositeResult> {
        self.blur_background_cancellable(input, radius, &CancelToken::new())
    }

    /// [`blur_background`](Self::blur_background), abandoning work once
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// - [`Error::InputTooLarge`] / [`Error::UnsupportedFormat`] for bad input
    /// - [`Error::InvalidParameter`] for a non-positive radius
    /// - [`Error::SegmentationFailed`] if the provider fails in both modes
    /// - [`Error::DimensionMismatch`] if the provider's mask has the wrong size
    /// - [`Error::Cancelled`] if `cancel` fires
    pub fn blur_background_cancellable(
        &self,
        input: &[u8],
        radius: f32,
        cancel: &CancelToken,
    ) -> Result<CompositeResult> {
        if let Some(limit) = self.options.max_input_bytes {
            if input.len() > limit {
                return Err(Error::InputTooLarge {
                    size: input.len(),
                    limit,
                });
            }
        }
        blur::check_radius(radius)?;

        let canonical = raster::normalize(input)?;
        let (width, height) = canonical.dimensions();

        let mask = SegmenterAdapter::new(self.provider.as_ref(), &self.options.scratch_dir)
            .extract_foreground_mask(&canonical, cancel)?;
        cancel.check()?;

        let blurred = blur::gaussian_blur(&canonical, radius)?;
        cancel.check()?;

        let composed = compositing::composite(&blurred, &canonical, &mask)?;
        let bytes = raster::encode_png(&composed)?;
        log::info!(
            "blurred background of {width}x{height} image (radius {radius}), {} bytes",
            bytes.len()
        );
        Ok(CompositeResult::new(bytes, width, height))
    }

    /// Blur `input` and write the PNG into `store_dir` under a fresh name.
    ///
    /// The name comes from `requested_name` or `original_name`, sanitized and
    /// suffixed `_1`, `_2`, ... until it is free. `radius` falls back to
    /// [`RadiusPolicy::Store`]. Nothing is written if the pipeline fails.
    ///
    /// # Errors
    ///
    /// Any pipeline error, or [`Error::Io`] if the file cannot be written.
    pub fn process_to_store(
        &self,
        input: &[u8],
        original_name: &str,
        requested_name: Option<&str>,
        store_dir: &Path,
        radius: Option<f32>,
    ) -> Result<StoredImage> {
        let radius = RadiusPolicy::Store.resolve(radius);
        let result = self.blur_background(input, radius)?;

        std::fs::create_dir_all(store_dir)?;
        let base = naming::stored_base(original_name, requested_name);
        let (path, mut file) = naming::claim_unique(store_dir, &base)?;
        if let Err(e) = file.write_all(result.bytes()) {
            drop(file);
            // A half-written file must not look like a stored result.
            let _ = std::fs::remove_file(&path);
            return Err(e.into());
        }

        let filename = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        log::info!("stored {filename} ({} bytes)", result.len());

        Ok(StoredImage {
            path,
            filename,
            original_name: original_name.to_string(),
            file_size: result.len() as u64,
        })
    }

    /// Process a single image file: load, blur background, save PNG.
    ///
    /// `radius` falls back to [`RadiusPolicy::Direct`].
    #[must_use]
    pub fn process_file(&self, input: &Path, output: &Path, radius: Option<f32>) -> ProcessResult {
        let mut result = ProcessResult {
            path: input.to_path_buf(),
            output: None,
            success: false,
            failed_stage: None,
            message: String::new(),
        };

        let outcome = std::fs::read(input)
            .map_err(Error::from)
            .and_then(|bytes| self.blur_background(&bytes, RadiusPolicy::Direct.resolve(radius)))
            .and_then(|composite| {
                if let Some(parent) = output.parent() {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                std::fs::write(output, composite.bytes())?;
                Ok(composite)
            });

        match outcome {
            Ok(composite) => {
                let (w, h) = composite.dimensions();
                result.success = true;
                result.output = Some(output.to_path_buf());
                result.message = format!("Background blurred ({w}x{h}, {} bytes)", composite.len());
            }
            Err(e) => {
                result.failed_stage = Some(e.stage());
                result.message = e.to_string();
            }
        }

        result
    }

    /// Process all supported images in a directory.
    ///
    /// Outputs are named `{stem}.png` inside `output_dir`. Uses parallel
    /// iteration when the `parallel` feature is enabled (via rayon).
    #[must_use]
    pub fn process_directory(
        &self,
        input_dir: &Path,
        output_dir: &Path,
        radius: Option<f32>,
    ) -> Vec<ProcessResult> {
        let failure = |path: &Path, message: String| ProcessResult {
            path: path.to_path_buf(),
            output: None,
            success: false,
            failed_stage: Some(Stage::Io),
            message,
        };

        let entries: Vec<PathBuf> = match std::fs::read_dir(input_dir) {
            Ok(rd) => rd
                .filter_map(std::result::Result::ok)
                .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
                .map(|e| e.path())
                .filter(|p| is_supported_image(p))
                .collect(),
            Err(e) => return vec![failure(input_dir, format!("Failed to read directory: {e}"))],
        };

        if let Err(e) = std::fs::create_dir_all(output_dir) {
            return vec![failure(
                output_dir,
                format!("Failed to create output directory: {e}"),
            )];
        }

        let run = |input_path: &PathBuf| {
            let stem = input_path.file_stem().unwrap_or_default().to_string_lossy();
            let output_path = output_dir.join(format!("{stem}.png"));
            self.process_file(input_path, &output_path, radius)
        };

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            entries.par_iter().map(run).collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            entries.iter().map(run).collect()
        }
    }
}

/// Check if a file has a supported image extension.
#[must_use]
pub fn is_supported_image(path: &Path) -> bool {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => matches!(
            ext.to_lowercase().as_str(),
            "jpg" | "jpeg" | "png" | "webp"
        ),
        None => false,
    }
}

/// Generate a default output path from an input path.
///
/// Example: `"photo.jpg"` becomes `"photo_blurred.png"`.
#[must_use]
pub fn default_output_path(input: &Path) -> PathBuf {
    let stem = input.file_stem().unwrap_or_default().to_string_lossy();
    let parent = input.parent().unwrap_or(Path::new("."));
    parent.join(format!("{stem}_blurred.png"))
}
