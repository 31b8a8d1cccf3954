//! Foreground segmentation behind a pluggable provider.
//!
//! [`SegmenterAdapter`] runs a [`SegmentationProvider`] in two modes:
//! in-memory first, then, only if that fails, once more against a PNG copy
//! of the raster written to a scratch directory. The scratch file is owned
//! by a [`tempfile::TempPath`] and removed when it drops, whichever way the
//! call exits.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use tempfile::TempPath;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::raster::{self, Mask, Raster};

/// An external subject-segmentation capability.
///
/// Implementors map an image to a foreground mask of the same dimensions.
pub trait SegmentationProvider: Send + Sync {
    /// Segment an in-memory raster.
    ///
    /// # Errors
    ///
    /// Any error; the adapter treats all of them as a reason to try the
    /// file-based mode.
    fn extract(&self, raster: &Raster) -> Result<Mask>;

    /// Segment an image stored at `path`.
    ///
    /// The default decodes the file and delegates to [`extract`](Self::extract).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or segmentation fails.
    fn extract_file(&self, path: &Path) -> Result<Mask> {
        extract_from_path(self, path)
    }

    /// [`extract`](Self::extract) with a cancellation token.
    ///
    /// Providers that can abort mid-flight should override this.
    ///
    /// # Errors
    ///
    /// As [`extract`](Self::extract), plus [`Error::Cancelled`].
    fn extract_cancellable(&self, raster: &Raster, cancel: &CancelToken) -> Result<Mask> {
        cancel.check()?;
        self.extract(raster)
    }

    /// [`extract_file`](Self::extract_file) with a cancellation token.
    ///
    /// # Errors
    ///
    /// As [`extract_file`](Self::extract_file), plus [`Error::Cancelled`].
    fn extract_file_cancellable(&self, path: &Path, cancel: &CancelToken) -> Result<Mask> {
        cancel.check()?;
        self.extract_file(path)
    }
}

/// Read and normalize the image at `path`, then segment it in memory.
///
/// # Errors
///
/// Returns [`Error::Io`] if the file cannot be read, or whatever
/// normalization or `provider` return.
pub fn extract_from_path<P: SegmentationProvider + ?Sized>(
    provider: &P,
    path: &Path,
) -> Result<Mask> {
    let bytes = std::fs::read(path)?;
    let raster = raster::normalize(&bytes)?;
    provider.extract(&raster)
}

/// Runs a provider with the in-memory/file fallback and checks its output.
pub struct SegmenterAdapter<'a> {
    provider: &'a dyn SegmentationProvider,
    scratch_dir: PathBuf,
}

impl<'a> SegmenterAdapter<'a> {
    /// Wrap `provider`; fallback scratch files go under `scratch_dir`.
    #[must_use]
    pub fn new(provider: &'a dyn SegmentationProvider, scratch_dir: impl Into<PathBuf>) -> Self {
        Self {
            provider,
            scratch_dir: scratch_dir.into(),
        }
    }

    /// Produce a foreground mask for `raster`.
    ///
    /// Tries the in-memory mode, then the file mode once. A mask whose size
    /// differs from the raster is rejected, never resized.
    ///
    /// # Errors
    ///
    /// - [`Error::SegmentationFailed`] with the in-memory attempt's message
    ///   when both modes fail
    /// - [`Error::DimensionMismatch`] when the provider returns a mask of the
    ///   wrong size
    /// - [`Error::Cancelled`] when `cancel` fires
    pub fn extract_foreground_mask(&self, raster: &Raster, cancel: &CancelToken) -> Result<Mask> {
        cancel.check()?;
        log::debug!(
            "segmenting {}x{} raster in memory",
            raster.width(),
            raster.height()
        );

        let primary = match self.provider.extract_cancellable(raster, cancel) {
            Ok(mask) => return check_mask(raster, mask),
            Err(Error::Cancelled) => return Err(Error::Cancelled),
            Err(e) => e,
        };
        log::warn!("in-memory segmentation failed, retrying from file: {primary}");

        match self.extract_via_file(raster, cancel) {
            Ok(mask) => check_mask(raster, mask),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(fallback) => {
                log::warn!("file-based segmentation failed: {fallback}");
                Err(Error::SegmentationFailed(cause_message(&primary)))
            }
        }
    }

    fn extract_via_file(&self, raster: &Raster, cancel: &CancelToken) -> Result<Mask> {
        let scratch = write_scratch_png(&self.scratch_dir, raster)?;
        log::debug!("segmenting from scratch file {}", scratch.display());
        self.provider.extract_file_cancellable(&scratch, cancel)
        // `scratch` drops here and deletes the file.
    }
}

fn check_mask(raster: &Raster, mask: Mask) -> Result<Mask> {
    if mask.dimensions() == raster.dimensions() {
        Ok(mask)
    } else {
        Err(Error::DimensionMismatch {
            what: "segmentation mask",
            expected: raster.dimensions(),
            actual: mask.dimensions(),
        })
    }
}

fn cause_message(err: &Error) -> String {
    match err {
        Error::SegmentationFailed(msg) => msg.clone(),
        other => other.to_string(),
    }
}

/// Write `raster` as PNG to a uniquely named file in `dir`.
///
/// Names combine a millisecond timestamp with a random suffix, so concurrent
/// calls never share a file. The file is deleted when the returned path drops.
fn write_scratch_png(dir: &Path, raster: &Raster) -> Result<TempPath> {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis());
    let mut file = tempfile::Builder::new()
        .prefix(&format!("segment_input_{millis}_"))
        .suffix(".png")
        .rand_bytes(8)
        .tempfile_in(dir)?;

    file.write_all(&raster::encode_png(raster)?)?;
    file.flush()?;
    Ok(file.into_temp_path())
}
