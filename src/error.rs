//! Error types for the backdrop-blur crate.

/// Pipeline stage an error originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Decoding and alpha normalization of the input bytes.
    Normalize,
    /// External foreground segmentation.
    Segment,
    /// Gaussian blur of the canonical raster.
    Blur,
    /// Extraction and overlay compositing.
    Composite,
    /// PNG encoding of the final raster.
    Encode,
    /// Filesystem access outside the stages above.
    Io,
}

/// Errors that can occur while blurring an image background.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The input bytes could not be decoded as JPEG, PNG or WebP.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The input exceeds the configured byte limit.
    #[error("input is {size} bytes, limit is {limit} bytes")]
    InputTooLarge {
        /// Input length in bytes.
        size: usize,
        /// Configured limit in bytes.
        limit: usize,
    },

    /// Both the in-memory and the file-based segmentation attempts failed.
    ///
    /// Carries the message of the in-memory attempt.
    #[error("background removal failed: {0}")]
    SegmentationFailed(String),

    /// A caller-supplied parameter is out of range.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Two rasters that must share dimensions do not.
    #[error("{what} is {}x{}, expected {}x{}", actual.0, actual.1, expected.0, expected.1)]
    DimensionMismatch {
        /// Which input disagreed.
        what: &'static str,
        /// Dimensions of the reference raster.
        expected: (u32, u32),
        /// Dimensions actually received.
        actual: (u32, u32),
    },

    /// The caller cancelled the invocation.
    #[error("operation cancelled")]
    Cancelled,

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error occurred while encoding an image.
    #[error("image processing error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// The stage this error is attributed to.
    #[must_use]
    pub fn stage(&self) -> Stage {
        match self {
            Self::UnsupportedFormat(_) | Self::InputTooLarge { .. } => Stage::Normalize,
            Self::SegmentationFailed(_) | Self::Cancelled => Stage::Segment,
            Self::InvalidParameter(_) => Stage::Blur,
            Self::DimensionMismatch { .. } => Stage::Composite,
            Self::Image(_) => Stage::Encode,
            Self::Io(_) => Stage::Io,
        }
    }

    /// Whether the caller's input caused the failure, as opposed to the
    /// segmentation capability or the environment.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::InputTooLarge { .. } | Self::InvalidParameter(_)
        )
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let io_err = Error::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io_err.to_string().contains("gone"));

        let unsupported = Error::UnsupportedFormat("tiff".to_string());
        assert!(unsupported.to_string().contains("tiff"));

        let mismatch = Error::DimensionMismatch {
            what: "mask",
            expected: (200, 100),
            actual: (10, 20),
        };
        let msg = mismatch.to_string();
        assert!(msg.contains("mask is 10x20"));
        assert!(msg.contains("200x100"));

        let seg = Error::SegmentationFailed("model missing".to_string());
        assert_eq!(seg.to_string(), "background removal failed: model missing");
    }

    #[test]
    fn input_errors_are_told_apart_from_infrastructure() {
        assert!(Error::UnsupportedFormat(String::new()).is_input_error());
        assert!(Error::InvalidParameter(String::new()).is_input_error());
        assert!(Error::InputTooLarge { size: 2, limit: 1 }.is_input_error());
        assert!(!Error::SegmentationFailed(String::new()).is_input_error());
        assert!(!Error::Cancelled.is_input_error());
    }

    #[test]
    fn stage_attribution() {
        assert_eq!(Error::UnsupportedFormat(String::new()).stage(), Stage::Normalize);
        assert_eq!(Error::SegmentationFailed(String::new()).stage(), Stage::Segment);
        assert_eq!(Error::InvalidParameter(String::new()).stage(), Stage::Blur);
        let mismatch = Error::DimensionMismatch {
            what: "mask",
            expected: (1, 1),
            actual: (2, 2),
        };
        assert_eq!(mismatch.stage(), Stage::Composite);
    }
}
