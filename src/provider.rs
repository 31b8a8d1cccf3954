//! Concrete [`SegmentationProvider`] backends.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::error::{Error, Result};
use crate::raster::{self, Mask, Raster};
use crate::segmentation::{extract_from_path, SegmentationProvider};

/// Placeholder replaced by the input location in [`CommandProvider`] arguments.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// How often a running segmentation process is polled for exit or cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Runs an external segmentation program.
///
/// In-memory mode pipes the raster as PNG on stdin, substituting `-` for
/// [`INPUT_PLACEHOLDER`]. File mode substitutes the file path instead, or
/// appends it when no argument carries the placeholder. Either way the
/// program must write the foreground image (alpha or greyscale) to stdout.
#[derive(Debug, Clone)]
pub struct CommandProvider {
    program: PathBuf,
    args: Vec<String>,
}

impl CommandProvider {
    /// Invoke `program` with `args`.
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    fn args_for(&self, input: &str, append_if_missing: bool) -> Vec<String> {
        let mut args: Vec<String> = self
            .args
            .iter()
            .map(|a| a.replace(INPUT_PLACEHOLDER, input))
            .collect();
        if append_if_missing && !self.args.iter().any(|a| a.contains(INPUT_PLACEHOLDER)) {
            args.push(input.to_string());
        }
        args
    }

    fn run(&self, args: &[String], stdin: Option<Vec<u8>>, cancel: &CancelToken) -> Result<Mask> {
        cancel.check()?;
        let name = self.program.display().to_string();
        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::SegmentationFailed(format!("cannot start {name}: {e}")))?;

        let writer = match (stdin, child.stdin.take()) {
            (Some(bytes), Some(mut pipe)) => Some(thread::spawn(move || pipe.write_all(&bytes))),
            _ => None,
        };
        let stdout = child.stdout.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                pipe.read_to_end(&mut buf).map(|_| buf)
            })
        });
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = String::new();
                // Diagnostics only; a read failure leaves the message empty.
                let _ = pipe.read_to_string(&mut buf);
                buf
            })
        });

        let status = loop {
            if cancel.is_cancelled() {
                log::debug!("cancelling {name}");
                reap(&mut child);
                return Err(Error::Cancelled);
            }
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    log::debug!("lost track of {name}: {e}");
                    reap(&mut child);
                    return Err(e.into());
                }
            }
        };

        if let Some(Ok(Err(e))) = writer.map(thread::JoinHandle::join) {
            log::debug!("{name} did not consume all of stdin: {e}");
        }
        let diagnostics = stderr.and_then(|h| h.join().ok()).unwrap_or_default();

        if !status.success() {
            return Err(Error::SegmentationFailed(format!(
                "{name} exited with {status}: {}",
                diagnostics.trim()
            )));
        }

        let output = match stdout.map(thread::JoinHandle::join) {
            Some(Ok(read)) => read?,
            _ => return Err(Error::SegmentationFailed(format!("{name} produced no output"))),
        };
        Mask::decode(&output)
    }
}

/// Kill `child` if it is still running and collect its exit status.
fn reap(child: &mut Child) {
    // Either call fails only once the process is already gone.
    let _ = child.kill();
    let _ = child.wait();
}

impl SegmentationProvider for CommandProvider {
    fn extract(&self, raster: &Raster) -> Result<Mask> {
        self.extract_cancellable(raster, &CancelToken::new())
    }

    fn extract_file(&self, path: &Path) -> Result<Mask> {
        self.extract_file_cancellable(path, &CancelToken::new())
    }

    fn extract_cancellable(&self, raster: &Raster, cancel: &CancelToken) -> Result<Mask> {
        let png = raster::encode_png(raster)?;
        self.run(&self.args_for("-", false), Some(png), cancel)
    }

    fn extract_file_cancellable(&self, path: &Path, cancel: &CancelToken) -> Result<Mask> {
        let location = path.display().to_string();
        self.run(&self.args_for(&location, true), None, cancel)
    }
}

/// Serves a precomputed mask image from disk, whatever the input.
#[derive(Debug, Clone)]
pub struct MaskFileProvider {
    path: PathBuf,
}

impl MaskFileProvider {
    /// Use the image at `path` as the mask.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn load(&self) -> Result<Mask> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            Error::SegmentationFailed(format!("cannot read mask {}: {e}", self.path.display()))
        })?;
        Mask::decode(&bytes)
    }
}

impl SegmentationProvider for MaskFileProvider {
    fn extract(&self, _raster: &Raster) -> Result<Mask> {
        self.load()
    }

    fn extract_file(&self, _path: &Path) -> Result<Mask> {
        self.load()
    }
}

type BufferFn = dyn Fn(&Raster) -> Result<Mask> + Send + Sync;
type FileFn = dyn Fn(&Path) -> Result<Mask> + Send + Sync;

/// Provider built from closures.
///
/// Without [`with_file`](Self::with_file), file mode decodes the file and
/// calls the in-memory closure.
pub struct FnProvider {
    buffer: Box<BufferFn>,
    file: Option<Box<FileFn>>,
}

impl FnProvider {
    /// Use `buffer` for in-memory segmentation.
    pub fn new<F>(buffer: F) -> Self
    where
        F: Fn(&Raster) -> Result<Mask> + Send + Sync + 'static,
    {
        Self {
            buffer: Box::new(buffer),
            file: None,
        }
    }

    /// Use `file` for file-mode segmentation.
    #[must_use]
    pub fn with_file<F>(mut self, file: F) -> Self
    where
        F: Fn(&Path) -> Result<Mask> + Send + Sync + 'static,
    {
        self.file = Some(Box::new(file));
        self
    }
}

impl SegmentationProvider for FnProvider {
    fn extract(&self, raster: &Raster) -> Result<Mask> {
        (self.buffer)(raster)
    }

    fn extract_file(&self, path: &Path) -> Result<Mask> {
        match &self.file {
            Some(file) => file(path),
            None => extract_from_path(self, path),
        }
    }
}
