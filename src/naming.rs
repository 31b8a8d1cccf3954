//! File naming for stored results.
//!
//! Stored names derive from a caller-requested name or the upload's original
//! name, reduced to `[A-Za-z0-9_.-]`, and are claimed atomically so two
//! concurrent stores never pick the same file.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Base name used when sanitization leaves nothing.
const FALLBACK_BASE: &str = "file";

/// Extension of every stored result.
pub const STORED_EXTENSION: &str = "png";

/// Reduce `name` to a safe file stem.
///
/// Drops any directory part and extension, turns whitespace runs into `_`,
/// and removes everything outside `[A-Za-z0-9_.-]`.
#[must_use]
pub fn sanitize_base(name: &str) -> String {
    let file_name = Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut out = String::with_capacity(file_name.len());
    let mut in_space = false;
    for ch in file_name.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.') {
            out.push(ch);
        }
    }

    if out.is_empty() {
        FALLBACK_BASE.to_string()
    } else {
        out
    }
}

/// Choose the stored base name: the requested one if given and non-blank,
/// else the original upload name.
#[must_use]
pub fn stored_base(original_name: &str, requested: Option<&str>) -> String {
    match requested.map(str::trim).filter(|r| !r.is_empty()) {
        Some(name) => sanitize_base(name),
        None => sanitize_base(original_name),
    }
}

fn candidate(base: &str, n: u32) -> String {
    if n == 0 {
        format!("{base}.{STORED_EXTENSION}")
    } else {
        format!("{base}_{n}.{STORED_EXTENSION}")
    }
}

/// Create the first free file among `base.png`, `base_1.png`, `base_2.png`...
/// in `dir`.
///
/// # Errors
///
/// Returns any I/O error other than the name already existing.
pub fn claim_unique(dir: &Path, base: &str) -> io::Result<(PathBuf, File)> {
    let mut n = 0_u32;
    loop {
        let path = dir.join(candidate(base, n));
        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => return Ok((path, file)),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_unsafe_characters() {
        assert_eq!(sanitize_base("my holiday  photo.jpg"), "my_holiday_photo");
        assert_eq!(sanitize_base("caf\u{e9} (1).png"), "caf_1");
        assert_eq!(sanitize_base("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_base("v1.2-final.webp"), "v1.2-final");
    }

    #[test]
    fn sanitize_falls_back_when_empty() {
        assert_eq!(sanitize_base(""), "file");
        assert_eq!(sanitize_base("???.jpg"), "file");
    }

    #[test]
    fn requested_name_wins_over_original() {
        assert_eq!(stored_base("IMG_0001.jpg", Some("cat on sofa")), "cat_on_sofa");
        assert_eq!(stored_base("IMG_0001.jpg", Some("   ")), "IMG_0001");
        assert_eq!(stored_base("IMG_0001.jpg", None), "IMG_0001");
    }

    #[test]
    fn claim_skips_taken_names() {
        let dir = tempfile::tempdir().unwrap();
        let (first, _) = claim_unique(dir.path(), "shot").unwrap();
        let (second, _) = claim_unique(dir.path(), "shot").unwrap();
        let (third, _) = claim_unique(dir.path(), "shot").unwrap();
        assert_eq!(first.file_name().unwrap(), "shot.png");
        assert_eq!(second.file_name().unwrap(), "shot_1.png");
        assert_eq!(third.file_name().unwrap(), "shot_2.png");
    }
}
