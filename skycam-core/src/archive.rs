//! On-disk archival of captured images.
//!
//! Commanded exposure sequences are written out as they complete: raw
//! little-endian pixel data plus a JSON sidecar carrying the capture
//! metadata, both under a caller-chosen name.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::SkycamError;
use crate::frame::ImageMetadata;

/// Destination for archived captures.
pub trait ArchiveSink: Send + Sync {
    /// Persist one image under `name`, returning the pixel file path.
    fn write(
        &self,
        pixels: &[u16],
        width: u32,
        height: u32,
        meta: &ImageMetadata,
        name: &str,
    ) -> Result<PathBuf, SkycamError>;
}

// ── FlatFileArchive ──────────────────────────────────────────────

/// Archive writing `<name>.raw` and `<name>.json` into one directory.
#[derive(Debug)]
pub struct FlatFileArchive {
    dir: PathBuf,
}

impl FlatFileArchive {
    /// Open (and create if missing) the archive directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self, SkycamError> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)
            .map_err(|e| SkycamError::Archive(format!("create {}: {e}", dir.display())))?;
        Ok(Self { dir })
    }

    /// Directory this archive writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ArchiveSink for FlatFileArchive {
    fn write(
        &self,
        pixels: &[u16],
        width: u32,
        height: u32,
        meta: &ImageMetadata,
        name: &str,
    ) -> Result<PathBuf, SkycamError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(SkycamError::Archive(format!(
                "pixel count {} does not match {width}x{height}",
                pixels.len()
            )));
        }

        let raw_path = self.dir.join(format!("{name}.raw"));
        let mut bytes = Vec::with_capacity(pixels.len() * 2);
        for px in pixels {
            bytes.extend_from_slice(&px.to_le_bytes());
        }
        fs::write(&raw_path, &bytes)
            .map_err(|e| SkycamError::Archive(format!("write {}: {e}", raw_path.display())))?;

        let sidecar_path = self.dir.join(format!("{name}.json"));
        let sidecar = serde_json::to_string_pretty(meta)?;
        fs::write(&sidecar_path, sidecar)
            .map_err(|e| SkycamError::Archive(format!("write {}: {e}", sidecar_path.display())))?;

        debug!(path = %raw_path.display(), "archived capture");
        Ok(raw_path)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_meta() -> ImageMetadata {
        ImageMetadata {
            width: 2,
            height: 2,
            temperature: -12.0,
            exposure: 1.5,
            timestamp_us: 99,
            exposing: true,
            exposures_requested: 3,
            exposure_index: 1,
            quality: 70,
            binning: 1,
            payload_size: 0,
        }
    }

    #[test]
    fn writes_raw_and_sidecar() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = FlatFileArchive::new(tmp.path()).unwrap();

        let pixels = [1u16, 2, 3, 4];
        let path = archive
            .write(&pixels, 2, 2, &sample_meta(), "m31_set1_1.500_1_3")
            .unwrap();

        let raw = fs::read(&path).unwrap();
        assert_eq!(raw, vec![1, 0, 2, 0, 3, 0, 4, 0]);

        let sidecar = fs::read_to_string(tmp.path().join("m31_set1_1.500_1_3.json")).unwrap();
        let meta: ImageMetadata = serde_json::from_str(&sidecar).unwrap();
        assert_eq!(meta, sample_meta());
    }

    #[test]
    fn creates_nested_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a/b/c");
        let archive = FlatFileArchive::new(&nested).unwrap();
        assert!(nested.is_dir());
        assert_eq!(archive.dir(), nested.as_path());
    }

    #[test]
    fn rejects_mismatched_pixel_count() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = FlatFileArchive::new(tmp.path()).unwrap();
        let err = archive.write(&[1u16, 2, 3], 2, 2, &sample_meta(), "bad");
        assert!(matches!(err, Err(SkycamError::Archive(_))));
    }
}
