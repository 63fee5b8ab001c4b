//! Building and extracting snapshot archives.
//!
//! A snapshot is a zip archive of the watched directory: every file and
//! directory below the root becomes one entry named by its `/`-separated
//! relative path. Extraction rejects entries that would resolve outside the
//! destination directory.

use std::fs::File;
use std::io::{Cursor, Read, Seek};
use std::path::Path;

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::utils::errors::{CourierError, Result};

/// File extension snapshot blobs are stored under.
pub const ARCHIVE_EXT: &str = "zip";

/// Pack a directory tree into an in-memory zip archive.
///
/// The root directory itself is not an entry. Entry names are computed by
/// stripping the source prefix and joining the remaining components with
/// `/`, so the result is identical on every platform. Symlinks are skipped.
pub fn pack_dir(source: &Path) -> Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let file_opts = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let dir_opts = SimpleFileOptions::default();

    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.path() == source {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(source) else {
            continue;
        };
        let name = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer.add_directory(name, dir_opts)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name, file_opts)?;
            let mut file = File::open(entry.path())?;
            std::io::copy(&mut file, &mut writer)?;
        }
    }

    Ok(writer.finish()?.into_inner())
}

/// Extract an archive file onto `dest`, creating directories as needed.
pub fn unpack(archive_path: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)?;
    unpack_archive(&mut archive, dest)
}

/// Extract an in-memory archive onto `dest`.
pub fn unpack_bytes(bytes: &[u8], dest: &Path) -> Result<()> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    unpack_archive(&mut archive, dest)
}

fn unpack_archive<R: Read + Seek>(archive: &mut ZipArchive<R>, dest: &Path) -> Result<()> {
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        // Fail closed on entries that would escape the destination root.
        let rel = entry
            .enclosed_name()
            .ok_or_else(|| CourierError::UnsafeArchivePath(entry.name().to_string()))?;
        let target = dest.join(rel);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
    }
    Ok(())
}
