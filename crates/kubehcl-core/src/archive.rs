//! Tar archive creation and extraction for module folders
//!
//! Archives produced by [`pack_dir`] hold every file below the folder,
//! prefixed with the folder's base name. Extraction renames that first
//! path component to the requested target, so `web/main.hcl` pulled as
//! `frontend` lands in `frontend/main.hcl`.

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Cursor, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Builder, Header};

use crate::error::{CoreError, Result};
use crate::vfs::MemFs;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Information about a file in an archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Path within the archive
    pub path: String,
    /// File size in bytes
    pub size: u64,
}

/// Create an uncompressed tar of `dir`, entries prefixed by its base name
pub fn pack_dir(dir: &Path) -> Result<Vec<u8>> {
    let base = dir
        .canonicalize()?
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| CoreError::Archive {
            message: format!("cannot determine folder name of {}", dir.display()),
        })?;

    let mut builder = Builder::new(Vec::new());
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| CoreError::Archive {
            message: e.to_string(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(dir)
            .map_err(|e| CoreError::Archive {
                message: e.to_string(),
            })?;
        let archive_path = format!("{}/{}", base, rel.to_string_lossy().replace('\\', "/"));
        let content = std::fs::read(entry.path())?;
        add_bytes_to_archive(&mut builder, &archive_path, &content)?;
    }

    Ok(builder.into_inner()?)
}

/// Gzip compress `data`
pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

/// Whether `data` starts with the gzip magic bytes
pub fn is_gzip(data: &[u8]) -> bool {
    data.len() >= 2 && data[..2] == GZIP_MAGIC
}

/// Decompress when gzipped, otherwise return the bytes unchanged
fn plain_tar(data: &[u8]) -> Result<Vec<u8>> {
    if !is_gzip(data) {
        return Ok(data.to_vec());
    }
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Visit every regular file of a (possibly gzipped) tar archive with its
/// path after replacing the first component by `target`
fn for_each_file(
    data: &[u8],
    target: &Path,
    mut visit: impl FnMut(PathBuf, Vec<u8>) -> Result<()>,
) -> Result<()> {
    let tar_bytes = plain_tar(data)?;
    let mut archive = Archive::new(Cursor::new(tar_bytes));
    let mut files = 0usize;

    for entry in archive.entries()? {
        let mut entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let path = entry.path()?.into_owned();
        let rest = strip_first_component(&path)?;
        if rest.as_os_str().is_empty() {
            continue;
        }
        let mut content = Vec::new();
        entry.read_to_end(&mut content)?;
        visit(target.join(rest), content)?;
        files += 1;
    }
    if files == 0 {
        return Err(CoreError::Archive {
            message: "archive contains no files".to_string(),
        });
    }
    Ok(())
}

/// Drop the top-level directory of an archive path, rejecting paths that
/// would escape the extraction root
fn strip_first_component(path: &Path) -> Result<PathBuf> {
    let mut out = PathBuf::new();
    for (i, component) in path.components().enumerate() {
        match component {
            Component::Normal(part) if i > 0 => out.push(part),
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(CoreError::Archive {
                    message: format!("illegal path in archive: {}", path.display()),
                });
            }
        }
    }
    Ok(out)
}

/// Expand an archive into memory under `target`
pub fn unpack_to_memfs(data: &[u8], target: &Path) -> Result<MemFs> {
    let mut fs = MemFs::new();
    for_each_file(data, target, |path, content| {
        fs.insert(path, content);
        Ok(())
    })?;
    Ok(fs)
}

/// Expand an archive into `dest` on disk
///
/// Files are written to a sibling staging directory first and moved into
/// place only after the whole archive was read, so a failure leaves nothing
/// behind.
pub fn unpack_to_dir(data: &[u8], dest: &Path) -> Result<()> {
    if dest.exists() {
        return Err(CoreError::Archive {
            message: format!("destination {} already exists", dest.display()),
        });
    }
    let parent = match dest.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)?;
    let staging = tempfile_dir(&parent)?;

    let result = for_each_file(data, staging.as_path(), |path, content| {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::write(&path, content)?;
        Ok(())
    });

    match result {
        Ok(()) => {
            std::fs::rename(&staging, dest)?;
            tracing::debug!(dest = %dest.display(), "archive unpacked");
            Ok(())
        }
        Err(e) => {
            tracing::debug!(staging = %staging.display(), error = %e, "discarding partial unpack");
            let _ = std::fs::remove_dir_all(&staging);
            Err(e)
        }
    }
}

fn tempfile_dir(parent: &Path) -> Result<PathBuf> {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or_default();
    let dir = parent.join(format!(".kubehcl-pull-{}-{}", std::process::id(), nanos));
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// List files in a (possibly gzipped) archive
pub fn list_archive(data: &[u8]) -> Result<Vec<ArchiveEntry>> {
    let tar_bytes = plain_tar(data)?;
    let mut archive = Archive::new(Cursor::new(tar_bytes));
    let mut entries = Vec::new();
    for entry in archive.entries()? {
        let entry = entry?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        entries.push(ArchiveEntry {
            path: entry.path()?.to_string_lossy().to_string(),
            size: entry.header().size()?,
        });
    }
    Ok(entries)
}

/// Add bytes to a tar archive with a given path
fn add_bytes_to_archive<W: Write>(
    builder: &mut Builder<W>,
    archive_path: &str,
    content: &[u8],
) -> Result<()> {
    let mut header = Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    header.set_mtime(0);
    header.set_cksum();

    builder.append_data(&mut header, archive_path, content)?;

    Ok(())
}
