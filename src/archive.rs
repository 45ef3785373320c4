//! Course container codec.
//!
//! A container is a plain zip archive whose root entries mirror a course
//! directory. Containers are never patched in place: `sync` is a full re-pack
//! written to a sibling temp file and renamed over the target.

use crate::env::{self, control};
use crate::error::{EngineError, Result};
use anyhow::Context;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

/// Pack every regular file under `source_dir` into `dest_file`.
///
/// Version-control directories and previously packed containers are left out.
/// Returns the number of files written.
pub fn pack(source_dir: &Path, dest_file: &Path) -> Result<usize> {
    pack_filtered(source_dir, dest_file, |_| true)
}

/// Pack the files under `source_dir` whose relative path passes `include`.
pub fn pack_filtered<F>(source_dir: &Path, dest_file: &Path, include: F) -> Result<usize>
where
    F: Fn(&Path) -> bool,
{
    if !source_dir.is_dir() {
        return Err(EngineError::Packaging(format!(
            "source directory {} does not exist",
            source_dir.display()
        )));
    }
    let count = write_archive(source_dir, dest_file, &include).map_err(packaging)?;
    info!("Packed {} files from {:?} into {:?}", count, source_dir, dest_file);
    Ok(count)
}

/// Extract `archive_file` into a fresh runtime directory and return its path.
pub fn unpack(archive_file: &Path) -> Result<PathBuf> {
    let runtime_dir = std::env::temp_dir().join(format!(
        "{}{}",
        env::cache::RUNTIME_PREFIX,
        uuid::Uuid::new_v4()
    ));
    unpack_to(archive_file, &runtime_dir)?;
    Ok(runtime_dir)
}

/// Extract `archive_file` into `dest_dir`, creating it when missing.
pub fn unpack_to(archive_file: &Path, dest_dir: &Path) -> Result<usize> {
    let count = extract_archive(archive_file, dest_dir).map_err(packaging)?;
    info!("Unpacked {} files from {:?} into {:?}", count, archive_file, dest_dir);
    Ok(count)
}

/// Re-pack a runtime directory over an existing archive.
pub fn sync(runtime_dir: &Path, archive_file: &Path) -> Result<usize> {
    debug!("Syncing {:?} back into {:?}", runtime_dir, archive_file);
    pack(runtime_dir, archive_file)
}

fn packaging(err: anyhow::Error) -> EngineError {
    EngineError::Packaging(format!("{err:#}"))
}

fn is_packable(relative: &Path) -> bool {
    let in_control_dir = relative
        .components()
        .any(|c| c.as_os_str() == control::GIT_DIR);
    let is_archive = relative
        .extension()
        .is_some_and(|ext| ext == env::ARCHIVE_EXTENSION);
    !in_control_dir && !is_archive
}

fn archive_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn write_archive(
    source_dir: &Path,
    dest_file: &Path,
    include: &dyn Fn(&Path) -> bool,
) -> anyhow::Result<usize> {
    let parent = match dest_file.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;

    let dest_abs = fs::canonicalize(&parent)
        .map(|p| p.join(dest_file.file_name().unwrap_or_default()))
        .unwrap_or_else(|_| dest_file.to_path_buf());

    let mut entries = Vec::new();
    let walker = WalkDir::new(source_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.file_name() != control::GIT_DIR);
    for entry in walker {
        let entry = entry.context("failed to walk source directory")?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(source_dir)?.to_path_buf();
        if !is_packable(&relative) || !include(&relative) {
            continue;
        }
        if fs::canonicalize(entry.path()).is_ok_and(|p| p == dest_abs) {
            continue;
        }
        entries.push((entry.path().to_path_buf(), relative));
    }

    // staged after the walk so the temp file never lands in the archive
    let staged = tempfile::NamedTempFile::new_in(&parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    let mut writer = ZipWriter::new(staged.reopen()?);
    let base_options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, relative) in &entries {
        #[allow(unused_mut)]
        let mut options = base_options;
        #[cfg(unix)]
        {
            let mode = fs::metadata(path)?.permissions().mode();
            options = options.unix_permissions(mode);
        }
        writer.start_file(archive_name(relative), options)?;
        let mut input =
            File::open(path).with_context(|| format!("failed to read {}", path.display()))?;
        io::copy(&mut input, &mut writer)?;
    }
    writer.finish()?;

    staged
        .persist(dest_file)
        .with_context(|| format!("failed to write {}", dest_file.display()))?;
    Ok(entries.len())
}

fn extract_archive(archive_file: &Path, dest_dir: &Path) -> anyhow::Result<usize> {
    let file = File::open(archive_file)
        .with_context(|| format!("failed to open {}", archive_file.display()))?;
    let mut archive = ZipArchive::new(file)
        .with_context(|| format!("{} is not a readable archive", archive_file.display()))?;
    fs::create_dir_all(dest_dir)?;

    let mut count = 0;
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(enclosed) = entry.enclosed_name().map(|p| dest_dir.join(p)) else {
            debug!("Skipping archive entry outside of root: {}", entry.name());
            continue;
        };
        if entry.name().ends_with('/') || entry.is_dir() {
            fs::create_dir_all(&enclosed)?;
            continue;
        }
        if let Some(parent) = enclosed.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&enclosed)
            .with_context(|| format!("failed to create {}", enclosed.display()))?;
        io::copy(&mut entry, &mut outfile)?;
        #[cfg(unix)]
        {
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&enclosed, fs::Permissions::from_mode(mode))?;
            }
        }
        count += 1;
    }
    Ok(count)
}
