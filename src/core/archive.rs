/// File archive and compression helpers
///
/// File backups prefer a `tar -czf` subprocess and fall back to an
/// in-process zip when tar is unavailable or fails. Database dumps are
/// gzip-compressed before storage.

use anyhow::{anyhow, Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;
use walkdir::WalkDir;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::dump::tool_available;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    TarGz,
    Zip,
}

impl ArchiveFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::TarGz => "tar.gz",
            Self::Zip => "zip",
        }
    }
}

/// Archive `paths` into the temp dir under `{stem}.tar.gz` or `{stem}.zip`.
///
/// Every path must exist; the caller filters missing entries first.
pub fn create_file_archive(
    paths: &[PathBuf],
    temp_dir: &Path,
    stem: &str,
) -> Result<(PathBuf, ArchiveFormat)> {
    if tool_available("tar") {
        let output = temp_dir.join(format!("{}.tar.gz", stem));
        match create_tar_archive(paths, &output) {
            Ok(()) => return Ok((output, ArchiveFormat::TarGz)),
            Err(e) => {
                log::warn!("tar archive failed ({}), falling back to zip", e);
                let _ = fs::remove_file(&output);
            }
        }
    }

    let output = temp_dir.join(format!("{}.zip", stem));
    create_zip_archive(paths, &output)?;
    Ok((output, ArchiveFormat::Zip))
}

fn create_tar_archive(paths: &[PathBuf], output: &Path) -> Result<()> {
    let result = Command::new("tar")
        .arg("-czf")
        .arg(output)
        .args(paths)
        .output()
        .context("Failed to run tar")?;

    if !result.status.success() {
        return Err(anyhow!(
            "tar exited with {}: {}",
            result.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&result.stderr).trim()
        ));
    }
    if !output.exists() {
        return Err(anyhow!("Archive file was not created"));
    }
    Ok(())
}

/// Build a zip archive in-process, preserving paths relative to each root
fn create_zip_archive(paths: &[PathBuf], output: &Path) -> Result<()> {
    let file = fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut zip = ZipWriter::new(file);
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    for path in paths {
        let base = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());

        if path.is_file() {
            zip.start_file(base, options)?;
            let mut input = fs::File::open(path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            io::copy(&mut input, &mut zip)?;
        } else if path.is_dir() {
            add_directory_to_zip(&mut zip, path, &base, options)?;
        }
    }

    zip.finish()?;

    if !output.exists() {
        return Err(anyhow!("Zip archive was not created successfully"));
    }
    Ok(())
}

fn add_directory_to_zip(
    zip: &mut ZipWriter<fs::File>,
    dir: &Path,
    local_prefix: &str,
    options: FileOptions,
) -> Result<()> {
    for entry in WalkDir::new(dir).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(dir)
            .context("Walked entry escapes its root")?;
        let name = format!("{}/{}", local_prefix, relative.to_string_lossy());

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            let mut input = fs::File::open(entry.path())
                .with_context(|| format!("Failed to open {}", entry.path().display()))?;
            io::copy(&mut input, zip)?;
        }
    }
    Ok(())
}

/// Gzip-compress a file
pub fn compress_file(input: &Path, output: &Path, level: u32) -> Result<()> {
    let mut reader = fs::File::open(input)
        .with_context(|| format!("Failed to open {}", input.display()))?;
    let writer = fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let mut encoder = GzEncoder::new(writer, Compression::new(level));
    io::copy(&mut reader, &mut encoder).context("Compression failed")?;
    encoder.finish().context("Failed to finish gzip stream")?;
    Ok(())
}
