//! Zip packing and unpacking for DIRECTORY-typed resources.
//!
//! Directory resources travel through the store as zip archives; inputs are
//! extracted after download and outputs are re-archived before upload. The
//! zip work is blocking I/O and runs on the blocking pool.

use std::fs::File;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use weir_core::error::{Result, WeirError};

/// Sibling path with `.zip` appended to the full file name.
pub fn zip_sibling(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".zip");
    PathBuf::from(name)
}

/// Extract `archive` into `dest`. The caller creates `dest` beforehand.
pub async fn unzip_into(archive: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::open(&archive)?;
        let mut zip = ZipArchive::new(file).map_err(|e| {
            WeirError::Materialize(format!("invalid zip archive {}: {}", archive.display(), e))
        })?;
        zip.extract(&dest).map_err(|e| {
            WeirError::Materialize(format!("failed to extract {}: {}", archive.display(), e))
        })?;
        Ok(())
    })
    .await
    .map_err(|e| WeirError::Materialize(format!("archive task failed: {}", e)))?
}

/// Pack `dir` recursively into a zip at `dest`, entry names relative to `dir`.
pub async fn zip_dir(dir: PathBuf, dest: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || -> Result<()> {
        let file = File::create(&dest)?;
        let mut zip = ZipWriter::new(file);
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

        for entry in WalkDir::new(&dir) {
            let entry = entry.map_err(|e| {
                WeirError::Collect(format!("walk failed under {}: {}", dir.display(), e))
            })?;
            let rel = match entry.path().strip_prefix(&dir) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            let name = rel.to_string_lossy().replace('\\', "/");

            if entry.file_type().is_dir() {
                zip.add_directory(format!("{}/", name), options)
                    .map_err(|e| WeirError::Collect(format!("failed to add {}: {}", name, e)))?;
            } else {
                zip.start_file(name.clone(), options)
                    .map_err(|e| WeirError::Collect(format!("failed to add {}: {}", name, e)))?;
                let mut src = File::open(entry.path())?;
                std::io::copy(&mut src, &mut zip)?;
            }
        }

        zip.finish()
            .map_err(|e| WeirError::Collect(format!("failed to finish archive: {}", e)))?;
        Ok(())
    })
    .await
    .map_err(|e| WeirError::Collect(format!("archive task failed: {}", e)))?
}
