//! Zip handling for metadata retrieve and deploy.

use std::io::{Cursor, Read, Write};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose, Engine as _};
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// Decode a base64 zip (as returned by a retrieve) and unpack it into
/// `outdir`. Returns the written files.
pub fn extract_base64_zip(encoded: &str, outdir: &Path) -> Result<Vec<PathBuf>> {
    let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = general_purpose::STANDARD.decode(cleaned)?;
    extract_zip(&bytes, outdir)
}

pub fn extract_zip(bytes: &[u8], outdir: &Path) -> Result<Vec<PathBuf>> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))?;
    let mut written = Vec::with_capacity(archive.len());

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let Some(relative) = entry.enclosed_name() else {
            return Err(Error::new(ErrorKind::Zip(format!(
                "entry {} escapes the output directory",
                entry.name()
            ))));
        };
        let target = outdir.join(relative);

        if entry.is_dir() {
            std::fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut contents = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut contents)?;
        std::fs::write(&target, contents)?;
        written.push(target);
    }

    debug!(files = written.len(), outdir = %outdir.display(), "Extracted archive");
    Ok(written)
}

/// Move every `*.resource` file found below `dir` up into `dir` itself and
/// drop the package folders the retrieve created.
pub fn flatten_static_resources(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut moved = Vec::new();
    for folder in ["unpackaged/staticresources", "staticresources"] {
        let source = dir.join(folder);
        if !source.is_dir() {
            continue;
        }
        for entry in std::fs::read_dir(&source)? {
            let path = entry?.path();
            let is_resource = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.ends_with("resource"));
            if !is_resource {
                continue;
            }
            if let Some(name) = path.file_name() {
                let target = dir.join(name);
                if target.exists() {
                    std::fs::remove_file(&target)?;
                }
                std::fs::rename(&path, &target)?;
                moved.push(target);
            }
        }
    }

    for leftover in ["unpackaged", "staticresources", "package.xml", "package.zip"] {
        let path = dir.join(leftover);
        if path.is_dir() {
            std::fs::remove_dir_all(&path)?;
        } else if path.exists() {
            std::fs::remove_file(&path)?;
        }
    }
    Ok(moved)
}

/// Zip a metadata directory for deployment, paths relative to `dir`.
pub fn zip_directory(dir: &Path) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    {
        let mut zip = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Deflated);

        let mut pending = vec![dir.to_path_buf()];
        while let Some(current) = pending.pop() {
            let mut entries: Vec<PathBuf> = std::fs::read_dir(&current)?
                .map(|entry| entry.map(|e| e.path()))
                .collect::<std::io::Result<_>>()?;
            entries.sort();
            for path in entries {
                if path.is_dir() {
                    pending.push(path);
                    continue;
                }
                let name = path
                    .strip_prefix(dir)
                    .map_err(|_| Error::new(ErrorKind::Zip(format!("{} is outside {}", path.display(), dir.display()))))?
                    .to_string_lossy()
                    .replace('\\', "/");
                zip.start_file(name, options)?;
                zip.write_all(&std::fs::read(&path)?)?;
            }
        }
        zip.finish()?;
    }
    Ok(buf)
}

/// Deployable bytes for `path`: a zip file as is, a directory zipped.
pub fn deployable(path: &Path) -> Result<Vec<u8>> {
    if path.is_dir() {
        zip_directory(path)
    } else {
        Ok(std::fs::read(path)?)
    }
}
