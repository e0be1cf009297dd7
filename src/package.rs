//! Collects the built project into a single zip archive.

use std::fs::{self, File};
use std::io::{BufWriter, Write};

use camino::{Utf8Path, Utf8PathBuf};
use zip::CompressionMethod;
use zip::write::{SimpleFileOptions, ZipWriter};

use crate::config::Project;
use crate::error::PackageError;
use crate::loader::glob::find_files;

/// Summary of a written archive.
#[derive(Debug)]
pub struct PackageReport {
    pub archive: Utf8PathBuf,
    /// Archive entry names, in the order they were written.
    pub entries: Vec<String>,
}

/// Writes every file matched by the package globs into the archive.
///
/// The archive is assembled next to its destination and only renamed into
/// place once complete, so a failure never leaves a partial archive behind.
pub fn package(project: &Project) -> Result<PackageReport, PackageError> {
    let archive = project.path(&project.package_output);
    let partial = Utf8PathBuf::from(format!("{archive}.partial"));

    let files = find_files::<PackageError>(&project.base, &project.package_sources)?
        .into_iter()
        .filter(|file| file.path != archive && file.path != partial)
        .map(|file| {
            let name = entry_name(&project.base, &file.path);
            (file.path, name)
        })
        .collect::<Vec<_>>();

    let result = write_archive(&partial, &files);
    if let Err(e) = result {
        fs::remove_file(&partial).ok();
        return Err(e);
    }

    fs::rename(&partial, &archive)?;
    tracing::info!(archive = %archive, files = files.len(), "packaged");

    Ok(PackageReport {
        archive,
        entries: files.into_iter().map(|(_, name)| name).collect(),
    })
}

fn write_archive(dest: &Utf8Path, files: &[(Utf8PathBuf, String)]) -> Result<(), PackageError> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));

    for (path, name) in files {
        zip.start_file(name.as_str(), options)?;
        let mut file = File::open(path)?;
        std::io::copy(&mut file, &mut zip)?;
    }

    zip.finish()?.flush()?;
    Ok(())
}

/// Archive entries always use forward slashes.
fn entry_name(base: &Utf8Path, path: &Utf8Path) -> String {
    let relative = path.strip_prefix(base).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_str())
        .collect::<Vec<_>>()
        .join("/")
}
