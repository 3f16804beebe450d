use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("bad zip archive: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("archive has no file members")]
    Empty,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// A file unpacked from an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    /// Where it was written.
    pub path: PathBuf,
    /// Its path inside the archive, `/` separated, e.g. `am/ticks.csv`.
    pub name: String,
}

/// Extract the file members of the zip at `archive` under `dir`, keeping
/// their folders.  Members with an unsafe path are skipped.  Returns the
/// members in archive order.
pub fn extract_members(archive: &Path, dir: &Path) -> Result<Vec<Member>, ExtractError> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;

    let mut out: Vec<Member> = Vec::new();
    for i in 0..zip.len() {
        let mut member = zip.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let relative = match member.enclosed_name() {
            Some(p) if p.file_name().is_some() => p,
            _ => continue,
        };
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .join("/");
        let path = dir.join(&relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&path)?;
        io::copy(&mut member, &mut outfile)?;
        // a repeated entry replaces the earlier one
        out.retain(|m| m.name != name);
        out.push(Member { path, name });
    }

    if out.is_empty() {
        return Err(ExtractError::Empty);
    }
    Ok(out)
}
