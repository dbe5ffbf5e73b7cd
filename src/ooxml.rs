// SPDX-License-Identifier: MIT

//! OOXML front-end: finds the embedded VBA compound document inside a
//! ZIP-packaged Office file (docx, xlsm) and hands it to the OLE layer.
//!
//! The embedded file is conventionally named `vbaProject.bin` but the name
//! is arbitrary; only the `.bin` suffix is reliable. The package is read
//! in-process, so no scratch files are ever created.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use zip::read::ZipArchive;
use zip::result::ZipError;

use crate::cfb::{Cfb, CfbError};
use crate::ole::{self, OleError};

/// An enum to handle OOXML package specific errors
#[derive(Debug)]
pub enum OoxmlError {
    /// Io error
    Io(std::io::Error),
    /// Zip error
    Zip(ZipError),
    /// Cfb error
    Cfb(CfbError),
    /// Ole error raised on the embedded project file
    Ole(OleError),
    /// The archive has no `[Content_Types].xml`, so it is not an Office
    /// package
    NotAnOfficePackage,
    /// No `.bin` entry to treat as the embedded VBA project
    NoVbaBinary,
}

from_err!(std::io::Error, OoxmlError, Io);
from_err!(ZipError, OoxmlError, Zip);
from_err!(CfbError, OoxmlError, Cfb);
from_err!(OleError, OoxmlError, Ole);

impl std::fmt::Display for OoxmlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OoxmlError::Io(e) => write!(f, "I/O error: {e}"),
            OoxmlError::Zip(e) => write!(f, "Zip error: {e}"),
            OoxmlError::Cfb(e) => write!(f, "Cfb error: {e}"),
            OoxmlError::Ole(e) => write!(f, "Embedded project error: {e}"),
            OoxmlError::NotAnOfficePackage => {
                write!(f, "No '[Content_Types].xml' entry (not an office package?)")
            }
            OoxmlError::NoVbaBinary => write!(f, "No '.bin' entry in the package"),
        }
    }
}

impl std::error::Error for OoxmlError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OoxmlError::Io(e) => Some(e),
            OoxmlError::Zip(e) => Some(e),
            OoxmlError::Cfb(e) => Some(e),
            OoxmlError::Ole(e) => Some(e),
            _ => None,
        }
    }
}

const CONTENT_TYPES: &str = "[Content_Types].xml";

/// Reads the full `VBA/_VBA_PROJECT` stream out of the compound document
/// embedded in an OOXML package on disk.
pub fn vba_project_stream<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, OoxmlError> {
    let file = File::open(path)?;
    let mut zip = ZipArchive::new(BufReader::new(file))?;
    // `file_names` iterates in arbitrary order; the entry index is the
    // archive order the candidate picking relies on
    let names: Vec<String> = (0..zip.len())
        .filter_map(|i| zip.name_for_index(i).map(str::to_owned))
        .collect();
    if !names.iter().any(|n| n == CONTENT_TYPES) {
        return Err(OoxmlError::NotAnOfficePackage);
    }
    let name = pick_bin_entry(names.iter().map(String::as_str))
        .map(str::to_owned)
        .ok_or(OoxmlError::NoVbaBinary)?;
    debug!("embedded vba binary: {name}");
    let mut entry = zip.by_name(&name)?;
    let len = entry.size() as usize;
    let cfb = Cfb::new(&mut entry, len)?;
    Ok(ole::read_project_stream(&cfb, "VBA")?)
}

/// Picks the embedded project among the `.bin` entries: a base name
/// case-folding to `vbproject.bin` wins, otherwise the first entry in
/// archive order.
fn pick_bin_entry<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut first = None;
    for name in names {
        if !name.to_lowercase().ends_with(".bin") {
            continue;
        }
        if base_name(name).eq_ignore_ascii_case("vbproject.bin") {
            return Some(name);
        }
        if first.is_none() {
            first = Some(name);
        }
    }
    first
}

fn base_name(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::pick_bin_entry;

    #[test]
    fn first_bin_entry_wins_by_default() {
        let names = ["word/document.xml", "word/One.bin", "word/Two.bin"];
        assert_eq!(pick_bin_entry(names.into_iter()), Some("word/One.bin"));
    }

    #[test]
    fn vbproject_spelling_is_preferred() {
        let names = ["Other.bin", "word/vbProject.bin"];
        assert_eq!(pick_bin_entry(names.into_iter()), Some("word/vbProject.bin"));
    }

    #[test]
    fn suffix_match_ignores_case() {
        let names = ["word/VBAPROJECT.BIN"];
        assert_eq!(pick_bin_entry(names.into_iter()), Some("word/VBAPROJECT.BIN"));
    }

    #[test]
    fn no_bin_entry() {
        let names = ["[Content_Types].xml", "word/document.xml"];
        assert_eq!(pick_bin_entry(names.into_iter()), None);
    }
}
