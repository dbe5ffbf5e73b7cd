//! OLE2 front-end: locates the `_VBA_PROJECT` stream in a legacy Office
//! document (doc, xls).

use std::fs::File;
use std::io::{Seek, SeekFrom};
use std::path::Path;

use log::debug;

use crate::cfb::{Cfb, CfbError};

/// An enum to handle OLE document specific errors
#[derive(Debug)]
pub enum OleError {
    /// Io error
    Io(std::io::Error),
    /// Cfb error
    Cfb(CfbError),
    /// The document has no VBA storage at the expected path
    MissingStorage(&'static str),
    /// The VBA storage carries no `_VBA_PROJECT` stream
    MissingProjectStream(&'static str),
}

from_err!(std::io::Error, OleError, Io);
from_err!(CfbError, OleError, Cfb);

impl std::fmt::Display for OleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OleError::Io(e) => write!(f, "I/O error: {e}"),
            OleError::Cfb(e) => write!(f, "Cfb error: {e}"),
            OleError::MissingStorage(p) => write!(f, "No '{p}' storage"),
            OleError::MissingProjectStream(p) => {
                write!(f, "No '{p}/_VBA_PROJECT' stream")
            }
        }
    }
}

impl std::error::Error for OleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OleError::Io(e) => Some(e),
            OleError::Cfb(e) => Some(e),
            _ => None,
        }
    }
}

/// Reads the full `Macros/VBA/_VBA_PROJECT` stream out of a compound
/// document on disk.
pub fn vba_project_stream<P: AsRef<Path>>(path: P) -> Result<Vec<u8>, OleError> {
    let mut f = File::open(path)?;
    let len = f.seek(SeekFrom::End(0))? as usize;
    f.seek(SeekFrom::Start(0))?;
    let cfb = Cfb::new(&mut f, len)?;
    read_project_stream(&cfb, "Macros/VBA")
}

/// Pulls `_VBA_PROJECT` from `storage` inside an already parsed compound
/// document. OOXML-embedded projects are rooted at `VBA` instead of
/// `Macros/VBA`.
pub(crate) fn read_project_stream(cfb: &Cfb, storage: &'static str) -> Result<Vec<u8>, OleError> {
    if !cfb.exists(storage) {
        return Err(OleError::MissingStorage(storage));
    }
    let stream = format!("{storage}/_VBA_PROJECT");
    debug!("reading {stream}");
    cfb.get_stream(&stream)
        .ok_or(OleError::MissingProjectStream(storage))
}
