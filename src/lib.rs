// SPDX-License-Identifier: MIT

//! Rust VBA import hash extractor
//!
//! **vba-imphash** computes a deterministic import hash for Microsoft
//! Office documents that embed VBA macros. The proprietary `_VBA_PROJECT`
//! stream is located inside the document container (legacy OLE2 compound
//! files and ZIP-packaged OOXML files are both supported), its identifier
//! table is reconstructed, and the identifiers that match a fixed
//! vocabulary of VBA language-reference symbols are hashed in order of
//! appearance. Samples of the same malware family reference the same
//! identifier sets and therefore share the hash.
//!
//! # Examples
//! ```no_run
//! use vba_imphash::compute_imphash;
//!
//! let result = compute_imphash("invoice.docm");
//! println!("vba imphash = {}", result.hash);
//! for name in &result.imports {
//!     println!("import identifier: {name}");
//! }
//! ```
//!
//! The computation never fails: unknown or broken inputs collapse into
//! sentinel hashes (see [`Imphash`]), so a corrupt sample cannot abort a
//! bulk triage run.

#![warn(missing_docs)]

macro_rules! from_err {
    ($from:ty, $to:tt, $var:tt) => {
        impl From<$from> for $to {
            fn from(e: $from) -> $to {
                $to::$var(e)
            }
        }
    };
}

mod cfb;
mod imphash;
pub mod ole;
pub mod ooxml;
mod vba;

use std::fs::File;
use std::io::Read;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

pub use crate::cfb::{Cfb, CfbError};
pub use crate::imphash::Vocabulary;
pub use crate::ole::OleError;
pub use crate::ooxml::OoxmlError;
pub use crate::vba::identifiers_from_stream;

/// Hash reported when the input is not an Office file at all.
pub const INVALID_OFFICE_FILE: &str = "INVALID_OFFICE_FILE";
/// Hash reported when an OLE input is structurally broken or carries no
/// VBA project.
pub const INVALID_OLE_OFFICE_FILE: &str = "INVALID_OLE_OFFICE_FILE";
/// Hash reported when an OOXML input is structurally broken or carries no
/// VBA project.
pub const INVALID_OOXML_OFFICE_FILE: &str = "INVALID_OOXML_OFFICE_FILE";
/// Hash reported when no identifier matched the import vocabulary.
pub const NO_IMPHASH_IDENTIFIERS: &str = "NO_IMPHASH_IDENTIFIERS";

/// Office file types, decided from the first two bytes of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfficeKind {
    /// Compound File Binary Format MS-CFB (doc, xls)
    Ole,
    /// Office Open XML package (docx, xlsm)
    Ooxml,
    /// Anything else
    Invalid,
}

impl OfficeKind {
    /// Classifies a file head: `D0 CF` is OLE, `PK` is a candidate OOXML
    /// package, everything else is invalid.
    pub fn sniff(head: &[u8]) -> OfficeKind {
        match head {
            [0xD0, 0xCF, ..] => OfficeKind::Ole,
            [b'P', b'K', ..] => OfficeKind::Ooxml,
            _ => OfficeKind::Invalid,
        }
    }
}

/// The result of an import hash computation.
///
/// `hash` is either 32 lowercase hex characters (MD5 of the dash-joined
/// import list) or one of the sentinel values
/// ([`INVALID_OFFICE_FILE`], [`INVALID_OLE_OFFICE_FILE`],
/// [`INVALID_OOXML_OFFICE_FILE`], [`NO_IMPHASH_IDENTIFIERS`]).
/// `imports` and `others` partition the parsed identifier list in order
/// of first appearance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Imphash {
    /// The import hash or a sentinel
    pub hash: String,
    /// Identifiers found in the import vocabulary, in stream order
    pub imports: Vec<String>,
    /// The remaining identifiers, in stream order
    pub others: Vec<String>,
}

impl Imphash {
    /// Partitions and hashes an identifier list against `vocabulary`.
    pub fn from_identifiers(identifiers: Vec<String>, vocabulary: &Vocabulary) -> Imphash {
        imphash::partition_and_hash(identifiers, vocabulary)
    }

    /// Parses a raw `_VBA_PROJECT` stream and hashes its identifiers
    /// against the bundled vocabulary.
    pub fn from_stream(data: &[u8]) -> Imphash {
        Imphash::from_identifiers(identifiers_from_stream(data), Vocabulary::builtin())
    }

    fn sentinel(hash: &str) -> Imphash {
        Imphash {
            hash: hash.to_owned(),
            imports: Vec::new(),
            others: Vec::new(),
        }
    }
}

/// Computes the VBA import hash of the Office document at `path`.
///
/// This is the crate's main entry point. It never fails: every error is
/// logged and folded into a sentinel hash with whatever identifier data
/// was recovered.
pub fn compute_imphash<P: AsRef<Path>>(path: P) -> Imphash {
    let path = path.as_ref();
    let kind = match sniff_file(path) {
        Ok(kind) => kind,
        Err(e) => {
            warn!("{}: {e}", path.display());
            return Imphash::sentinel(INVALID_OFFICE_FILE);
        }
    };
    debug!("{}: {kind:?}", path.display());
    match kind {
        OfficeKind::Ole => match ole::vba_project_stream(path) {
            Ok(stream) => Imphash::from_stream(&stream),
            Err(e) => {
                warn!("{}: {e}", path.display());
                Imphash::sentinel(INVALID_OLE_OFFICE_FILE)
            }
        },
        OfficeKind::Ooxml => match ooxml::vba_project_stream(path) {
            Ok(stream) => Imphash::from_stream(&stream),
            Err(e) => {
                warn!("{}: {e}", path.display());
                Imphash::sentinel(INVALID_OOXML_OFFICE_FILE)
            }
        },
        OfficeKind::Invalid => Imphash::sentinel(INVALID_OFFICE_FILE),
    }
}

fn sniff_file(path: &Path) -> std::io::Result<OfficeKind> {
    let mut head = [0u8; 2];
    let mut f = File::open(path)?;
    match f.read_exact(&mut head) {
        Ok(()) => Ok(OfficeKind::sniff(&head)),
        // a file shorter than the magic simply fails classification
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(OfficeKind::Invalid),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sniff_magic_bytes() {
        assert_eq!(OfficeKind::sniff(&[0xD0, 0xCF]), OfficeKind::Ole);
        assert_eq!(OfficeKind::sniff(b"PK"), OfficeKind::Ooxml);
        assert_eq!(OfficeKind::sniff(b"MZ"), OfficeKind::Invalid);
        assert_eq!(OfficeKind::sniff(&[0xD0]), OfficeKind::Invalid);
        assert_eq!(OfficeKind::sniff(&[]), OfficeKind::Invalid);
    }
}
