//! Identifier classification against the import vocabulary and the import
//! hash itself.
//!
//! The hash is wire-compatible with other consumers: imports joined with
//! an ASCII dash, UTF-8 encoded, MD5, lowercase hex.

use std::collections::HashSet;
use std::fmt::Write;
use std::sync::LazyLock;

use log::error;
use md5::{Digest, Md5};

use crate::{Imphash, NO_IMPHASH_IDENTIFIERS};

/// The bundled vocabulary: VBA language-reference symbol names. A parse
/// failure degrades to an empty set so the hashing path never panics;
/// every identifier then lands in `others`.
static BUILTIN: LazyLock<Vocabulary> = LazyLock::new(|| {
    match Vocabulary::from_json(include_str!("import_identifiers.json")) {
        Ok(vocabulary) => vocabulary,
        Err(e) => {
            error!("bundled vocabulary does not parse: {e}");
            Vocabulary {
                names: HashSet::new(),
            }
        }
    }
});

/// A process-lifetime set of import-related identifier names.
///
/// Membership is tested by case-insensitive exact match. The bundled set
/// is embedded at build time; custom sets can be built for callers with
/// their own notion of "import".
pub struct Vocabulary {
    names: HashSet<String>,
}

impl Vocabulary {
    /// The vocabulary bundled with the crate.
    pub fn builtin() -> &'static Vocabulary {
        &BUILTIN
    }

    /// Parses a vocabulary out of a JSON array of strings.
    pub fn from_json(json: &str) -> Result<Vocabulary, serde_json::Error> {
        let names: Vec<String> = serde_json::from_str(json)?;
        Ok(Vocabulary::from_names(names))
    }

    /// Builds a vocabulary from plain names; case folding happens here.
    pub fn from_names<I, S>(names: I) -> Vocabulary
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Vocabulary {
            names: names
                .into_iter()
                .map(|n| n.as_ref().to_lowercase())
                .collect(),
        }
    }

    /// Case-insensitive membership test.
    pub fn contains(&self, identifier: &str) -> bool {
        self.names.contains(&identifier.to_lowercase())
    }

    /// Number of names in the set.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

/// Splits identifiers into imports and others, preserving input order and
/// duplicates, and hashes the import list.
pub(crate) fn partition_and_hash(identifiers: Vec<String>, vocabulary: &Vocabulary) -> Imphash {
    let mut imports = Vec::new();
    let mut others = Vec::new();
    for identifier in identifiers {
        if vocabulary.contains(&identifier) {
            imports.push(identifier);
        } else {
            others.push(identifier);
        }
    }
    let hash = if imports.is_empty() {
        NO_IMPHASH_IDENTIFIERS.to_owned()
    } else {
        hex_md5(&imports.join("-"))
    };
    Imphash {
        hash,
        imports,
        others,
    }
}

fn hex_md5(joined: &str) -> String {
    let digest = Md5::digest(joined.as_bytes());
    let mut hash = String::with_capacity(32);
    for byte in digest {
        let _ = write!(hash, "{byte:02x}");
    }
    hash
}
