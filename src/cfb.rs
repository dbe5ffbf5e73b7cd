// SPDX-License-Identifier: MIT

//! A minimal reader for the Compound File Binary format MS-CFB.
//!
//! Only what the VBA extraction paths need is implemented: header and
//! FAT/DIFAT loading, the directory tree, the mini stream, and stream
//! reads by full path. Paths are matched case-insensitively as the
//! container format mandates.

use std::collections::HashMap;
use std::io::Read;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt};
use log::debug;

const OLE_SIGNATURE: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];
const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
const FREESECT: u32 = 0xFFFF_FFFF;
const NOSTREAM: u32 = 0xFFFF_FFFF;

const ENTRY_STORAGE: u8 = 1;
const ENTRY_STREAM: u8 = 2;
const ENTRY_ROOT: u8 = 5;

/// A Cfb specific error enum
#[derive(Debug)]
pub enum CfbError {
    /// Io error
    Io(std::io::Error),
    /// Invalid OLE signature (not a compound document)
    Signature,
    /// A sector id points outside of the file
    OutOfBounds {
        /// sector kind
        typ: &'static str,
        /// offending sector id
        id: u32,
    },
    /// A sector chain does not terminate
    ChainCycle(&'static str),
    /// Malformed directory
    Directory(&'static str),
}

from_err!(std::io::Error, CfbError, Io);

impl std::fmt::Display for CfbError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CfbError::Io(e) => write!(f, "I/O error: {e}"),
            CfbError::Signature => write!(f, "Invalid OLE signature (not an office document?)"),
            CfbError::OutOfBounds { typ, id } => {
                write!(f, "{typ} sector {id:X} out of bounds")
            }
            CfbError::ChainCycle(typ) => write!(f, "{typ} sector chain does not terminate"),
            CfbError::Directory(e) => write!(f, "Malformed directory: {e}"),
        }
    }
}

impl std::error::Error for CfbError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CfbError::Io(e) => Some(e),
            _ => None,
        }
    }
}

/// A compound document loaded in memory.
///
/// Streams are addressed by their full path from the root storage,
/// `/`-separated, e.g. `Macros/VBA/_VBA_PROJECT`.
pub struct Cfb {
    sectors: Sector,
    mini_sectors: Option<Sector>,
    directories: Vec<Directory>,
    /// lowercased full path -> directory index
    paths: HashMap<String, usize>,
    mini_sector_cutoff: u32,
}

impl Cfb {
    /// Reads a compound document of `len` bytes out of `r`.
    pub fn new<R: Read>(r: &mut R, len: usize) -> Result<Cfb, CfbError> {
        debug!("loading cfb header");
        let header = Header::from_reader(r)?;
        if header.ab_sig != OLE_SIGNATURE {
            return Err(CfbError::Signature);
        }

        let sector_size = 1usize << header.sector_shift;
        // the header occupies 512 bytes; with 4096-byte sectors the
        // remainder of sector -1 is padding
        let mut data = Vec::with_capacity(len.saturating_sub(512));
        r.read_to_end(&mut data)?;
        if sector_size > 512 {
            let pad = sector_size - 512;
            if data.len() < pad {
                return Err(CfbError::Directory("file smaller than one sector"));
            }
            data.drain(..pad);
        }
        let sector = Sector::new(data, sector_size);

        // DIFAT: 109 entries in the header, then a chain of difat sectors
        debug!("loading difat");
        let mut fat_ids = header.sect_fat.to_vec();
        let mut difat_id = header.sect_dif_start;
        let mut difat_seen = 0u32;
        while difat_id != FREESECT && difat_id != ENDOFCHAIN {
            if difat_seen > header.sect_dif_len.max(1024) {
                return Err(CfbError::ChainCycle("difat"));
            }
            difat_seen += 1;
            let s = sector.get(difat_id, "difat")?;
            fat_ids.extend(s.chunks_exact(4).map(LittleEndian::read_u32));
            // the last entry of a difat sector chains to the next one
            match fat_ids.pop() {
                Some(next) => difat_id = next,
                None => return Err(CfbError::ChainCycle("difat")),
            }
        }

        // FAT
        debug!("loading fat");
        let mut fats = Vec::with_capacity(fat_ids.len() * (sector_size / 4));
        for id in fat_ids.into_iter().filter(|id| *id != FREESECT) {
            fats.extend(
                sector
                    .get(id, "fat")?
                    .chunks_exact(4)
                    .map(LittleEndian::read_u32),
            );
        }
        let sectors = sector.with_fats(fats);

        // directory entries are 128 bytes wide
        debug!("loading directories");
        let buffer = sectors.read_chain(header.sect_dir_start, "directory")?;
        let mut directories = Vec::with_capacity(buffer.len() / 128);
        for c in buffer.chunks_exact(128) {
            directories.push(Directory::from_slice(c));
        }
        let root = directories
            .first()
            .filter(|r| r.typ == ENTRY_ROOT)
            .ok_or(CfbError::Directory("missing root entry"))?;

        // the root entry holds the ministream
        let mini_sectors = if root.sect_start == ENDOFCHAIN {
            None
        } else {
            debug!("loading ministream");
            let mut ministream = sectors.read_chain(root.sect_start, "ministream")?;
            ministream.truncate(root.ul_size as usize);
            let minifat: Vec<u32> = sectors
                .read_chain(header.sect_mini_fat_start, "minifat")?
                .chunks_exact(4)
                .map(LittleEndian::read_u32)
                .collect();
            let mini_size = 1usize << header.mini_sector_shift;
            Some(Sector::new(ministream, mini_size).with_fats(minifat))
        };

        let paths = build_paths(&directories);
        debug!("cfb paths: {:?}", paths.keys());

        Ok(Cfb {
            sectors,
            mini_sectors,
            directories,
            paths,
            mini_sector_cutoff: header.mini_sector_cutoff,
        })
    }

    /// Checks the existence of a storage or stream, case-insensitively.
    pub fn exists(&self, path: &str) -> bool {
        self.paths.contains_key(&path.to_lowercase())
    }

    /// Reads a stream given its full path, case-insensitively.
    pub fn get_stream(&self, path: &str) -> Option<Vec<u8>> {
        let d = &self.directories[*self.paths.get(&path.to_lowercase())?];
        if d.typ != ENTRY_STREAM {
            return None;
        }
        let mut data = if u64::from(d.ul_size) < u64::from(self.mini_sector_cutoff) {
            self.mini_sectors
                .as_ref()?
                .read_chain(d.sect_start, "ministream")
                .ok()?
        } else {
            self.sectors.read_chain(d.sect_start, "stream").ok()?
        };
        data.truncate(d.ul_size as usize);
        Some(data)
    }
}

/// Walks the red-black sibling/child tree and assigns each live entry its
/// full lowercased path.
fn build_paths(directories: &[Directory]) -> HashMap<String, usize> {
    let mut paths = HashMap::new();
    let mut stack = vec![(directories[0].id_child, String::new())];
    let mut seen = vec![false; directories.len()];
    while let Some((id, parent)) = stack.pop() {
        let idx = id as usize;
        if id == NOSTREAM || idx >= directories.len() || seen[idx] {
            continue;
        }
        seen[idx] = true;
        let d = &directories[idx];
        stack.push((d.id_left_sib, parent.clone()));
        stack.push((d.id_right_sib, parent.clone()));
        if d.typ != ENTRY_STORAGE && d.typ != ENTRY_STREAM {
            continue;
        }
        let path = if parent.is_empty() {
            d.name.to_lowercase()
        } else {
            format!("{parent}/{}", d.name.to_lowercase())
        };
        if d.typ == ENTRY_STORAGE {
            stack.push((d.id_child, path.clone()));
        }
        paths.insert(path, idx);
    }
    paths
}

struct Header {
    ab_sig: [u8; 8],
    sector_shift: u16,
    mini_sector_shift: u16,
    sect_dir_start: u32,
    mini_sector_cutoff: u32,
    sect_mini_fat_start: u32,
    sect_dif_start: u32,
    sect_dif_len: u32,
    sect_fat: [u32; 109],
}

impl Header {
    fn from_reader<R: Read>(f: &mut R) -> Result<Header, CfbError> {
        let mut ab_sig = [0; 8];
        f.read_exact(&mut ab_sig)?;
        let mut clid = [0; 16];
        f.read_exact(&mut clid)?;

        let _minor_version = f.read_u16::<LittleEndian>()?;
        let _dll_version = f.read_u16::<LittleEndian>()?;
        let _byte_order = f.read_u16::<LittleEndian>()?;
        let sector_shift = f.read_u16::<LittleEndian>()?;
        let mini_sector_shift = f.read_u16::<LittleEndian>()?;
        let _reserved = f.read_u16::<LittleEndian>()?;
        let _reserved1 = f.read_u32::<LittleEndian>()?;
        let _reserved2 = f.read_u32::<LittleEndian>()?;
        let _sect_fat_len = f.read_u32::<LittleEndian>()?;
        let sect_dir_start = f.read_u32::<LittleEndian>()?;
        let _signature = f.read_u32::<LittleEndian>()?;
        let mini_sector_cutoff = f.read_u32::<LittleEndian>()?;
        let sect_mini_fat_start = f.read_u32::<LittleEndian>()?;
        let _sect_mini_fat_len = f.read_u32::<LittleEndian>()?;
        let sect_dif_start = f.read_u32::<LittleEndian>()?;
        let sect_dif_len = f.read_u32::<LittleEndian>()?;

        // sane shifts only, the shifts feed `1 << shift`
        if !(4..=20).contains(&sector_shift) || !(4..=20).contains(&mini_sector_shift) {
            return Err(CfbError::Directory("invalid sector shift"));
        }

        let mut sect_fat = [0u32; 109];
        for s in sect_fat.iter_mut() {
            *s = f.read_u32::<LittleEndian>()?;
        }

        Ok(Header {
            ab_sig,
            sector_shift,
            mini_sector_shift,
            sect_dir_start,
            mini_sector_cutoff,
            sect_mini_fat_start,
            sect_dif_start,
            sect_dif_len,
            sect_fat,
        })
    }
}

struct Sector {
    data: Vec<u8>,
    size: usize,
    fats: Vec<u32>,
}

impl Sector {
    fn new(data: Vec<u8>, size: usize) -> Sector {
        Sector {
            data,
            size,
            fats: Vec::new(),
        }
    }

    fn with_fats(mut self, fats: Vec<u32>) -> Sector {
        self.fats = fats;
        self
    }

    fn get(&self, id: u32, typ: &'static str) -> Result<&[u8], CfbError> {
        let start = id as usize * self.size;
        let end = start + self.size;
        self.data
            .get(start..end)
            .ok_or(CfbError::OutOfBounds { typ, id })
    }

    fn read_chain(&self, mut sector_id: u32, typ: &'static str) -> Result<Vec<u8>, CfbError> {
        let mut buffer = Vec::new();
        let mut links = 0usize;
        while sector_id != ENDOFCHAIN && sector_id != FREESECT {
            // a terminating chain visits each sector at most once
            if links > self.fats.len() {
                return Err(CfbError::ChainCycle(typ));
            }
            links += 1;
            buffer.extend_from_slice(self.get(sector_id, typ)?);
            sector_id = *self
                .fats
                .get(sector_id as usize)
                .ok_or(CfbError::OutOfBounds { typ, id: sector_id })?;
        }
        Ok(buffer)
    }
}

struct Directory {
    name: String,
    typ: u8,
    id_left_sib: u32,
    id_right_sib: u32,
    id_child: u32,
    sect_start: u32,
    ul_size: u32,
}

impl Directory {
    fn from_slice(chunk: &[u8]) -> Directory {
        // 64 bytes of UTF-16LE name, then the length in bytes incl. the
        // terminating null
        let cb = LittleEndian::read_u16(&chunk[64..66]) as usize;
        let name_len = cb.clamp(2, 64) - 2;
        let utf16: Vec<u16> = chunk[..name_len & !1]
            .chunks_exact(2)
            .map(LittleEndian::read_u16)
            .collect();
        let name = String::from_utf16_lossy(&utf16);

        Directory {
            name,
            typ: chunk[66],
            id_left_sib: LittleEndian::read_u32(&chunk[68..72]),
            id_right_sib: LittleEndian::read_u32(&chunk[72..76]),
            id_child: LittleEndian::read_u32(&chunk[76..80]),
            sect_start: LittleEndian::read_u32(&chunk[116..120]),
            ul_size: LittleEndian::read_u32(&chunk[120..124]),
        }
    }
}
