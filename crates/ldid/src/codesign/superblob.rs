//! SuperBlob assembly and parsing for embedded code signatures
//!
//! The SuperBlob is the top-level container for all code signature components.
//! It contains a header followed by an index of blob entries, each pointing
//! to an embedded blob (CodeDirectory, Requirements, Entitlements).
//!
//! ## Structure
//!
//! ```text
//! ┌────────────────────────────────────┐
//! │ SuperBlob Header (12 bytes)        │
//! │  - magic: 0xfade0cc0 (4 bytes)     │
//! │  - length: total size (4 bytes)    │
//! │  - count: number of blobs (4 bytes)│
//! ├────────────────────────────────────┤
//! │ Index Entry 0 (8 bytes)            │
//! │  - slot_type (4 bytes)             │
//! │  - offset (4 bytes)                │
//! ├────────────────────────────────────┤
//! │ ... more index entries             │
//! ├────────────────────────────────────┤
//! │ CodeDirectory                      │
//! ├────────────────────────────────────┤
//! │ Requirements (12 bytes)            │
//! ├────────────────────────────────────┤
//! │ Entitlements (optional)            │
//! └────────────────────────────────────┘
//! ```
//!
//! Offsets in the index are relative to the start of the SuperBlob.

use super::constants::*;
use crate::macho::endian::Fields;
use crate::{Error, Result};

/// A blob entry for inclusion in a SuperBlob.
#[derive(Debug, Clone)]
pub struct BlobEntry {
    /// The slot type identifying this blob's purpose.
    /// See `CSSLOT_*` constants for standard slot types.
    pub slot_type: u32,
    /// The raw blob data, including its own magic and length header.
    pub data: Vec<u8>,
}

impl BlobEntry {
    pub fn new(slot_type: u32, data: Vec<u8>) -> Self {
        Self { slot_type, data }
    }
}

/// Serialize a SuperBlob holding `entries` in the order given.
pub fn build_superblob(entries: Vec<BlobEntry>) -> Vec<u8> {
    let count = entries.len();
    let header_size = SUPERBLOB_HEADER_SIZE + count * BLOB_INDEX_SIZE;
    let total_length = header_size + entries.iter().map(|e| e.data.len()).sum::<usize>();

    let mut buf = Vec::with_capacity(total_length);

    // Header (big-endian)
    buf.extend(&CSMAGIC_EMBEDDED_SIGNATURE.to_be_bytes());
    buf.extend(&(total_length as u32).to_be_bytes());
    buf.extend(&(count as u32).to_be_bytes());

    // Index entries
    let mut offset = header_size;
    for entry in &entries {
        buf.extend(&entry.slot_type.to_be_bytes());
        buf.extend(&(offset as u32).to_be_bytes());
        offset += entry.data.len();
    }

    // Blob data
    for entry in entries {
        buf.extend(&entry.data);
    }

    buf
}

/// Wrap opaque entitlements bytes in an entitlements blob header.
pub fn build_entitlements_blob(plist_data: &[u8]) -> Vec<u8> {
    let total_len = BLOB_HEADER_SIZE + plist_data.len();
    let mut buf = Vec::with_capacity(total_len);

    buf.extend(&CSMAGIC_EMBEDDED_ENTITLEMENTS.to_be_bytes());
    buf.extend(&(total_len as u32).to_be_bytes());
    buf.extend(plist_data);

    buf
}

/// The empty requirement set (12 bytes).
pub fn build_requirements_blob() -> Vec<u8> {
    EMPTY_REQUIREMENTS.to_vec()
}

/// Builder for the SuperBlob of an ad-hoc signature.
///
/// Components are always emitted sorted by slot type:
/// CodeDirectory (0), Requirements (2), Entitlements (5).
///
/// # Example
///
/// ```
/// use ldid::codesign::{build_entitlements_blob, SuperBlobBuilder};
///
/// let superblob = SuperBlobBuilder::new()
///     .code_directory(vec![0xfa, 0xde, 0x0c, 0x02, 0, 0, 0, 8])
///     .entitlements(build_entitlements_blob(b"<plist/>"))
///     .build();
/// assert_eq!(&superblob[8..12], &3u32.to_be_bytes());
/// ```
#[derive(Debug, Default)]
pub struct SuperBlobBuilder {
    /// CodeDirectory (slot 0x0000)
    code_directory: Option<Vec<u8>>,
    /// Requirements blob (slot 0x0002)
    requirements: Option<Vec<u8>>,
    /// Entitlements blob (slot 0x0005)
    entitlements: Option<Vec<u8>>,
}

impl SuperBlobBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code_directory(mut self, cd: Vec<u8>) -> Self {
        self.code_directory = Some(cd);
        self
    }

    /// Set the requirements blob.
    ///
    /// If not provided, the empty requirement set is used.
    pub fn requirements(mut self, req: Vec<u8>) -> Self {
        self.requirements = Some(req);
        self
    }

    pub fn entitlements(mut self, ent: Vec<u8>) -> Self {
        self.entitlements = Some(ent);
        self
    }

    /// Size of the SuperBlob `build` will produce.
    pub fn size(&self) -> usize {
        let requirements = self
            .requirements
            .as_ref()
            .map_or(EMPTY_REQUIREMENTS.len(), Vec::len);
        let blobs = [&self.code_directory, &self.entitlements]
            .into_iter()
            .flatten()
            .map(|blob| BLOB_INDEX_SIZE + blob.len())
            .sum::<usize>();
        SUPERBLOB_HEADER_SIZE + BLOB_INDEX_SIZE + requirements + blobs
    }

    pub fn build(self) -> Vec<u8> {
        let mut entries = Vec::with_capacity(3);

        if let Some(cd) = self.code_directory {
            entries.push(BlobEntry::new(CSSLOT_CODEDIRECTORY, cd));
        }

        let requirements = self.requirements.unwrap_or_else(build_requirements_blob);
        entries.push(BlobEntry::new(CSSLOT_REQUIREMENTS, requirements));

        if let Some(ent) = self.entitlements {
            entries.push(BlobEntry::new(CSSLOT_ENTITLEMENTS, ent));
        }

        build_superblob(entries)
    }
}

/// One entry of a parsed SuperBlob index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobIndex {
    pub slot_type: u32,
    pub offset: u32,
}

/// A read-only view of an existing SuperBlob.
#[derive(Debug, Clone)]
pub struct SuperBlob<'a> {
    data: &'a [u8],
    pub length: u32,
    pub index: Vec<BlobIndex>,
}

impl<'a> SuperBlob<'a> {
    /// Parse the SuperBlob at the start of `data`.
    ///
    /// `data` is the signature region; the SuperBlob must fit inside it.
    pub fn parse(data: &'a [u8]) -> Result<Self> {
        let fields = Fields::new(data, scroll::BE);
        let magic = fields.u32(0)?;
        if magic != CSMAGIC_EMBEDDED_SIGNATURE {
            return Err(Error::malformed(format!(
                "bad SuperBlob magic {magic:#010x}"
            )));
        }
        let length = fields.u32(4)?;
        let count = fields.u32(8)? as usize;
        let data = fields.bytes(0, length as usize).map_err(|_| {
            Error::malformed(format!(
                "SuperBlob length {length:#x} exceeds signature region of {:#x} bytes",
                data.len()
            ))
        })?;

        let fields = Fields::new(data, scroll::BE);
        let mut index = Vec::with_capacity(count.min(16));
        for i in 0..count {
            let at = SUPERBLOB_HEADER_SIZE + i * BLOB_INDEX_SIZE;
            index.push(BlobIndex {
                slot_type: fields.u32(at)?,
                offset: fields.u32(at + 4)?,
            });
        }

        Ok(Self {
            data,
            length,
            index,
        })
    }

    /// The complete blob (header included) stored in slot `slot_type`.
    pub fn blob(&self, slot_type: u32) -> Result<Option<&'a [u8]>> {
        let Some(entry) = self.index.iter().find(|e| e.slot_type == slot_type) else {
            return Ok(None);
        };
        let fields = Fields::new(self.data, scroll::BE);
        let offset = entry.offset as usize;
        let length = fields.u32(offset + 4)? as usize;
        if length < BLOB_HEADER_SIZE {
            return Err(Error::malformed(format!(
                "blob in slot {slot_type} has invalid length {length}"
            )));
        }
        fields.bytes(offset, length).map(Some)
    }

    /// The CodeDirectory blob and its offset within the SuperBlob.
    pub fn code_directory(&self) -> Result<Option<(usize, &'a [u8])>> {
        let offset = self
            .index
            .iter()
            .find(|e| e.slot_type == CSSLOT_CODEDIRECTORY)
            .map(|e| e.offset as usize);
        Ok(offset.zip(self.blob(CSSLOT_CODEDIRECTORY)?))
    }

    /// The entitlements payload, without its blob header.
    pub fn entitlements(&self) -> Result<Option<&'a [u8]>> {
        Ok(self
            .blob(CSSLOT_ENTITLEMENTS)?
            .map(|blob| &blob[BLOB_HEADER_SIZE..]))
    }
}
