//! Signature capacity planning.
//!
//! Decides, per slice, how many bytes of the original image are hashed (the
//! code limit) and how many bytes the new signature may occupy. The reserved
//! size is a hard upper bound: [`super::signer::write_signature`] builds the
//! same blobs and fails if they do not fit.

use super::parser::ArchSlice;
use crate::codesign::code_directory::page_count;
use crate::codesign::constants::{
    align_up, BLOB_HEADER_SIZE, BLOB_INDEX_SIZE, CODEDIRECTORY_HEADER_SIZE, CSSLOT_ENTITLEMENTS,
    CSSLOT_REQUIREMENTS, CS_SHA1_LEN, EMPTY_REQUIREMENTS, SUPERBLOB_HEADER_SIZE,
};
use crate::{Error, Result};

/// How far the string table may end before the previously recorded code
/// limit. Linkers pad __LINKEDIT to 16 bytes before the signature.
pub const SYMTAB_SLACK: usize = 0x10;

/// Signature regions start and end on this boundary.
pub const SIGNATURE_ALIGN: usize = 16;

/// What the relocator does with one slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SliceAction {
    /// Copy the slice verbatim (excluded by the architecture filter).
    Keep,
    /// Drop the signature and truncate to the code limit.
    Strip,
    /// Reserve room for a new signature after the code limit.
    Sign,
}

/// Per-slice plan binding the planner to the relocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    pub slice_index: usize,
    pub action: SliceAction,
    /// Offset of the slice in the input file.
    pub source_offset: usize,
    /// Size of the slice in the input file.
    pub source_size: usize,
    /// Bytes of the input slice that are copied and hashed.
    pub code_limit: usize,
    /// Bytes reserved for the signature, zero unless signing.
    pub reserved: usize,
    /// Fat alignment as a power of two, zero for thin files.
    pub align: u32,
    /// Offset of the slice in the output file, assigned by the layout pass.
    pub output_offset: usize,
}

impl Allocation {
    /// Plan `action` for `slice`.
    pub fn plan(
        slice_index: usize,
        slice: &ArchSlice,
        action: SliceAction,
        identifier: &str,
        entitlements_len: Option<usize>,
    ) -> Result<Self> {
        let (code_limit, reserved) = match action {
            SliceAction::Keep => (slice.size, 0),
            SliceAction::Strip => (code_limit(slice)?, 0),
            SliceAction::Sign => {
                let limit = code_limit(slice)?;
                // The signature's code limit is its data offset, which is the
                // aligned end of the copied content.
                let hashed = align_up(limit, SIGNATURE_ALIGN);
                (
                    limit,
                    signature_capacity(identifier, entitlements_len, hashed),
                )
            }
        };
        log::debug!(
            "slice {slice_index}: {action:?}, code limit {code_limit:#x}, reserved {reserved:#x}"
        );
        Ok(Self {
            slice_index,
            action,
            source_offset: slice.offset,
            source_size: slice.size,
            code_limit,
            reserved,
            align: slice.arch.map_or(0, |arch| arch.align),
            output_offset: 0,
        })
    }

    /// Bytes copied from the input slice.
    pub fn copy_len(&self) -> usize {
        match self.action {
            SliceAction::Keep => self.source_size,
            SliceAction::Strip | SliceAction::Sign => self.code_limit,
        }
    }

    /// Offset of the signature relative to the slice.
    pub fn signature_offset(&self) -> usize {
        align_up(self.code_limit, SIGNATURE_ALIGN)
    }

    /// Length of the slice in the output file.
    pub fn region_len(&self) -> usize {
        match self.action {
            SliceAction::Keep => self.source_size,
            SliceAction::Strip => self.code_limit,
            SliceAction::Sign => self.signature_offset() + self.reserved,
        }
    }

    /// Required output alignment: `max(16, 1 << align)`.
    pub fn alignment(&self) -> usize {
        let declared = 1usize.checked_shl(self.align).unwrap_or(usize::MAX);
        declared.max(SIGNATURE_ALIGN)
    }
}

/// Length of the slice content covered by a signature.
///
/// An existing signature's data offset bounds the content; a symbol table
/// then moves the limit to the end of its string table, which may sit up to
/// [`SYMTAB_SLACK`] bytes before that offset.
pub fn code_limit(slice: &ArchSlice) -> Result<usize> {
    let mut limit = match slice.code_signature() {
        Some((_, signature)) => {
            let dataoff = signature.dataoff as usize;
            if dataoff > slice.size {
                return Err(Error::malformed(format!(
                    "signature offset {dataoff:#x} lies past the slice end {:#x}",
                    slice.size
                )));
            }
            dataoff
        }
        None => slice.size,
    };

    if let Some(symtab) = slice.symtab() {
        let end = symtab.string_table_end();
        if end > limit as u64 || end + (SYMTAB_SLACK as u64) < limit as u64 {
            return Err(Error::malformed(format!(
                "string table ends at {end:#x}, inconsistent with code limit {limit:#x}"
            )));
        }
        limit = end as usize;
    }

    Ok(limit)
}

/// Exact upper bound on the size of the signature for these inputs.
///
/// `entitlements_len` is `None` when no entitlements are embedded.
pub fn signature_capacity(
    identifier: &str,
    entitlements_len: Option<usize>,
    code_limit: usize,
) -> usize {
    let mut size = SUPERBLOB_HEADER_SIZE;
    size += BLOB_INDEX_SIZE + CODEDIRECTORY_HEADER_SIZE + identifier.len() + 1;
    size += BLOB_INDEX_SIZE + EMPTY_REQUIREMENTS.len();
    let special = match entitlements_len {
        Some(len) => {
            size += BLOB_INDEX_SIZE + BLOB_HEADER_SIZE + len;
            CSSLOT_ENTITLEMENTS as usize
        }
        None => CSSLOT_REQUIREMENTS as usize,
    };
    size += CS_SHA1_LEN * (special + page_count(code_limit));
    align_up(size, SIGNATURE_ALIGN)
}
