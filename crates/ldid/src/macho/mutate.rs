//! In-place edits that never change the size of a slice.

use super::load_command::{CRYPTID_OFFSET, DYLIB_TIMESTAMP_OFFSET};
use super::parser::ArchSlice;
use crate::codesign::code_directory::{hash_code_pages, page_count, CodeDirectoryHeader};
use crate::codesign::constants::CS_SHA1_LEN;
use crate::codesign::SuperBlob;
use crate::hash::lookup2;
use crate::{Error, Result};

/// How the LC_ID_DYLIB timestamp is rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimestampMode {
    /// Store this value.
    Literal(u32),
    /// Hash the whole slice, with the timestamp zeroed, using `seed`.
    Derived { seed: u32 },
}

/// Rewrite the LC_ID_DYLIB timestamp.
///
/// Returns the stored value, or `None` when the slice has no LC_ID_DYLIB
/// (executables and bundles), in which case nothing is touched.
pub fn set_timestamp(file: &mut [u8], slice: &ArchSlice, mode: TimestampMode) -> Result<Option<u32>> {
    let Some(entry) = slice.id_dylib() else {
        log::debug!("no LC_ID_DYLIB, timestamp left alone");
        return Ok(None);
    };
    let at = entry.offset + DYLIB_TIMESTAMP_OFFSET;
    let mut fields = slice.fields_mut(file)?;

    let timestamp = match mode {
        TimestampMode::Literal(value) => value,
        TimestampMode::Derived { seed } => {
            fields.set_u32(at, 0)?;
            let bytes = fields.bytes_mut(0, slice.size)?;
            lookup2(bytes, seed)
        }
    };
    fields.set_u32(at, timestamp)?;
    log::debug!("LC_ID_DYLIB timestamp set to {timestamp:#x}");
    Ok(Some(timestamp))
}

/// Zero `cryptid` in every LC_ENCRYPTION_INFO / LC_ENCRYPTION_INFO_64.
///
/// Returns the number of commands patched.
pub fn disable_encryption(file: &mut [u8], slice: &ArchSlice) -> Result<usize> {
    let offsets: Vec<usize> = slice
        .encryption_info()
        .map(|(entry, _)| entry.offset + CRYPTID_OFFSET)
        .collect();
    if offsets.is_empty() {
        return Err(Error::MissingCommand("LC_ENCRYPTION_INFO"));
    }

    let mut fields = slice.fields_mut(file)?;
    for &at in &offsets {
        fields.set_u32(at, 0)?;
    }
    Ok(offsets.len())
}

/// The signature region of a signed slice.
fn signature_region<'a>(slice_data: &'a [u8], slice: &ArchSlice) -> Result<(usize, &'a [u8])> {
    let (_, signature) = slice
        .code_signature()
        .ok_or(Error::MissingCommand("LC_CODE_SIGNATURE"))?;
    let dataoff = signature.dataoff as usize;
    let region = slice_data
        .get(dataoff..)
        .and_then(|rest| rest.get(..signature.datasize as usize))
        .ok_or_else(|| {
            Error::malformed(format!(
                "signature {dataoff:#x}+{:#x} exceeds slice of {:#x} bytes",
                signature.datasize,
                slice_data.len()
            ))
        })?;
    Ok((dataoff, region))
}

/// The entitlements payload embedded in the slice's signature.
///
/// `Ok(None)` when the signature carries no entitlements.
pub fn extract_entitlements(file: &[u8], slice: &ArchSlice) -> Result<Option<Vec<u8>>> {
    let data = slice.bytes(file)?;
    let (_, region) = signature_region(data, slice)?;
    let superblob = SuperBlob::parse(region)?;
    Ok(superblob.entitlements()?.map(<[u8]>::to_vec))
}

/// Recompute the code page hashes of the existing CodeDirectory in place.
///
/// The signature's data offset is the code limit. Blob sizes and offsets
/// are left as they are. Returns the number of pages hashed.
pub fn rehash(file: &mut [u8], slice: &ArchSlice) -> Result<usize> {
    let data = slice.bytes_mut(file)?;

    let (table_at, hashes) = {
        let (dataoff, region) = signature_region(data, slice)?;
        let superblob = SuperBlob::parse(region)?;
        let (cd_offset, cd) = superblob
            .code_directory()?
            .ok_or(Error::MissingCommand("CodeDirectory"))?;
        let header = CodeDirectoryHeader::parse(cd)?;

        if header.hash_size as usize != CS_SHA1_LEN {
            return Err(Error::malformed(format!(
                "unsupported CodeDirectory hash size {}",
                header.hash_size
            )));
        }
        let pages = page_count(dataoff);
        if header.n_code_slots as usize != pages {
            return Err(Error::malformed(format!(
                "CodeDirectory has {} code slots, signature offset needs {pages}",
                header.n_code_slots
            )));
        }
        let table_end = header.hash_offset as usize + pages * CS_SHA1_LEN;
        if table_end > cd.len() {
            return Err(Error::malformed("CodeDirectory hash table overruns its blob"));
        }

        let hashes: Vec<_> = hash_code_pages(&data[..dataoff]).collect();
        (dataoff + cd_offset + header.hash_offset as usize, hashes)
    };

    for (index, hash) in hashes.iter().enumerate() {
        let at = table_at + index * CS_SHA1_LEN;
        data[at..at + CS_SHA1_LEN].copy_from_slice(hash);
    }
    log::debug!("rehashed {} page(s)", hashes.len());
    Ok(hashes.len())
}
