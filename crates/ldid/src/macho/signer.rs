//! Ad-hoc signature generation
//!
//! This module fills the region reserved by the relocator with a SuperBlob
//! holding a SHA-1 CodeDirectory, the empty requirement set, and optionally
//! an entitlements blob. The CodeDirectory hashes every page of the slice up
//! to the signature's data offset.

use super::parser::ArchSlice;
use crate::codesign::code_directory::{sha1_hash, CodeDirectoryBuilder};
use crate::codesign::superblob::{
    build_entitlements_blob, build_requirements_blob, SuperBlobBuilder,
};
use crate::{Error, Result};

/// Build the signature for one slice.
///
/// `code` is the slice content up to the signature's data offset.
pub fn build_signature(code: &[u8], identifier: &str, entitlements: Option<&[u8]>) -> Vec<u8> {
    let requirements = build_requirements_blob();
    let entitlements = entitlements.map(build_entitlements_blob);

    let mut cd = CodeDirectoryBuilder::new(identifier, code)
        .requirements_hash(sha1_hash(&requirements));
    if let Some(ref blob) = entitlements {
        cd = cd.entitlements_hash(sha1_hash(blob));
    }

    let mut superblob = SuperBlobBuilder::new()
        .code_directory(cd.build())
        .requirements(requirements);
    if let Some(blob) = entitlements {
        superblob = superblob.entitlements(blob);
    }
    superblob.build()
}

/// Write a fresh signature into the reserved region of `slice` within `file`.
///
/// `slice` must be parsed from `file` and carry an LC_CODE_SIGNATURE whose
/// size was reserved by the planner. Unused reserved bytes are zeroed.
/// Returns the number of bytes used.
pub fn write_signature(
    file: &mut [u8],
    slice: &ArchSlice,
    identifier: &str,
    entitlements: Option<&[u8]>,
) -> Result<usize> {
    let (_, signature) = slice
        .code_signature()
        .ok_or(Error::MissingCommand("LC_CODE_SIGNATURE"))?;
    let dataoff = signature.dataoff as usize;
    let datasize = signature.datasize as usize;

    let region = slice.bytes_mut(file)?;
    if dataoff + datasize > region.len() {
        return Err(Error::malformed(format!(
            "signature {dataoff:#x}+{datasize:#x} exceeds slice of {:#x} bytes",
            region.len()
        )));
    }

    let blob = build_signature(&region[..dataoff], identifier, entitlements);
    if blob.len() > datasize {
        return Err(Error::CapacityOverflow {
            used: blob.len(),
            reserved: datasize,
        });
    }

    let target = &mut region[dataoff..dataoff + datasize];
    target[..blob.len()].copy_from_slice(&blob);
    target[blob.len()..].fill(0);

    log::debug!(
        "wrote {:#x}-byte signature at {dataoff:#x} ({datasize:#x} reserved)",
        blob.len()
    );
    Ok(blob.len())
}
