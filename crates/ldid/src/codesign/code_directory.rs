//! CodeDirectory blob builder and reader
//!
//! The CodeDirectory holds the signing identifier, one SHA-1 hash per 4KB
//! page of the signed region, and the special slot hashes of the other blobs
//! in the signature (Requirements, Entitlements).
//!
//! Layout of the blobs produced here (version 0x20001, all big-endian):
//!
//! ```text
//! +0   fixed 44-byte header
//! +44  identifier, NUL terminated
//!      special slot hashes, slot -n first, slot -1 last
//!      code slot hashes, page 0 first   <- hashOffset
//! ```

use super::constants::*;
use crate::macho::endian::Fields;
use crate::{Error, Result};
use sha1::{Digest, Sha1};

/// Field offsets within the fixed CodeDirectory header.
pub(crate) mod field {
    pub const LENGTH: usize = 4;
    pub const HASH_OFFSET: usize = 16;
    pub const IDENT_OFFSET: usize = 20;
    pub const N_SPECIAL_SLOTS: usize = 24;
    pub const N_CODE_SLOTS: usize = 28;
    pub const CODE_LIMIT: usize = 32;
    pub const HASH_SIZE: usize = 36;
    pub const HASH_TYPE: usize = 37;
    pub const PAGE_SIZE: usize = 39;
}

/// SHA-1 digest of `data`.
pub fn sha1_hash(data: &[u8]) -> [u8; CS_SHA1_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Number of 4KB pages needed to cover `code_limit` bytes.
pub fn page_count(code_limit: usize) -> usize {
    (code_limit + PAGE_SIZE - 1) / PAGE_SIZE
}

/// Hash of every page of `code`; the last page covers only the tail bytes.
pub fn hash_code_pages(code: &[u8]) -> impl Iterator<Item = [u8; CS_SHA1_LEN]> + '_ {
    code.chunks(PAGE_SIZE).map(sha1_hash)
}

/// Builder for SHA-1 CodeDirectory blobs.
///
/// # Example
///
/// ```
/// use ldid::codesign::CodeDirectoryBuilder;
///
/// let code = vec![0u8; 8192]; // 2 pages of code
/// let cd = CodeDirectoryBuilder::new("cat", &code)
///     .requirements_hash([0u8; 20])
///     .build();
/// assert_eq!(&cd[0..4], &[0xfa, 0xde, 0x0c, 0x02]);
/// ```
pub struct CodeDirectoryBuilder<'a> {
    /// Signing identifier, written NUL terminated after the header.
    identifier: &'a str,
    /// Signed region; its length is the code limit.
    code: &'a [u8],
    /// Requirements blob hash (special slot -2)
    requirements_hash: Option<[u8; CS_SHA1_LEN]>,
    /// Entitlements blob hash (special slot -5)
    entitlements_hash: Option<[u8; CS_SHA1_LEN]>,
}

impl<'a> CodeDirectoryBuilder<'a> {
    pub fn new(identifier: &'a str, code: &'a [u8]) -> Self {
        Self {
            identifier,
            code,
            requirements_hash: None,
            entitlements_hash: None,
        }
    }

    /// Set the requirements blob hash (special slot -2).
    pub fn requirements_hash(mut self, hash: [u8; CS_SHA1_LEN]) -> Self {
        self.requirements_hash = Some(hash);
        self
    }

    /// Set the entitlements blob hash (special slot -5).
    ///
    /// Its presence raises the special slot count from 2 to 5.
    pub fn entitlements_hash(mut self, hash: [u8; CS_SHA1_LEN]) -> Self {
        self.entitlements_hash = Some(hash);
        self
    }

    /// Highest special slot present: Entitlements when given, else Requirements.
    pub fn special_slot_count(&self) -> usize {
        if self.entitlements_hash.is_some() {
            CSSLOT_ENTITLEMENTS as usize
        } else {
            CSSLOT_REQUIREMENTS as usize
        }
    }

    /// Size of the blob `build` will produce.
    pub fn size(&self) -> usize {
        CODEDIRECTORY_HEADER_SIZE
            + self.identifier.len()
            + 1
            + CS_SHA1_LEN * (self.special_slot_count() + page_count(self.code.len()))
    }

    /// Build the CodeDirectory blob.
    pub fn build(&self) -> Vec<u8> {
        let n_special_slots = self.special_slot_count();
        let n_code_slots = page_count(self.code.len());
        let ident_offset = CODEDIRECTORY_HEADER_SIZE;
        let hash_offset =
            ident_offset + self.identifier.len() + 1 + n_special_slots * CS_SHA1_LEN;
        let total_len = self.size();

        let mut buf = Vec::with_capacity(total_len);

        // Header (all fields are big-endian)
        buf.extend(&CSMAGIC_CODEDIRECTORY.to_be_bytes()); // magic
        buf.extend(&(total_len as u32).to_be_bytes()); // length
        buf.extend(&CODEDIRECTORY_VERSION.to_be_bytes()); // version
        buf.extend(&0u32.to_be_bytes()); // flags (ad-hoc: none)
        buf.extend(&(hash_offset as u32).to_be_bytes()); // hashOffset
        buf.extend(&(ident_offset as u32).to_be_bytes()); // identOffset
        buf.extend(&(n_special_slots as u32).to_be_bytes()); // nSpecialSlots
        buf.extend(&(n_code_slots as u32).to_be_bytes()); // nCodeSlots
        buf.extend(&(self.code.len() as u32).to_be_bytes()); // codeLimit
        buf.push(CS_SHA1_LEN as u8); // hashSize
        buf.push(CS_HASHTYPE_SHA1); // hashType
        buf.push(0); // spare1
        buf.push(PAGE_SIZE_LOG2); // pageSize (log2)
        buf.extend(&0u32.to_be_bytes()); // spare2
        debug_assert_eq!(buf.len(), CODEDIRECTORY_HEADER_SIZE);

        buf.extend(self.identifier.as_bytes());
        buf.push(0);

        // Special slots, -n .. -1
        for slot in (1..=n_special_slots as u32).rev() {
            let hash = match slot {
                CSSLOT_ENTITLEMENTS => self.entitlements_hash,
                CSSLOT_REQUIREMENTS => self.requirements_hash,
                _ => None,
            };
            buf.extend(&hash.unwrap_or([0u8; CS_SHA1_LEN]));
        }
        debug_assert_eq!(buf.len(), hash_offset);

        for hash in hash_code_pages(self.code) {
            buf.extend(&hash);
        }

        debug_assert_eq!(buf.len(), total_len);
        buf
    }
}

/// The fixed header of an existing CodeDirectory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodeDirectoryHeader {
    pub length: u32,
    pub version: u32,
    pub flags: u32,
    pub hash_offset: u32,
    pub ident_offset: u32,
    pub n_special_slots: u32,
    pub n_code_slots: u32,
    pub code_limit: u32,
    pub hash_size: u8,
    pub hash_type: u8,
    pub page_size_log2: u8,
}

impl CodeDirectoryHeader {
    /// Decode the header of the CodeDirectory blob at the start of `blob`.
    pub fn parse(blob: &[u8]) -> Result<Self> {
        let fields = Fields::new(blob, scroll::BE);
        let magic = fields.u32(0)?;
        if magic != CSMAGIC_CODEDIRECTORY {
            return Err(Error::malformed(format!(
                "bad CodeDirectory magic {magic:#010x}"
            )));
        }
        let bytes = fields.bytes(field::HASH_SIZE, 4)?;
        Ok(Self {
            length: fields.u32(field::LENGTH)?,
            version: fields.u32(8)?,
            flags: fields.u32(12)?,
            hash_offset: fields.u32(field::HASH_OFFSET)?,
            ident_offset: fields.u32(field::IDENT_OFFSET)?,
            n_special_slots: fields.u32(field::N_SPECIAL_SLOTS)?,
            n_code_slots: fields.u32(field::N_CODE_SLOTS)?,
            code_limit: fields.u32(field::CODE_LIMIT)?,
            hash_size: bytes[0],
            hash_type: bytes[field::HASH_TYPE - field::HASH_SIZE],
            page_size_log2: bytes[field::PAGE_SIZE - field::HASH_SIZE],
        })
    }

    /// Read the NUL-terminated identifier out of `blob`.
    pub fn identifier(&self, blob: &[u8]) -> Result<String> {
        let tail = blob
            .get(self.ident_offset as usize..)
            .ok_or_else(|| Error::malformed("CodeDirectory identifier offset out of range"))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or_else(|| Error::malformed("unterminated CodeDirectory identifier"))?;
        Ok(String::from_utf8_lossy(&tail[..end]).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn be32(cd: &[u8], offset: usize) -> u32 {
        u32::from_be_bytes([cd[offset], cd[offset + 1], cd[offset + 2], cd[offset + 3]])
    }

    #[test]
    fn test_code_directory_header() {
        let code = vec![0u8; 8192]; // 2 pages
        let cd = CodeDirectoryBuilder::new("com.example.app", &code).build();

        assert_eq!(&cd[0..4], &CSMAGIC_CODEDIRECTORY.to_be_bytes());
        assert_eq!(be32(&cd, 8), 0x20001);
        assert_eq!(be32(&cd, 12), 0);
        assert_eq!(be32(&cd, field::IDENT_OFFSET), 44);
        assert_eq!(cd[field::HASH_SIZE], 20);
        assert_eq!(cd[field::HASH_TYPE], CS_HASHTYPE_SHA1);
        assert_eq!(cd[field::PAGE_SIZE], 12);
        assert_eq!(be32(&cd, field::LENGTH) as usize, cd.len());
    }

    #[test]
    fn test_code_directory_identifier() {
        let code = vec![0u8; 4096];
        let cd = CodeDirectoryBuilder::new("cat", &code).build();
        assert_eq!(&cd[44..48], b"cat\0");

        let header = CodeDirectoryHeader::parse(&cd).unwrap();
        assert_eq!(header.identifier(&cd).unwrap(), "cat");
    }

    #[test]
    fn test_code_directory_single_page() {
        let code: Vec<u8> = (0..4096u32).map(|i| i as u8).collect();
        let cd = CodeDirectoryBuilder::new("test", &code).build();
        let header = CodeDirectoryHeader::parse(&cd).unwrap();

        assert_eq!(header.n_code_slots, 1);
        assert_eq!(header.code_limit, 4096);
        let at = header.hash_offset as usize;
        assert_eq!(&cd[at..at + 20], &sha1_hash(&code));
    }

    #[test]
    fn test_code_directory_partial_last_page() {
        let code: Vec<u8> = (0..4097u32).map(|i| (i * 7) as u8).collect();
        let cd = CodeDirectoryBuilder::new("test", &code).build();
        let header = CodeDirectoryHeader::parse(&cd).unwrap();

        assert_eq!(header.n_code_slots, 2);
        let at = header.hash_offset as usize;
        assert_eq!(&cd[at..at + 20], &sha1_hash(&code[..4096]));
        assert_eq!(&cd[at + 20..at + 40], &sha1_hash(&code[4096..4097]));
    }

    #[test]
    fn test_code_directory_special_slots_minimal() {
        let code = vec![0u8; 4096];
        let requirements = sha1_hash(&EMPTY_REQUIREMENTS);
        let cd = CodeDirectoryBuilder::new("test", &code)
            .requirements_hash(requirements)
            .build();
        let header = CodeDirectoryHeader::parse(&cd).unwrap();

        assert_eq!(header.n_special_slots, 2);
        let hash_offset = header.hash_offset as usize;
        let slot2 = hash_offset - 2 * CS_SHA1_LEN;
        assert_eq!(&cd[slot2..slot2 + 20], &requirements);
        // Slot -1 (Info.plist) is never filled in.
        assert!(cd[hash_offset - 20..hash_offset].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_code_directory_special_slots_with_entitlements() {
        let code = vec![0u8; 4096];
        let cd = CodeDirectoryBuilder::new("test", &code)
            .requirements_hash([2u8; 20])
            .entitlements_hash([5u8; 20])
            .build();
        let header = CodeDirectoryHeader::parse(&cd).unwrap();

        assert_eq!(header.n_special_slots, 5);
        let hash_offset = header.hash_offset as usize;
        let slot = |n: usize| &cd[hash_offset - n * 20..hash_offset - (n - 1) * 20];
        assert_eq!(slot(5), &[5u8; 20]);
        assert_eq!(slot(2), &[2u8; 20]);
        assert_eq!(slot(4), &[0u8; 20]);
        assert_eq!(slot(3), &[0u8; 20]);
        assert_eq!(slot(1), &[0u8; 20]);
        assert_eq!(hash_offset, 44 + 5 + 5 * 20);
    }

    #[test]
    fn test_code_directory_size_matches_build() {
        for len in [0usize, 1, 4095, 4096, 4097, 100_000] {
            let code = vec![0xab; len];
            let builder = CodeDirectoryBuilder::new("com.example.tool", &code)
                .requirements_hash([0u8; 20]);
            assert_eq!(builder.build().len(), builder.size());
        }
    }

    #[test]
    fn test_code_directory_empty_code() {
        let cd = CodeDirectoryBuilder::new("test", &[]).build();
        let header = CodeDirectoryHeader::parse(&cd).unwrap();
        assert_eq!(header.n_code_slots, 0);
        assert_eq!(header.code_limit, 0);
    }

    #[test]
    fn test_header_rejects_other_magic() {
        let blob = EMPTY_REQUIREMENTS;
        assert!(matches!(
            CodeDirectoryHeader::parse(&blob),
            Err(Error::Malformed(_))
        ));
    }
}
