//! Code signing blob constants and fixed layout sizes
//!
//! Every integer inside a code signature is big-endian, independent of the
//! byte order of the Mach-O slice that carries it.

// =============================================================================
// Blob Magic Numbers
// =============================================================================

/// SuperBlob containing all signature components (embedded signature)
pub const CSMAGIC_EMBEDDED_SIGNATURE: u32 = 0xfade0cc0;

/// CodeDirectory blob magic
pub const CSMAGIC_CODEDIRECTORY: u32 = 0xfade0c02;

/// Requirements blob magic
pub const CSMAGIC_REQUIREMENTS: u32 = 0xfade0c01;

/// Embedded entitlements (XML plist, stored opaquely)
pub const CSMAGIC_EMBEDDED_ENTITLEMENTS: u32 = 0xfade7171;

// =============================================================================
// Slot Types (for SuperBlob index)
// =============================================================================

/// Main code directory slot
pub const CSSLOT_CODEDIRECTORY: u32 = 0x0000;

/// Code requirements slot
pub const CSSLOT_REQUIREMENTS: u32 = 0x0002;

/// Entitlements slot
pub const CSSLOT_ENTITLEMENTS: u32 = 0x0005;

// =============================================================================
// Hashing
// =============================================================================

/// SHA-1 hash type
pub const CS_HASHTYPE_SHA1: u8 = 1;

/// SHA-1 hash size in bytes
pub const CS_SHA1_LEN: usize = 20;

/// Standard code signing page size (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Log2 of page size (for CodeDirectory header)
pub const PAGE_SIZE_LOG2: u8 = 12;

/// CodeDirectory version emitted by this crate (no scatter, no team ID)
pub const CODEDIRECTORY_VERSION: u32 = 0x20001;

// =============================================================================
// Fixed Sizes
// =============================================================================

/// Generic blob header: magic + length
pub const BLOB_HEADER_SIZE: usize = 8;

/// SuperBlob header: magic + length + count
pub const SUPERBLOB_HEADER_SIZE: usize = 12;

/// One SuperBlob index entry: type + offset
pub const BLOB_INDEX_SIZE: usize = 8;

/// Fixed CodeDirectory header for version 0x20001
pub const CODEDIRECTORY_HEADER_SIZE: usize = 44;

/// The empty requirement set: magic, length 12, zero requirements
pub const EMPTY_REQUIREMENTS: [u8; 12] = [
    0xfa, 0xde, 0x0c, 0x01, 0x00, 0x00, 0x00, 0x0c, 0x00, 0x00, 0x00, 0x00,
];

/// Round `value` up to a multiple of `align` (a power of two).
pub const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
