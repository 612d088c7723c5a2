//! Byte-order aware field access over a borrowed byte region.
//!
//! Every multi-byte integer in a Mach-O slice is stored in that slice's own
//! byte order, which can differ from the byte order of the enclosing fat
//! table. [`Fields`] and [`FieldsMut`] carry the resolved [`Endian`] next to
//! the bytes so that callers never decode raw header bytes themselves, and
//! every access is bounds checked before it happens.

use crate::{Error, Result};
use goblin::mach::fat::{FAT_CIGAM, FAT_MAGIC};
use goblin::mach::header::{MH_CIGAM, MH_CIGAM_64, MH_MAGIC, MH_MAGIC_64};
use scroll::{Endian, Pread, Pwrite};

/// Read-only view of a byte region with a fixed byte order.
#[derive(Debug, Clone, Copy)]
pub struct Fields<'a> {
    data: &'a [u8],
    endian: Endian,
}

impl<'a> Fields<'a> {
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    pub fn endian(&self) -> Endian {
        self.endian
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        self.data
            .pread_with::<u32>(offset, self.endian)
            .map_err(|_| out_of_bounds(offset, 4, self.data.len()))
    }

    pub fn u64(&self, offset: usize) -> Result<u64> {
        self.data
            .pread_with::<u64>(offset, self.endian)
            .map_err(|_| out_of_bounds(offset, 8, self.data.len()))
    }

    /// Borrow `len` bytes starting at `offset`.
    pub fn bytes(&self, offset: usize, len: usize) -> Result<&'a [u8]> {
        offset
            .checked_add(len)
            .and_then(|end| self.data.get(offset..end))
            .ok_or_else(|| out_of_bounds(offset, len, self.data.len()))
    }

    /// Read a fixed 16-byte, NUL-padded name field.
    pub fn name16(&self, offset: usize) -> Result<[u8; 16]> {
        let mut name = [0u8; 16];
        name.copy_from_slice(self.bytes(offset, 16)?);
        Ok(name)
    }
}

/// Mutable counterpart of [`Fields`].
#[derive(Debug)]
pub struct FieldsMut<'a> {
    data: &'a mut [u8],
    endian: Endian,
}

impl<'a> FieldsMut<'a> {
    pub fn new(data: &'a mut [u8], endian: Endian) -> Self {
        Self { data, endian }
    }

    pub fn as_fields(&self) -> Fields<'_> {
        Fields::new(self.data, self.endian)
    }

    pub fn u32(&self, offset: usize) -> Result<u32> {
        self.as_fields().u32(offset)
    }

    pub fn set_u32(&mut self, offset: usize, value: u32) -> Result<()> {
        let len = self.data.len();
        self.data
            .pwrite_with(value, offset, self.endian)
            .map(|_| ())
            .map_err(|_| out_of_bounds(offset, 4, len))
    }

    pub fn set_u64(&mut self, offset: usize, value: u64) -> Result<()> {
        let len = self.data.len();
        self.data
            .pwrite_with(value, offset, self.endian)
            .map(|_| ())
            .map_err(|_| out_of_bounds(offset, 8, len))
    }

    /// Mutably borrow `len` bytes starting at `offset`.
    pub fn bytes_mut(&mut self, offset: usize, len: usize) -> Result<&mut [u8]> {
        let total = self.data.len();
        offset
            .checked_add(len)
            .and_then(move |end| self.data.get_mut(offset..end))
            .ok_or_else(|| out_of_bounds(offset, len, total))
    }
}

/// Byte order of a fat table, if `data` starts with one.
pub fn fat_endian(data: &[u8]) -> Option<Endian> {
    match data.pread_with::<u32>(0, scroll::BE).ok()? {
        FAT_MAGIC => Some(scroll::BE),
        FAT_CIGAM => Some(scroll::LE),
        _ => None,
    }
}

/// Bitness and byte order of a thin Mach-O header, if `data` starts with one.
///
/// Returns `(is_64, endian)`.
pub fn macho_endian(data: &[u8]) -> Option<(bool, Endian)> {
    match data.pread_with::<u32>(0, scroll::LE).ok()? {
        MH_MAGIC => Some((false, scroll::LE)),
        MH_MAGIC_64 => Some((true, scroll::LE)),
        MH_CIGAM => Some((false, scroll::BE)),
        MH_CIGAM_64 => Some((true, scroll::BE)),
        _ => None,
    }
}

fn out_of_bounds(offset: usize, len: usize, total: usize) -> Error {
    Error::malformed(format!(
        "{len}-byte field at {offset:#x} exceeds region of {total:#x} bytes"
    ))
}
