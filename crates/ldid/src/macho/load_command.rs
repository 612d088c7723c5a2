//! Mach-O load command decoding.
//!
//! Load commands are decoded by a single match on the command kind into the
//! closed set of variants this crate reads or patches. Everything else is
//! kept as [`LoadCommand::Opaque`]; its bytes stay where they are in the
//! slice and are reachable through [`LoadCommandEntry::raw`], so no command is
//! ever re-encoded from the model.

use super::endian::Fields;
use crate::{Error, Result};
use goblin::mach::load_command::{
    LC_CODE_SIGNATURE, LC_ENCRYPTION_INFO, LC_ENCRYPTION_INFO_64, LC_ID_DYLIB, LC_SEGMENT,
    LC_SEGMENT_64, LC_SEGMENT_SPLIT_INFO, LC_SYMTAB, LC_UUID,
};

/// Size of the `cmd` + `cmdsize` prefix shared by every load command.
pub const LOAD_COMMAND_HEADER_SIZE: usize = 8;

/// Size of a `linkedit_data_command` (LC_CODE_SIGNATURE and friends).
pub const LINKEDIT_DATA_COMMAND_SIZE: usize = 16;

const SEGMENT_COMMAND_SIZE: usize = 56;
const SEGMENT_COMMAND_64_SIZE: usize = 72;
const SECTION_SIZE: usize = 68;
const SECTION_64_SIZE: usize = 80;
const SYMTAB_COMMAND_SIZE: usize = 24;
const ENCRYPTION_INFO_COMMAND_SIZE: usize = 20;
const DYLIB_COMMAND_SIZE: usize = 24;
const UUID_COMMAND_SIZE: usize = 24;

/// Field offsets inside `segment_command` / `segment_command_64`.
pub(crate) mod segment_field {
    pub const VMSIZE_32: usize = 28;
    pub const FILESIZE_32: usize = 36;
    pub const VMSIZE_64: usize = 32;
    pub const FILESIZE_64: usize = 48;
}

/// Field offsets inside `linkedit_data_command`.
pub(crate) mod linkedit_field {
    pub const DATAOFF: usize = 8;
    pub const DATASIZE: usize = 12;
}

/// Offset of `cryptid` in `encryption_info_command{,_64}`.
pub(crate) const CRYPTID_OFFSET: usize = 16;

/// Offset of `dylib.timestamp` in `dylib_command`.
pub(crate) const DYLIB_TIMESTAMP_OFFSET: usize = 12;

/// A section header inside a segment command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub sectname: [u8; 16],
    pub segname: [u8; 16],
    pub addr: u64,
    pub size: u64,
    pub offset: u32,
}

impl Section {
    /// Does this section map `address`?
    pub fn contains(&self, address: u64) -> bool {
        address >= self.addr && address - self.addr < self.size
    }
}

/// LC_SEGMENT / LC_SEGMENT_64, widened to 64-bit fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: u32,
    pub initprot: u32,
    pub flags: u32,
    pub sections: Vec<Section>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Symtab {
    pub symoff: u32,
    pub nsyms: u32,
    pub stroff: u32,
    pub strsize: u32,
}

impl Symtab {
    /// End of the string table, which is the last symbol data in the slice.
    pub fn string_table_end(&self) -> u64 {
        u64::from(self.stroff) + u64::from(self.strsize)
    }
}

/// `linkedit_data_command`: an offset/size pair into __LINKEDIT.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkeditData {
    pub dataoff: u32,
    pub datasize: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncryptionInfo {
    pub cryptoff: u32,
    pub cryptsize: u32,
    pub cryptid: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dylib {
    pub name: String,
    pub timestamp: u32,
    pub current_version: u32,
    pub compatibility_version: u32,
}

/// A decoded load command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadCommand {
    Segment32(Segment),
    Segment64(Segment),
    Symtab(Symtab),
    CodeSignature(LinkeditData),
    SegmentSplitInfo(LinkeditData),
    EncryptionInfo(EncryptionInfo),
    IdDylib(Dylib),
    Uuid([u8; 16]),
    /// Any other kind, preserved verbatim.
    Opaque { cmd: u32 },
}

/// A load command together with its position in the slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadCommandEntry {
    /// Offset of the command from the start of the slice.
    pub offset: usize,
    pub cmd: u32,
    pub cmdsize: u32,
    pub command: LoadCommand,
}

impl LoadCommandEntry {
    /// The command's bytes, header included, from the slice it was parsed from.
    pub fn raw<'a>(&self, slice_data: &'a [u8]) -> Result<&'a [u8]> {
        Fields::new(slice_data, scroll::LE).bytes(self.offset, self.cmdsize as usize)
    }

    pub fn segment(&self) -> Option<&Segment> {
        match &self.command {
            LoadCommand::Segment32(seg) | LoadCommand::Segment64(seg) => Some(seg),
            _ => None,
        }
    }
}

impl LoadCommand {
    /// Decode the command occupying `data` (exactly `cmdsize` bytes).
    pub fn parse(cmd: u32, data: Fields<'_>, is_64: bool) -> Result<Self> {
        let command = match cmd {
            LC_SEGMENT => LoadCommand::Segment32(parse_segment(data, false)?),
            LC_SEGMENT_64 => LoadCommand::Segment64(parse_segment(data, true)?),
            LC_SYMTAB => {
                require(cmd, data, SYMTAB_COMMAND_SIZE)?;
                LoadCommand::Symtab(Symtab {
                    symoff: data.u32(8)?,
                    nsyms: data.u32(12)?,
                    stroff: data.u32(16)?,
                    strsize: data.u32(20)?,
                })
            }
            LC_CODE_SIGNATURE | LC_SEGMENT_SPLIT_INFO => {
                require(cmd, data, LINKEDIT_DATA_COMMAND_SIZE)?;
                let linkedit = LinkeditData {
                    dataoff: data.u32(linkedit_field::DATAOFF)?,
                    datasize: data.u32(linkedit_field::DATASIZE)?,
                };
                if cmd == LC_CODE_SIGNATURE {
                    LoadCommand::CodeSignature(linkedit)
                } else {
                    LoadCommand::SegmentSplitInfo(linkedit)
                }
            }
            LC_ENCRYPTION_INFO | LC_ENCRYPTION_INFO_64 => {
                require(cmd, data, ENCRYPTION_INFO_COMMAND_SIZE)?;
                LoadCommand::EncryptionInfo(EncryptionInfo {
                    cryptoff: data.u32(8)?,
                    cryptsize: data.u32(12)?,
                    cryptid: data.u32(CRYPTID_OFFSET)?,
                })
            }
            LC_ID_DYLIB => {
                require(cmd, data, DYLIB_COMMAND_SIZE)?;
                let name_offset = data.u32(8)? as usize;
                let name = if name_offset >= DYLIB_COMMAND_SIZE && name_offset < data.len() {
                    let tail = data.bytes(name_offset, data.len() - name_offset)?;
                    let end = tail.iter().position(|&b| b == 0).unwrap_or(tail.len());
                    String::from_utf8_lossy(&tail[..end]).into_owned()
                } else {
                    String::new()
                };
                LoadCommand::IdDylib(Dylib {
                    name,
                    timestamp: data.u32(DYLIB_TIMESTAMP_OFFSET)?,
                    current_version: data.u32(16)?,
                    compatibility_version: data.u32(20)?,
                })
            }
            LC_UUID => {
                require(cmd, data, UUID_COMMAND_SIZE)?;
                let mut uuid = [0u8; 16];
                uuid.copy_from_slice(data.bytes(8, 16)?);
                LoadCommand::Uuid(uuid)
            }
            _ => LoadCommand::Opaque { cmd },
        };

        // 32-bit segments are not valid in a 64-bit image and vice versa, but
        // the original toolchain tolerated both, so only log it.
        if matches!(
            (&command, is_64),
            (LoadCommand::Segment32(_), true) | (LoadCommand::Segment64(_), false)
        ) {
            log::debug!("segment command {cmd:#x} does not match image bitness");
        }

        Ok(command)
    }
}

fn require(cmd: u32, data: Fields<'_>, size: usize) -> Result<()> {
    if data.len() < size {
        return Err(Error::malformed(format!(
            "load command {cmd:#x} is {} bytes, expected at least {size}",
            data.len()
        )));
    }
    Ok(())
}

fn parse_segment(data: Fields<'_>, is_64: bool) -> Result<Segment> {
    let (cmd, header_size, section_size) = if is_64 {
        (LC_SEGMENT_64, SEGMENT_COMMAND_64_SIZE, SECTION_64_SIZE)
    } else {
        (LC_SEGMENT, SEGMENT_COMMAND_SIZE, SECTION_SIZE)
    };
    require(cmd, data, header_size)?;

    let segname = data.name16(8)?;
    let (vmaddr, vmsize, fileoff, filesize, rest) = if is_64 {
        (data.u64(24)?, data.u64(32)?, data.u64(40)?, data.u64(48)?, 56)
    } else {
        (
            u64::from(data.u32(24)?),
            u64::from(data.u32(28)?),
            u64::from(data.u32(32)?),
            u64::from(data.u32(36)?),
            40,
        )
    };
    let maxprot = data.u32(rest)?;
    let initprot = data.u32(rest + 4)?;
    let nsects = data.u32(rest + 8)? as usize;
    let flags = data.u32(rest + 12)?;

    let needed = nsects
        .checked_mul(section_size)
        .and_then(|n| n.checked_add(header_size))
        .filter(|&n| n <= data.len())
        .ok_or_else(|| {
            Error::malformed(format!(
                "segment with {nsects} sections overruns its {}-byte command",
                data.len()
            ))
        })?;
    debug_assert!(needed <= data.len());

    let mut sections = Vec::with_capacity(nsects);
    for index in 0..nsects {
        let at = header_size + index * section_size;
        let (addr, size, offset) = if is_64 {
            (data.u64(at + 32)?, data.u64(at + 40)?, data.u32(at + 48)?)
        } else {
            (
                u64::from(data.u32(at + 32)?),
                u64::from(data.u32(at + 36)?),
                data.u32(at + 40)?,
            )
        };
        sections.push(Section {
            sectname: data.name16(at)?,
            segname: data.name16(at + 16)?,
            addr,
            size,
            offset,
        });
    }

    Ok(Segment {
        segname,
        vmaddr,
        vmsize,
        fileoff,
        filesize,
        maxprot,
        initprot,
        flags,
        sections,
    })
}

/// Compare a fixed 16-byte name field with `name` the way `strncmp(.., 16)` does.
pub fn name_matches(field: &[u8; 16], name: &str) -> bool {
    let name = name.as_bytes();
    if name.len() > 16 {
        return false;
    }
    field[..name.len()] == *name && field[name.len()..].first().map_or(true, |&b| b == 0)
}
