//! Fat and thin Mach-O container model.
//!
//! [`MachOFile::parse`] validates a whole byte region up front and records
//! only offsets, sizes and decoded load commands; the bytes themselves stay
//! with the caller. Slices are re-borrowed from the region on demand with
//! [`ArchSlice::bytes`] / [`ArchSlice::bytes_mut`].

use super::endian::{fat_endian, macho_endian, Fields, FieldsMut};
use super::load_command::{
    name_matches, EncryptionInfo, LinkeditData, LoadCommand, LoadCommandEntry, Section, Segment,
    Symtab, LOAD_COMMAND_HEADER_SIZE,
};
use crate::{Error, Result};
use goblin::mach::cputype::get_arch_name_from_types;
use goblin::mach::header::{MH_BUNDLE, MH_DYLIB, MH_EXECUTE, MH_OBJECT};
use scroll::Endian;

/// Size of `fat_header`.
pub const FAT_HEADER_SIZE: usize = 8;
/// Size of one `fat_arch` record.
pub const FAT_ARCH_SIZE: usize = 20;
/// Largest fat slice alignment accepted, as a power of two (32KB).
pub const MAX_FAT_ALIGN: u32 = 15;

const MACH_HEADER_SIZE: usize = 28;
const MACH_HEADER_64_SIZE: usize = 32;

/// Offsets of the `mach_header` fields this crate touches.
pub(crate) mod header_field {
    pub const NCMDS: usize = 16;
    pub const SIZEOFCMDS: usize = 20;
}

/// Mach-O file types this crate accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Object,
    Execute,
    Dylib,
    Bundle,
}

impl FileType {
    fn from_raw(filetype: u32) -> Option<Self> {
        match filetype {
            MH_OBJECT => Some(FileType::Object),
            MH_EXECUTE => Some(FileType::Execute),
            MH_DYLIB => Some(FileType::Dylib),
            MH_BUNDLE => Some(FileType::Bundle),
            _ => None,
        }
    }
}

/// One record of the fat architecture table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FatArch {
    pub cputype: u32,
    pub cpusubtype: u32,
    pub offset: u32,
    pub size: u32,
    /// Alignment as a power of two.
    pub align: u32,
}

/// A parsed fat or thin Mach-O file.
#[derive(Debug, Clone)]
pub struct MachOFile {
    pub is_fat: bool,
    /// Byte order of the fat table, `None` for thin files.
    pub fat_endian: Option<Endian>,
    pub slices: Vec<ArchSlice>,
}

/// A single architecture image.
#[derive(Debug, Clone)]
pub struct ArchSlice {
    /// The fat table record this slice came from, `None` for thin files.
    pub arch: Option<FatArch>,
    /// Offset of the slice in the file.
    pub offset: usize,
    /// Size of the slice in bytes.
    pub size: usize,
    pub endian: Endian,
    pub is_64: bool,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub filetype: FileType,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    /// Load commands in table order.
    pub commands: Vec<LoadCommandEntry>,
}

impl MachOFile {
    /// Parse a fat or thin Mach-O image.
    ///
    /// Every slice is validated; a single malformed slice fails the file.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let Some(endian) = fat_endian(data) else {
            let slice = ArchSlice::parse(data, 0, None)?;
            return Ok(Self {
                is_fat: false,
                fat_endian: None,
                slices: vec![slice],
            });
        };

        let fields = Fields::new(data, endian);
        let nfat_arch = fields.u32(4)? as usize;
        let table_end = nfat_arch
            .checked_mul(FAT_ARCH_SIZE)
            .and_then(|n| n.checked_add(FAT_HEADER_SIZE))
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::malformed(format!("fat table with {nfat_arch} entries overruns the file"))
            })?;
        log::trace!("fat table: {nfat_arch} arch(es), ends at {table_end:#x}");

        let mut slices = Vec::with_capacity(nfat_arch);
        for index in 0..nfat_arch {
            let at = FAT_HEADER_SIZE + index * FAT_ARCH_SIZE;
            let arch = FatArch {
                cputype: fields.u32(at)?,
                cpusubtype: fields.u32(at + 4)?,
                offset: fields.u32(at + 8)?,
                size: fields.u32(at + 12)?,
                align: fields.u32(at + 16)?,
            };
            if arch.align > MAX_FAT_ALIGN {
                return Err(Error::malformed(format!(
                    "fat arch {index} has alignment 2^{}, at most 2^{MAX_FAT_ALIGN} is supported",
                    arch.align
                )));
            }
            let slice_data = fields
                .bytes(arch.offset as usize, arch.size as usize)
                .map_err(|_| {
                    Error::malformed(format!(
                        "fat arch {index} ({:#x}+{:#x}) lies outside the file",
                        arch.offset, arch.size
                    ))
                })?;
            let slice = ArchSlice::parse(slice_data, arch.offset as usize, Some(arch))
                .map_err(|e| match e {
                    Error::Malformed(msg) => Error::Malformed(format!("fat arch {index}: {msg}")),
                    other => other,
                })?;
            slices.push(slice);
        }

        Ok(Self {
            is_fat: true,
            fat_endian: Some(endian),
            slices,
        })
    }
}

impl ArchSlice {
    /// Parse the Mach-O image occupying `data`, which starts at `offset` in
    /// the enclosing file.
    pub fn parse(data: &[u8], offset: usize, arch: Option<FatArch>) -> Result<Self> {
        let (is_64, endian) = macho_endian(data)
            .ok_or_else(|| Error::malformed("not a Mach-O image (bad magic)"))?;
        let fields = Fields::new(data, endian);
        let header_size = if is_64 {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        };
        if data.len() < header_size {
            return Err(Error::malformed("truncated Mach-O header"));
        }

        let cputype = fields.u32(4)?;
        let cpusubtype = fields.u32(8)?;
        let raw_filetype = fields.u32(12)?;
        let filetype = FileType::from_raw(raw_filetype)
            .ok_or_else(|| Error::malformed(format!("unsupported file type {raw_filetype:#x}")))?;
        let ncmds = fields.u32(header_field::NCMDS)?;
        let sizeofcmds = fields.u32(header_field::SIZEOFCMDS)?;
        let flags = fields.u32(24)?;

        let commands_end = header_size
            .checked_add(sizeofcmds as usize)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::malformed(format!("sizeofcmds {sizeofcmds:#x} overruns the slice"))
            })?;

        let mut commands = Vec::with_capacity(ncmds.min(1024) as usize);
        let mut cursor = header_size;
        for index in 0..ncmds {
            if commands_end - cursor < LOAD_COMMAND_HEADER_SIZE {
                return Err(Error::malformed(format!(
                    "load command {index} starts past the end of the command area"
                )));
            }
            let cmd = fields.u32(cursor)?;
            let cmdsize = fields.u32(cursor + 4)?;
            if (cmdsize as usize) < LOAD_COMMAND_HEADER_SIZE
                || cmdsize as usize > commands_end - cursor
            {
                return Err(Error::malformed(format!(
                    "load command {index} ({cmd:#x}) has invalid size {cmdsize:#x}"
                )));
            }
            let body = Fields::new(fields.bytes(cursor, cmdsize as usize)?, endian);
            commands.push(LoadCommandEntry {
                offset: cursor,
                cmd,
                cmdsize,
                command: LoadCommand::parse(cmd, body, is_64)?,
            });
            cursor += cmdsize as usize;
        }
        if cursor != commands_end {
            return Err(Error::malformed(format!(
                "load commands total {:#x} bytes but sizeofcmds is {sizeofcmds:#x}",
                cursor - header_size
            )));
        }

        Ok(Self {
            arch,
            offset,
            size: data.len(),
            endian,
            is_64,
            cputype,
            cpusubtype,
            filetype,
            ncmds,
            sizeofcmds,
            flags,
            commands,
        })
    }

    /// This slice's bytes within the whole file.
    pub fn bytes<'a>(&self, file: &'a [u8]) -> Result<&'a [u8]> {
        Fields::new(file, self.endian).bytes(self.offset, self.size)
    }

    pub fn bytes_mut<'a>(&self, file: &'a mut [u8]) -> Result<&'a mut [u8]> {
        let total = file.len();
        self.offset
            .checked_add(self.size)
            .and_then(move |end| file.get_mut(self.offset..end))
            .ok_or_else(|| {
                Error::malformed(format!(
                    "slice {:#x}+{:#x} exceeds file of {total:#x} bytes",
                    self.offset, self.size
                ))
            })
    }

    /// Field accessor over this slice, resolved against the whole file.
    pub fn fields<'a>(&self, file: &'a [u8]) -> Result<Fields<'a>> {
        Ok(Fields::new(self.bytes(file)?, self.endian))
    }

    pub fn fields_mut<'a>(&self, file: &'a mut [u8]) -> Result<FieldsMut<'a>> {
        let endian = self.endian;
        Ok(FieldsMut::new(self.bytes_mut(file)?, endian))
    }

    pub fn header_size(&self) -> usize {
        if self.is_64 {
            MACH_HEADER_64_SIZE
        } else {
            MACH_HEADER_SIZE
        }
    }

    /// Offset of the first load command, relative to the slice.
    pub fn load_commands_offset(&self) -> usize {
        self.header_size()
    }

    /// Offset just past the last load command, relative to the slice.
    pub fn load_commands_end(&self) -> usize {
        self.header_size() + self.sizeofcmds as usize
    }

    /// First slice offset holding segment or section content.
    ///
    /// The load command table may grow up to this point without clobbering
    /// anything. Zero-fill sections and empty segments are ignored.
    pub fn header_padding_end(&self) -> usize {
        let mut end = self.size as u64;
        for segment in self.commands.iter().filter_map(LoadCommandEntry::segment) {
            if segment.fileoff > 0 && segment.filesize > 0 {
                end = end.min(segment.fileoff);
            }
            for section in &segment.sections {
                if section.offset > 0 && section.size > 0 {
                    end = end.min(u64::from(section.offset));
                }
            }
        }
        end as usize
    }

    /// Does this slice match an architecture selector?
    ///
    /// The subtype comparison ignores the capability bits in the high byte.
    pub fn matches_arch(&self, cputype: u32, cpusubtype: u32) -> bool {
        self.cputype == cputype && (self.cpusubtype & 0xff) == (cpusubtype & 0xff)
    }

    /// Human readable architecture name, when goblin knows it.
    pub fn arch_name(&self) -> Option<&'static str> {
        get_arch_name_from_types(self.cputype, self.cpusubtype)
    }

    /// All load commands of kind `cmd`.
    pub fn commands_of(&self, cmd: u32) -> impl Iterator<Item = &LoadCommandEntry> + '_ {
        self.commands.iter().filter(move |entry| entry.cmd == cmd)
    }

    /// All segment commands (32- or 64-bit) named `name`.
    pub fn segments<'s>(
        &'s self,
        name: &'s str,
    ) -> impl Iterator<Item = (&'s LoadCommandEntry, &'s Segment)> + 's {
        self.commands.iter().filter_map(move |entry| {
            entry
                .segment()
                .filter(|segment| name_matches(&segment.segname, name))
                .map(|segment| (entry, segment))
        })
    }

    /// All sections named `sectname` inside segments named `segname`.
    pub fn sections<'s>(
        &'s self,
        segname: &'s str,
        sectname: &'s str,
    ) -> impl Iterator<Item = &'s Section> + 's {
        self.segments(segname).flat_map(move |(_, segment)| {
            segment
                .sections
                .iter()
                .filter(move |section| name_matches(&section.sectname, sectname))
        })
    }

    pub fn symtab(&self) -> Option<Symtab> {
        self.commands.iter().find_map(|entry| match entry.command {
            LoadCommand::Symtab(symtab) => Some(symtab),
            _ => None,
        })
    }

    /// The `LC_CODE_SIGNATURE` command, if the slice is signed.
    pub fn code_signature(&self) -> Option<(&LoadCommandEntry, LinkeditData)> {
        self.commands.iter().find_map(|entry| match entry.command {
            LoadCommand::CodeSignature(data) => Some((entry, data)),
            _ => None,
        })
    }

    /// Every `LC_ENCRYPTION_INFO` / `LC_ENCRYPTION_INFO_64` command.
    pub fn encryption_info(
        &self,
    ) -> impl Iterator<Item = (&LoadCommandEntry, EncryptionInfo)> + '_ {
        self.commands.iter().filter_map(|entry| match entry.command {
            LoadCommand::EncryptionInfo(info) => Some((entry, info)),
            _ => None,
        })
    }

    pub fn id_dylib(&self) -> Option<&LoadCommandEntry> {
        self.commands
            .iter()
            .find(|entry| matches!(entry.command, LoadCommand::IdDylib(_)))
    }

    pub fn uuid(&self) -> Option<[u8; 16]> {
        self.commands.iter().find_map(|entry| match entry.command {
            LoadCommand::Uuid(uuid) => Some(uuid),
            _ => None,
        })
    }

    /// Translate a virtual address to a slice-relative file offset through the
    /// section that contains it, optionally searching only segment `segname`.
    pub fn file_offset_for_address(&self, address: u64, segname: Option<&str>) -> Result<u64> {
        self.commands
            .iter()
            .filter_map(LoadCommandEntry::segment)
            .filter(|segment| segname.map_or(true, |name| name_matches(&segment.segname, name)))
            .flat_map(|segment| segment.sections.iter())
            .find(|section| section.contains(address))
            .map(|section| address - section.addr + u64::from(section.offset))
            .ok_or(Error::AddressNotMapped(address))
    }
}
