//! File relocation: growing or shrinking every slice of a Mach-O file.
//!
//! Signing and stripping both rewrite the whole file. [`plan_layout`] assigns
//! each slice a new offset and length, and [`relocate`] builds a zero-filled
//! output buffer, copies each slice's content into place, rewrites the fat
//! table and patches the load commands:
//! - Removing LC_CODE_SIGNATURE when stripping
//! - Reusing or appending LC_CODE_SIGNATURE when signing
//! - Resizing __LINKEDIT to end where the slice now ends
//!
//! The signature bytes themselves are written afterwards by
//! [`super::signer::write_signature`] over the re-parsed output.

use super::endian::FieldsMut;
use super::load_command::{
    linkedit_field, segment_field, LoadCommand, LINKEDIT_DATA_COMMAND_SIZE,
};
use super::parser::{
    header_field, ArchSlice, MachOFile, FAT_ARCH_SIZE, FAT_HEADER_SIZE, MAX_FAT_ALIGN,
};
use super::planner::{Allocation, SliceAction, SIGNATURE_ALIGN};
use crate::codesign::constants::{align_up, PAGE_SIZE};
use crate::{Error, Result};
use goblin::mach::fat::FAT_MAGIC;
use goblin::mach::load_command::LC_CODE_SIGNATURE;

/// Segment that is resized to cover the signature.
pub const LINKEDIT: &str = "__LINKEDIT";

/// Output layout for a whole file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// One allocation per slice, in table order.
    pub allocations: Vec<Allocation>,
    /// Size of the output file.
    pub total_size: usize,
}

/// Plan the output file for `actions`, one per slice.
///
/// Slices are laid out in table order, after the fat table if there is one,
/// each aligned to `max(16, 1 << align)`.
pub fn plan_layout(
    file: &MachOFile,
    actions: &[SliceAction],
    identifier: &str,
    entitlements_len: Option<usize>,
) -> Result<Layout> {
    if actions.len() != file.slices.len() {
        return Err(Error::Config(format!(
            "{} actions for {} slices",
            actions.len(),
            file.slices.len()
        )));
    }

    let mut offset = if file.is_fat {
        FAT_HEADER_SIZE + FAT_ARCH_SIZE * file.slices.len()
    } else {
        0
    };

    let mut allocations = Vec::with_capacity(file.slices.len());
    for (index, (slice, &action)) in file.slices.iter().zip(actions).enumerate() {
        let mut allocation = Allocation::plan(index, slice, action, identifier, entitlements_len)?;
        if allocation.align > MAX_FAT_ALIGN {
            return Err(Error::malformed(format!(
                "slice {index} alignment 2^{} is out of range",
                allocation.align
            )));
        }
        offset = align_up(offset, allocation.alignment());
        allocation.output_offset = offset;
        offset = align_up(offset + allocation.region_len(), SIGNATURE_ALIGN);
        // Fat offsets and Mach-O file offsets are 32-bit.
        if offset > u32::MAX as usize {
            return Err(Error::malformed(format!(
                "output would be {offset:#x} bytes, past the 32-bit offset limit"
            )));
        }
        allocations.push(allocation);
    }

    log::debug!("output layout: {} slice(s), {offset:#x} bytes", allocations.len());
    Ok(Layout {
        allocations,
        total_size: offset,
    })
}

/// Build the relocated file described by `layout` from `input`.
///
/// `file` must be the parse of `input`.
pub fn relocate(input: &[u8], file: &MachOFile, layout: &Layout) -> Result<Vec<u8>> {
    let mut output = vec![0u8; layout.total_size];

    if let Some(endian) = file.fat_endian {
        let mut fat = FieldsMut::new(&mut output, endian);
        fat.set_u32(0, FAT_MAGIC)?;
        fat.set_u32(4, layout.allocations.len() as u32)?;
        for (index, allocation) in layout.allocations.iter().enumerate() {
            let slice = &file.slices[allocation.slice_index];
            let (cputype, cpusubtype) = slice
                .arch
                .map_or((slice.cputype, slice.cpusubtype), |arch| {
                    (arch.cputype, arch.cpusubtype)
                });
            let at = FAT_HEADER_SIZE + index * FAT_ARCH_SIZE;
            fat.set_u32(at, cputype)?;
            fat.set_u32(at + 4, cpusubtype)?;
            fat.set_u32(at + 8, to_u32(allocation.output_offset, "slice offset")?)?;
            fat.set_u32(at + 12, to_u32(allocation.region_len(), "slice size")?)?;
            fat.set_u32(at + 16, allocation.align)?;
        }
    }

    for allocation in &layout.allocations {
        let slice = &file.slices[allocation.slice_index];
        let source = input
            .get(allocation.source_offset..)
            .and_then(|rest| rest.get(..allocation.copy_len()))
            .ok_or_else(|| Error::malformed("slice content lies outside the input"))?;

        let start = allocation.output_offset;
        let region = output
            .get_mut(start..start + allocation.region_len())
            .ok_or_else(|| Error::malformed("slice region lies outside the output"))?;
        region[..source.len()].copy_from_slice(source);

        match allocation.action {
            SliceAction::Keep => {}
            SliceAction::Strip | SliceAction::Sign => patch_slice(region, slice, allocation)?,
        }
    }

    Ok(output)
}

/// Patch the load commands of one relocated slice.
///
/// `slice` describes the input slice; its command offsets are still valid in
/// `region` because the header area is copied unchanged.
fn patch_slice(region: &mut [u8], slice: &ArchSlice, allocation: &Allocation) -> Result<()> {
    let region_len = region.len();
    let mut fields = FieldsMut::new(region, slice.endian);

    if allocation.action == SliceAction::Sign && slice.segments(LINKEDIT).next().is_none() {
        return Err(Error::MissingCommand(LINKEDIT));
    }

    // Resize __LINKEDIT first: removing a command below would move it.
    for (entry, segment) in slice.segments(LINKEDIT) {
        let fileoff = segment.fileoff as usize;
        let filesize = region_len.checked_sub(fileoff).ok_or_else(|| {
            Error::malformed(format!(
                "__LINKEDIT starts at {fileoff:#x}, past the new slice end {region_len:#x}"
            ))
        })?;
        let vmsize = align_up(filesize, PAGE_SIZE);
        match entry.command {
            LoadCommand::Segment64(_) => {
                fields.set_u64(entry.offset + segment_field::FILESIZE_64, filesize as u64)?;
                fields.set_u64(entry.offset + segment_field::VMSIZE_64, vmsize as u64)?;
            }
            _ => {
                fields.set_u32(
                    entry.offset + segment_field::FILESIZE_32,
                    to_u32(filesize, "__LINKEDIT filesize")?,
                )?;
                fields.set_u32(
                    entry.offset + segment_field::VMSIZE_32,
                    to_u32(vmsize, "__LINKEDIT vmsize")?,
                )?;
            }
        }
        log::debug!("__LINKEDIT at {fileoff:#x} now {filesize:#x} bytes");
    }

    let ncmds = slice.ncmds;
    let sizeofcmds = slice.sizeofcmds as usize;
    let commands_end = slice.load_commands_end();

    match allocation.action {
        SliceAction::Strip => {
            if let Some((entry, _)) = slice.code_signature() {
                let size = entry.cmdsize as usize;
                let bytes = fields.bytes_mut(0, commands_end)?;
                bytes.copy_within(entry.offset + size..commands_end, entry.offset);
                bytes[commands_end - size..].fill(0);
                fields.set_u32(header_field::NCMDS, ncmds - 1)?;
                fields.set_u32(header_field::SIZEOFCMDS, (sizeofcmds - size) as u32)?;
                log::debug!("removed LC_CODE_SIGNATURE at {:#x}", entry.offset);
            }
        }
        SliceAction::Sign => {
            let command_offset = match slice.code_signature() {
                Some((entry, _)) => entry.offset,
                None => {
                    let available = slice.header_padding_end().saturating_sub(commands_end);
                    if available < LINKEDIT_DATA_COMMAND_SIZE {
                        return Err(Error::NoLoadCommandSpace {
                            needed: LINKEDIT_DATA_COMMAND_SIZE,
                            available,
                        });
                    }
                    fields.set_u32(commands_end, LC_CODE_SIGNATURE)?;
                    fields.set_u32(commands_end + 4, LINKEDIT_DATA_COMMAND_SIZE as u32)?;
                    fields.set_u32(header_field::NCMDS, ncmds + 1)?;
                    fields.set_u32(
                        header_field::SIZEOFCMDS,
                        (sizeofcmds + LINKEDIT_DATA_COMMAND_SIZE) as u32,
                    )?;
                    log::debug!("appended LC_CODE_SIGNATURE at {commands_end:#x}");
                    commands_end
                }
            };
            fields.set_u32(
                command_offset + linkedit_field::DATAOFF,
                to_u32(allocation.signature_offset(), "signature offset")?,
            )?;
            fields.set_u32(
                command_offset + linkedit_field::DATASIZE,
                to_u32(allocation.reserved, "signature size")?,
            )?;
        }
        SliceAction::Keep => {}
    }

    Ok(())
}

fn to_u32(value: usize, what: &str) -> Result<u32> {
    u32::try_from(value).map_err(|_| Error::malformed(format!("{what} {value:#x} exceeds 32 bits")))
}
