//! Synthetic Mach-O images for integration tests.
//!
//! Every image has the same shape: a header, a __TEXT segment covering the
//! first page with a __text section at 0x800, a __LINKEDIT segment holding
//! only a string table that ends at EOF, and an LC_UUID. Dylib and
//! encryption commands are optional.

#![allow(dead_code)]

pub const CPU_TYPE_ARM64: u32 = 0x0100_000c;
pub const CPU_TYPE_X86: u32 = 7;
pub const CPU_TYPE_POWERPC: u32 = 18;

pub const TEXT_SIZE: usize = 0x1000;
pub const SECTION_OFFSET: usize = 0x800;

const LC_SEGMENT: u32 = 0x1;
const LC_SYMTAB: u32 = 0x2;
const LC_ID_DYLIB: u32 = 0xd;
const LC_SEGMENT_64: u32 = 0x19;
const LC_UUID: u32 = 0x1b;
const LC_ENCRYPTION_INFO: u32 = 0x21;
const LC_ENCRYPTION_INFO_64: u32 = 0x2c;

pub const DYLIB_NAME: &[u8] = b"@rpath/libfixture.dylib\0";
pub const ORIGINAL_TIMESTAMP: u32 = 2;

#[derive(Debug, Clone)]
pub struct Fixture {
    pub is_64: bool,
    pub big_endian: bool,
    pub cputype: u32,
    pub cpusubtype: u32,
    pub dylib: bool,
    pub encryption: bool,
    pub linkedit: bool,
    /// Put __text right after the load commands, leaving no header padding.
    pub tight: bool,
    pub linkedit_size: usize,
}

impl Default for Fixture {
    fn default() -> Self {
        Self {
            is_64: true,
            big_endian: false,
            cputype: CPU_TYPE_ARM64,
            cpusubtype: 0,
            dylib: false,
            encryption: false,
            linkedit: true,
            tight: false,
            linkedit_size: 0x40,
        }
    }
}

struct Writer {
    buf: Vec<u8>,
    big_endian: bool,
}

impl Writer {
    fn u32(&mut self, value: u32) {
        if self.big_endian {
            self.buf.extend_from_slice(&value.to_be_bytes());
        } else {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn u64(&mut self, value: u64) {
        if self.big_endian {
            self.buf.extend_from_slice(&value.to_be_bytes());
        } else {
            self.buf.extend_from_slice(&value.to_le_bytes());
        }
    }

    fn word(&mut self, is_64: bool, value: u64) {
        if is_64 {
            self.u64(value);
        } else {
            self.u32(value as u32);
        }
    }

    fn name(&mut self, name: &str) {
        let mut bytes = [0u8; 16];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        self.buf.extend_from_slice(&bytes);
    }
}

impl Fixture {
    pub fn x86() -> Self {
        Self {
            is_64: false,
            cputype: CPU_TYPE_X86,
            cpusubtype: 3,
            ..Self::default()
        }
    }

    pub fn powerpc() -> Self {
        Self {
            is_64: false,
            big_endian: true,
            cputype: CPU_TYPE_POWERPC,
            cpusubtype: 0,
            ..Self::default()
        }
    }

    pub fn dylib() -> Self {
        Self {
            dylib: true,
            ..Self::default()
        }
    }

    pub fn size(&self) -> usize {
        TEXT_SIZE + self.linkedit_size
    }

    fn segment(&self, w: &mut Writer, name: &str, vmaddr: u64, vmsize: u64, fileoff: u64, filesize: u64, section: Option<usize>) {
        let is_64 = self.is_64;
        let (cmd, header, section_size) = if is_64 {
            (LC_SEGMENT_64, 72, 80)
        } else {
            (LC_SEGMENT, 56, 68)
        };
        let nsects = u32::from(section.is_some());
        w.u32(cmd);
        w.u32(header + nsects * section_size);
        w.name(name);
        w.word(is_64, vmaddr);
        w.word(is_64, vmsize);
        w.word(is_64, fileoff);
        w.word(is_64, filesize);
        w.u32(5);
        w.u32(5);
        w.u32(nsects);
        w.u32(0);
        if let Some(offset) = section {
            w.name("__text");
            w.name(name);
            w.word(is_64, vmaddr + offset as u64);
            w.word(is_64, (TEXT_SIZE - offset) as u64);
            w.u32(offset as u32);
            w.u32(4);
            w.u32(0);
            w.u32(0);
            w.u32(0x8000_0400);
            w.u32(0);
            w.u32(0);
            if is_64 {
                w.u32(0);
            }
        }
    }

    fn commands(&self, section_offset: usize) -> (u32, Vec<u8>) {
        let mut w = Writer {
            buf: Vec::new(),
            big_endian: self.big_endian,
        };
        let mut ncmds = 0;

        self.segment(&mut w, "__TEXT", 0x1_0000, TEXT_SIZE as u64, 0, TEXT_SIZE as u64, Some(section_offset));
        ncmds += 1;
        if self.linkedit {
            self.segment(&mut w, "__LINKEDIT", 0x1_1000, 0x1000, TEXT_SIZE as u64, self.linkedit_size as u64, None);
            ncmds += 1;
        }

        w.u32(LC_SYMTAB);
        w.u32(24);
        w.u32(TEXT_SIZE as u32);
        w.u32(0);
        w.u32(TEXT_SIZE as u32);
        w.u32(self.linkedit_size as u32);
        ncmds += 1;

        w.u32(LC_UUID);
        w.u32(24);
        w.buf.extend((0..16u8).map(|i| i * 17));
        ncmds += 1;

        if self.dylib {
            w.u32(LC_ID_DYLIB);
            w.u32(24 + DYLIB_NAME.len() as u32);
            w.u32(24);
            w.u32(ORIGINAL_TIMESTAMP);
            w.u32(0x0001_0000);
            w.u32(0x0001_0000);
            w.buf.extend_from_slice(DYLIB_NAME);
            ncmds += 1;
        }

        if self.encryption {
            w.u32(if self.is_64 { LC_ENCRYPTION_INFO_64 } else { LC_ENCRYPTION_INFO });
            w.u32(if self.is_64 { 24 } else { 20 });
            w.u32(SECTION_OFFSET as u32);
            w.u32((TEXT_SIZE - SECTION_OFFSET) as u32);
            w.u32(1);
            if self.is_64 {
                w.u32(0);
            }
            ncmds += 1;
        }

        (ncmds, w.buf)
    }

    pub fn header_size(&self) -> usize {
        if self.is_64 {
            32
        } else {
            28
        }
    }

    pub fn build(&self) -> Vec<u8> {
        let (_, sized) = self.commands(SECTION_OFFSET);
        let section_offset = if self.tight {
            self.header_size() + sized.len()
        } else {
            SECTION_OFFSET
        };
        let (ncmds, commands) = self.commands(section_offset);

        let mut w = Writer {
            buf: Vec::with_capacity(self.size()),
            big_endian: self.big_endian,
        };
        w.u32(if self.is_64 { 0xfeed_facf } else { 0xfeed_face });
        w.u32(self.cputype);
        w.u32(self.cpusubtype);
        w.u32(if self.dylib { 6 } else { 2 });
        w.u32(ncmds);
        w.u32(commands.len() as u32);
        w.u32(0x0020_0085);
        if self.is_64 {
            w.u32(0);
        }
        w.buf.extend_from_slice(&commands);

        let mut data = w.buf;
        data.resize(self.size(), 0);
        for (i, byte) in data[section_offset..TEXT_SIZE].iter_mut().enumerate() {
            *byte = (i * 7 + 3) as u8;
        }
        for (i, byte) in data[TEXT_SIZE..].iter_mut().enumerate() {
            *byte = if i % 8 == 7 { 0 } else { b'a' + (i % 26) as u8 };
        }
        data
    }
}

/// A fat file with a big-endian table (or little-endian when `swapped`).
///
/// `parts` pairs each image with its alignment as a power of two.
pub fn fat(parts: &[(&Fixture, u32)], swapped: bool) -> Vec<u8> {
    let mut w = Writer {
        buf: Vec::new(),
        big_endian: !swapped,
    };
    w.u32(0xcafe_babe);
    w.u32(parts.len() as u32);

    let mut offset = 8 + 20 * parts.len();
    let mut images = Vec::new();
    for (fixture, align) in parts {
        offset = align_up(offset, 1 << align);
        let image = fixture.build();
        w.u32(fixture.cputype);
        w.u32(fixture.cpusubtype);
        w.u32(offset as u32);
        w.u32(image.len() as u32);
        w.u32(*align);
        images.push((offset, image));
        offset += images.last().map_or(0, |(_, image)| image.len());
    }

    let mut data = w.buf;
    for (at, image) in images {
        data.resize(at, 0);
        data.extend_from_slice(&image);
    }
    data
}

pub fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}

pub fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes(data[at..at + 4].try_into().unwrap())
}

pub fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(data[at..at + 4].try_into().unwrap())
}
