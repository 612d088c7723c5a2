//! Ldid builder API
//!
//! Provides a builder pattern interface over the per-file pipeline: relocate
//! (when signing or stripping), re-parse, then apply the per-slice edits in
//! a fixed order: timestamp, encryption, signature or rehash, entitlements
//! extraction.

use crate::file::{replace_file, Input};
use crate::macho::mutate::{self, TimestampMode};
use crate::macho::parser::MachOFile;
use crate::macho::planner::SliceAction;
use crate::macho::signer::write_signature;
use crate::macho::writer::{plan_layout, relocate};
use crate::{Error, Result};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Architecture selector, `cputype:cpusubtype`.
///
/// Only slices matching the selector are edited; others are carried over
/// unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchFilter {
    pub cputype: u32,
    pub cpusubtype: u32,
}

impl FromStr for ArchFilter {
    type Err = Error;

    /// Parse `TYPE:SUBTYPE`, each in decimal, `0x` hex or `0` octal.
    fn from_str(s: &str) -> Result<Self> {
        let (cputype, cpusubtype) = s
            .split_once(':')
            .ok_or_else(|| Error::Config(format!("architecture `{s}` is not TYPE:SUBTYPE")))?;
        Ok(Self {
            cputype: parse_number(cputype)?,
            cpusubtype: parse_number(cpusubtype)?,
        })
    }
}

impl fmt::Display for ArchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}:{:#x}", self.cputype, self.cpusubtype)
    }
}

/// Parse an unsigned number with C-style radix prefixes.
pub fn parse_number(s: &str) -> Result<u32> {
    let s = s.trim();
    let parsed = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16)
    } else if s.len() > 1 && s.starts_with('0') {
        u32::from_str_radix(&s[1..], 8)
    } else {
        s.parse()
    };
    parsed.map_err(|e| Error::Config(format!("invalid number `{s}`: {e}")))
}

/// What happened to one slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceReport {
    /// Position in the fat table (0 for thin files).
    pub index: usize,
    pub cputype: u32,
    pub cpusubtype: u32,
    /// `cpu=0x..:0x..` line, filled in when architecture listing is on.
    pub listing: Option<String>,
    /// New LC_ID_DYLIB timestamp.
    pub timestamp: Option<u32>,
    /// Number of encryption commands disabled.
    pub encryption_disabled: usize,
    /// Bytes used by the new signature.
    pub signature_size: Option<usize>,
    /// Pages rehashed in place.
    pub rehashed_pages: Option<usize>,
    /// Extracted entitlements; `Some(None)` when the signature has none.
    pub entitlements: Option<Option<Vec<u8>>>,
}

/// Result of processing an in-memory image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Processed {
    /// The rewritten image, `None` when nothing was changed.
    pub data: Option<Vec<u8>>,
    /// Reports for the slices that matched the architecture filter.
    pub slices: Vec<SliceReport>,
}

/// Result of processing one file on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileReport {
    pub path: PathBuf,
    pub slices: Vec<SliceReport>,
    /// Whether the file was rewritten.
    pub modified: bool,
}

/// Outcome of a batch: every file is attempted, failures are collected.
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub reports: Vec<FileReport>,
    pub failures: Vec<(PathBuf, Error)>,
}

impl BatchSummary {
    pub fn processed(&self) -> usize {
        self.reports.len()
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }
}

/// Mach-O signature editor with builder pattern API.
///
/// # Example
///
/// ```no_run
/// use ldid::Ldid;
///
/// let report = Ldid::new()
///     .identifier("com.example.cat")
///     .sign()
///     .process_file("cat")?;
/// assert!(report.modified);
/// # Ok::<(), ldid::Error>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct Ldid {
    identifier: Option<String>,
    entitlements: Option<Vec<u8>>,
    entitlements_file: Option<PathBuf>,
    sign: bool,
    strip: bool,
    rehash: bool,
    timestamp: Option<TimestampMode>,
    disable_encryption: bool,
    extract_entitlements: bool,
    arch: Option<ArchFilter>,
    list_architectures: bool,
}

impl Ldid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the signing identifier.
    ///
    /// Defaults to the file name of each input.
    pub fn identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = Some(identifier.into());
        self
    }

    /// Embed these entitlements when signing. The bytes are stored verbatim.
    pub fn entitlements(mut self, entitlements: impl Into<Vec<u8>>) -> Self {
        self.entitlements = Some(entitlements.into());
        self
    }

    /// Embed the contents of this file as entitlements when signing.
    pub fn entitlements_file(mut self, path: impl AsRef<Path>) -> Self {
        self.entitlements_file = Some(path.as_ref().to_path_buf());
        self
    }

    /// Replace any signature with a fresh ad-hoc one.
    pub fn sign(mut self) -> Self {
        self.sign = true;
        self
    }

    /// Remove the signature and shrink the file.
    pub fn strip(mut self) -> Self {
        self.strip = true;
        self
    }

    /// Recompute the page hashes of the existing signature in place.
    pub fn rehash(mut self) -> Self {
        self.rehash = true;
        self
    }

    pub fn timestamp(mut self, mode: TimestampMode) -> Self {
        self.timestamp = Some(mode);
        self
    }

    /// Clear the `cryptid` of encryption info commands.
    pub fn disable_encryption(mut self) -> Self {
        self.disable_encryption = true;
        self
    }

    pub fn extract_entitlements(mut self) -> Self {
        self.extract_entitlements = true;
        self
    }

    /// Restrict every operation to slices matching `filter`.
    pub fn arch(mut self, filter: ArchFilter) -> Self {
        self.arch = Some(filter);
        self
    }

    /// Report a `cpu=TYPE:SUBTYPE` line for each selected slice.
    pub fn list_architectures(mut self) -> Self {
        self.list_architectures = true;
        self
    }

    /// Validate the builder configuration.
    ///
    /// Returns an error if:
    /// - Signing is combined with stripping or rehashing
    /// - Stripping is combined with rehashing
    /// - Entitlements are given without signing, or given twice
    /// - The identifier contains a NUL byte
    pub fn validate(&self) -> Result<()> {
        if self.sign && self.strip {
            return Err(Error::Config("cannot both sign and strip".into()));
        }
        if self.rehash && (self.sign || self.strip) {
            return Err(Error::Config(
                "rehash cannot be combined with sign or strip".into(),
            ));
        }
        let has_entitlements = self.entitlements.is_some() || self.entitlements_file.is_some();
        if self.entitlements.is_some() && self.entitlements_file.is_some() {
            return Err(Error::Config(
                "cannot specify both entitlements bytes and an entitlements file".into(),
            ));
        }
        if has_entitlements && !self.sign {
            return Err(Error::Config("entitlements are only used when signing".into()));
        }
        if self.identifier.as_deref().is_some_and(|id| id.contains('\0')) {
            return Err(Error::Config("identifier contains a NUL byte".into()));
        }
        Ok(())
    }

    fn load_entitlements(&self) -> Result<Option<Vec<u8>>> {
        match (&self.entitlements, &self.entitlements_file) {
            (Some(bytes), _) => Ok(Some(bytes.clone())),
            (None, Some(path)) => Ok(Some(std::fs::read(path)?)),
            (None, None) => Ok(None),
        }
    }

    fn mutates(&self) -> bool {
        self.sign
            || self.strip
            || self.rehash
            || self.timestamp.is_some()
            || self.disable_encryption
    }

    /// Process an in-memory image.
    ///
    /// `name` is the default signing identifier.
    pub fn process_bytes(&self, input: &[u8], name: &str) -> Result<Processed> {
        self.validate()?;
        let entitlements = self.load_entitlements()?;
        let identifier = self.identifier.as_deref().unwrap_or(name);

        let source = MachOFile::parse(input)?;
        let selected: Vec<bool> = source
            .slices
            .iter()
            .map(|slice| {
                self.arch
                    .map_or(true, |f| slice.matches_arch(f.cputype, f.cpusubtype))
            })
            .collect();
        if !selected.iter().any(|&s| s) {
            log::info!("{name}: no slice matches the architecture filter");
            return Ok(Processed {
                data: None,
                slices: Vec::new(),
            });
        }

        let mut data = if self.sign || self.strip {
            let action = if self.sign {
                SliceAction::Sign
            } else {
                SliceAction::Strip
            };
            let actions: Vec<SliceAction> = selected
                .iter()
                .map(|&s| if s { action } else { SliceAction::Keep })
                .collect();
            let layout = plan_layout(
                &source,
                &actions,
                identifier,
                entitlements.as_ref().map(Vec::len),
            )?;
            relocate(input, &source, &layout)?
        } else if self.mutates() {
            input.to_vec()
        } else {
            Vec::new()
        };

        let image: &[u8] = if data.is_empty() { input } else { &data };
        let file = MachOFile::parse(image)?;

        let mut reports = Vec::new();
        for (index, slice) in file.slices.iter().enumerate() {
            if !selected.get(index).copied().unwrap_or(false) {
                continue;
            }
            let mut report = SliceReport {
                index,
                cputype: slice.cputype,
                cpusubtype: slice.cpusubtype,
                listing: None,
                timestamp: None,
                encryption_disabled: 0,
                signature_size: None,
                rehashed_pages: None,
                entitlements: None,
            };

            if self.list_architectures {
                // Capability bits of the subtype are not part of the listing.
                let mut line =
                    format!("cpu={:#x}:{:#x}", slice.cputype, slice.cpusubtype & 0xff);
                if let Some(arch) = slice.arch_name() {
                    line.push_str(&format!(" ({arch})"));
                }
                report.listing = Some(line);
            }
            if let Some(mode) = self.timestamp {
                report.timestamp = mutate::set_timestamp(&mut data, slice, mode)?;
            }
            if self.disable_encryption {
                report.encryption_disabled = mutate::disable_encryption(&mut data, slice)?;
            }
            if self.sign {
                report.signature_size = Some(write_signature(
                    &mut data,
                    slice,
                    identifier,
                    entitlements.as_deref(),
                )?);
            } else if self.rehash {
                report.rehashed_pages = Some(mutate::rehash(&mut data, slice)?);
            }
            if self.extract_entitlements {
                let image: &[u8] = if data.is_empty() { input } else { &data };
                report.entitlements = Some(mutate::extract_entitlements(image, slice)?);
            }
            reports.push(report);
        }

        let modified = self.mutates();
        log::info!(
            "{name}: {} slice(s){}",
            reports.len(),
            if modified { ", rewritten" } else { "" }
        );
        Ok(Processed {
            data: modified.then_some(data),
            slices: reports,
        })
    }

    /// Process one file, replacing it when anything changed.
    pub fn process_file(&self, path: impl AsRef<Path>) -> Result<FileReport> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        let processed = {
            let input = Input::open(path)?;
            self.process_bytes(&input, &name)?
        };

        let modified = processed.data.is_some();
        if let Some(data) = processed.data {
            replace_file(path, &data)?;
        }

        Ok(FileReport {
            path: path.to_path_buf(),
            slices: processed.slices,
            modified,
        })
    }

    /// Process every file, continuing past failures.
    pub fn process_files<I, P>(&self, paths: I) -> BatchSummary
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut summary = BatchSummary::default();
        for path in paths {
            let path = path.as_ref();
            match self.process_file(path) {
                Ok(report) => summary.reports.push(report),
                Err(e) => {
                    log::warn!("{}: {e}", path.display());
                    summary.failures.push((path.to_path_buf(), e));
                }
            }
        }
        summary
    }
}
