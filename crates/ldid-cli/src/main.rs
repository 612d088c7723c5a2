//! Command-line interface for the ldid Mach-O identity editor.
//!
//! Signs, strips and rehashes Mach-O binaries in place, patches dylib
//! timestamps and encryption info, and prints embedded entitlements.

use clap::{ArgAction, Parser};
use ldid::{builder::parse_number, ArchFilter, Ldid, TimestampMode};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "ldid")]
#[command(about = "Mach-O link identity editor")]
struct Cli {
    /// Mach-O files to process in place
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Replace the signature with an ad-hoc one
    #[arg(short = 'S', long)]
    sign: bool,

    /// Embed this file as entitlements (requires --sign)
    #[arg(long, value_name = "FILE")]
    entitlements: Option<PathBuf>,

    /// Remove the signature
    #[arg(short = 'r', long)]
    strip: bool,

    /// Recompute page hashes of the existing signature
    #[arg(short = 's', long)]
    rehash: bool,

    /// Write embedded entitlements to stdout
    #[arg(short = 'e', long)]
    extract_entitlements: bool,

    /// Set the LC_ID_DYLIB timestamp; `-` derives it from the file contents
    #[arg(short = 'T', long, value_name = "N|-", allow_hyphen_values = true)]
    timestamp: Option<String>,

    /// Seed for derived timestamps
    #[arg(long, value_name = "N", default_value = "0")]
    timestamp_seed: String,

    /// Clear cryptid in LC_ENCRYPTION_INFO
    #[arg(short = 'D', long)]
    disable_encryption: bool,

    /// Only touch slices matching TYPE:SUBTYPE
    #[arg(short = 'A', long, value_name = "TYPE:SUBTYPE")]
    arch: Option<ArchFilter>,

    /// Print cpu=TYPE:SUBTYPE for each slice
    #[arg(short = 'a', long)]
    list_arch: bool,

    /// Signing identifier (default: file name)
    #[arg(short = 'I', long, value_name = "NAME")]
    identifier: Option<String>,

    /// More logging (-v info, -vv debug); RUST_LOG overrides
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let ldid = match build(&cli) {
        Ok(ldid) => ldid,
        Err(e) => {
            eprintln!("ldid: {e}");
            return ExitCode::from(1);
        }
    };

    let summary = ldid.process_files(&cli.files);

    let mut stdout = std::io::stdout().lock();
    for report in &summary.reports {
        for slice in &report.slices {
            if let Some(listing) = &slice.listing {
                let _ = writeln!(stdout, "{listing}");
            }
            if let Some(Some(entitlements)) = &slice.entitlements {
                let _ = stdout.write_all(entitlements);
            }
        }
    }
    let _ = stdout.flush();

    for (path, error) in &summary.failures {
        eprintln!("ldid: {}: {error}", path.display());
    }

    ExitCode::from(summary.failed().min(255) as u8)
}

fn build(cli: &Cli) -> ldid::Result<Ldid> {
    let mut ldid = Ldid::new();

    if let Some(ref identifier) = cli.identifier {
        ldid = ldid.identifier(identifier);
    }
    if cli.sign {
        ldid = ldid.sign();
    }
    if let Some(ref path) = cli.entitlements {
        ldid = ldid.entitlements_file(path);
    }
    if cli.strip {
        ldid = ldid.strip();
    }
    if cli.rehash {
        ldid = ldid.rehash();
    }
    if cli.extract_entitlements {
        ldid = ldid.extract_entitlements();
    }
    if let Some(ref value) = cli.timestamp {
        let mode = if value == "-" {
            TimestampMode::Derived {
                seed: parse_number(&cli.timestamp_seed)?,
            }
        } else {
            TimestampMode::Literal(parse_number(value)?)
        };
        ldid = ldid.timestamp(mode);
    }
    if cli.disable_encryption {
        ldid = ldid.disable_encryption();
    }
    if let Some(filter) = cli.arch {
        ldid = ldid.arch(filter);
    }
    if cli.list_arch {
        ldid = ldid.list_architectures();
    }

    ldid.validate()?;
    Ok(ldid)
}
