//! Reading inputs and atomically replacing outputs.

use crate::Result;
use memmap2::Mmap;
use std::fs::{self, File};
use std::io::Write;
use std::ops::Deref;
use std::path::Path;
use tempfile::NamedTempFile;

/// A read-only view of an input file.
///
/// Empty files cannot be mapped, so they are represented without a mapping.
pub struct Input {
    mmap: Option<Mmap>,
}

impl Input {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        if file.metadata()?.len() == 0 {
            return Ok(Self { mmap: None });
        }
        // The mapping is private to this process and dropped before the
        // file is replaced.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(Self { mmap: Some(mmap) })
    }
}

impl Deref for Input {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.mmap.as_deref().unwrap_or(&[])
    }
}

/// Replace `path` with `data`.
///
/// The new contents are written to a temporary file next to `path`, given
/// the original's permissions (and owner, on Unix) and renamed over it.
pub fn replace_file(path: impl AsRef<Path>, data: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let metadata = fs::metadata(path)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::MetadataExt;
        let temp_meta = temp.as_file().metadata()?;
        if temp_meta.uid() != metadata.uid() || temp_meta.gid() != metadata.gid() {
            std::os::unix::fs::chown(temp.path(), Some(metadata.uid()), Some(metadata.gid()))?;
        }
    }
    fs::set_permissions(temp.path(), metadata.permissions())?;

    temp.persist(path).map_err(|e| e.error)?;
    log::trace!("replaced {} ({} bytes)", path.display(), data.len());
    Ok(())
}
