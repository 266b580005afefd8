//! Platform-uniform read/write memory mapping over a file.
//!
//! [`MappedFile`] is the substrate both the LVC reader (`rt-lvc`) and the
//! tape reader (`rt-tape`) build on: open with a mode, map a window, and use
//! 64-bit offsets uniformly across platforms. A mapping failure leaves the
//! object in the unmapped state (`is_mapped() == false`); callers must check
//! validity before dereferencing rather than relying on a panic.

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;

use memmap2::{Mmap, MmapMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read-only; the file must already exist.
    Read,
    /// Read-write; the file must already exist.
    ReadWrite,
    /// Create (truncating) for writing.
    Write,
    /// Create if missing, append-only.
    Append,
}

#[derive(Debug, thiserror::Error)]
pub enum MmapError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("file is not currently mapped")]
    NotMapped,
    #[error("mapping is read-only")]
    ReadOnlyMapping,
    #[error("requested window [{offset}, {offset_plus_len}) exceeds file length {file_len}")]
    WindowOutOfRange {
        offset: u64,
        offset_plus_len: u64,
        file_len: u64,
    },
}

enum Mapping {
    ReadOnly(Mmap),
    ReadWrite(MmapMut),
}

/// A file plus (optionally) one active memory-mapped window over it.
pub struct MappedFile {
    file: File,
    mode: OpenMode,
    mapping: Option<Mapping>,
    map_offset: u64,
}

impl MappedFile {
    pub fn open(path: &Path, mode: OpenMode) -> Result<Self, MmapError> {
        let file = match mode {
            OpenMode::Read => OpenOptions::new().read(true).open(path)?,
            OpenMode::ReadWrite => OpenOptions::new().read(true).write(true).open(path)?,
            OpenMode::Write => OpenOptions::new()
                .read(true)
                .write(true)
                .create(true)
                .truncate(true)
                .open(path)?,
            OpenMode::Append => OpenOptions::new()
                .read(true)
                .append(true)
                .create(true)
                .open(path)?,
        };
        Ok(Self {
            file,
            mode,
            mapping: None,
            map_offset: 0,
        })
    }

    /// Map `[offset, offset+len)`. Replaces any existing mapping. On failure
    /// the previous mapping (if any) is dropped and `is_mapped()` is false.
    pub fn map(&mut self, offset: u64, len: usize) -> Result<(), MmapError> {
        self.mapping = None;
        let file_len = self.stat_len()?;
        let end = offset
            .checked_add(len as u64)
            .ok_or(MmapError::WindowOutOfRange {
                offset,
                offset_plus_len: u64::MAX,
                file_len,
            })?;
        if end > file_len {
            return Err(MmapError::WindowOutOfRange {
                offset,
                offset_plus_len: end,
                file_len,
            });
        }
        let mapping = match self.mode {
            OpenMode::Read => {
                let m = unsafe { memmap2::MmapOptions::new().offset(offset).len(len).map(&self.file)? };
                Mapping::ReadOnly(m)
            }
            OpenMode::ReadWrite | OpenMode::Write | OpenMode::Append => {
                let m = unsafe {
                    memmap2::MmapOptions::new()
                        .offset(offset)
                        .len(len)
                        .map_mut(&self.file)?
                };
                Mapping::ReadWrite(m)
            }
        };
        self.mapping = Some(mapping);
        self.map_offset = offset;
        Ok(())
    }

    pub fn is_mapped(&self) -> bool {
        self.mapping.is_some()
    }

    pub fn map_offset(&self) -> u64 {
        self.map_offset
    }

    pub fn as_slice(&self) -> Result<&[u8], MmapError> {
        match &self.mapping {
            Some(Mapping::ReadOnly(m)) => Ok(&m[..]),
            Some(Mapping::ReadWrite(m)) => Ok(&m[..]),
            None => Err(MmapError::NotMapped),
        }
    }

    pub fn as_mut_slice(&mut self) -> Result<&mut [u8], MmapError> {
        match &mut self.mapping {
            Some(Mapping::ReadWrite(m)) => Ok(&mut m[..]),
            Some(Mapping::ReadOnly(_)) => Err(MmapError::ReadOnlyMapping),
            None => Err(MmapError::NotMapped),
        }
    }

    /// Current on-disk length of the underlying file.
    pub fn stat_len(&self) -> Result<u64, MmapError> {
        Ok(self.file.metadata()?.len())
    }

    pub fn seek(&mut self, pos: u64) -> Result<u64, MmapError> {
        Ok(self.file.seek(SeekFrom::Start(pos))?)
    }

    pub fn seek_end(&mut self, offset: i64) -> Result<u64, MmapError> {
        Ok(self.file.seek(SeekFrom::End(offset))?)
    }

    pub fn tell(&mut self) -> Result<u64, MmapError> {
        Ok(self.file.stream_position()?)
    }

    /// Extend the file to at least `new_len` bytes (zero-filled). Any active
    /// mapping is invalidated and must be re-`map`ped by the caller.
    pub fn grow(&mut self, new_len: u64) -> Result<(), MmapError> {
        self.mapping = None;
        let cur = self.stat_len()?;
        if new_len > cur {
            self.file.set_len(new_len)?;
        }
        Ok(())
    }

    /// Flush the active mapping's dirty pages to disk.
    pub fn flush(&mut self) -> Result<(), MmapError> {
        match &mut self.mapping {
            Some(Mapping::ReadWrite(m)) => {
                m.flush()?;
                Ok(())
            }
            Some(Mapping::ReadOnly(_)) => Ok(()),
            None => {
                self.file.flush()?;
                Ok(())
            }
        }
    }

    /// The OS page size, used by callers to align mapped windows.
    pub fn page_size() -> usize {
        #[cfg(unix)]
        {
            let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if sz > 0 { sz as usize } else { 4096 }
        }
        #[cfg(not(unix))]
        {
            4096
        }
    }
}
