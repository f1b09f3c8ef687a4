//! Block file I/O
//!
//! Block files are plain append-only files with no header and no index.
//! All access is positional (`pread`/`pwrite` style), so one handle can
//! serve concurrent readers without sharing a file cursor.

use bytes::Bytes;
use packstore_common::{Error, Result};
use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

/// Open handle to a block file
#[derive(Debug)]
pub struct BlockFile {
    file: File,
    path: PathBuf,
}

impl BlockFile {
    /// Open a block file for appending, creating it if missing
    ///
    /// Existing contents are kept; the caller decides where to write.
    pub fn open_writable(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Open an existing block file for reading
    pub fn open_readable(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the block file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current length of the file in bytes
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Check if the file is empty
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Write all of `data` at `offset`
    pub fn write_all_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let mut written = 0usize;
        while written < data.len() {
            let n = pwrite(&self.file, &data[written..], offset + written as u64)?;
            if n == 0 {
                return Err(Error::Io(io::Error::new(
                    io::ErrorKind::WriteZero,
                    format!("write to {} stalled", self.path.display()),
                )));
            }
            written += n;
        }
        Ok(())
    }

    /// Read exactly `length` bytes at `offset`
    ///
    /// A range running past the end of the file is a [`Error::ShortRead`].
    pub fn read_exact_at(&self, offset: u64, length: u64) -> Result<Bytes> {
        let file_len = self.len()?;
        let available = file_len.saturating_sub(offset);
        if available < length {
            return Err(Error::ShortRead {
                expected: length,
                actual: available,
            });
        }

        let size = usize::try_from(length)
            .map_err(|_| Error::invalid_argument(format!("length {length} does not fit in memory")))?;
        let mut buf = vec![0u8; size];
        let mut read = 0usize;
        while read < size {
            let n = pread(&self.file, &mut buf[read..], offset + read as u64)?;
            if n == 0 {
                // Truncated underneath us
                return Err(Error::ShortRead {
                    expected: length,
                    actual: read as u64,
                });
            }
            read += n;
        }
        Ok(Bytes::from(buf))
    }

    /// Sync data and metadata to disk
    pub fn sync(&self) -> Result<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

#[cfg(unix)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.read_at(buf, offset) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

#[cfg(unix)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::unix::fs::FileExt;
    loop {
        match file.write_at(buf, offset) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            other => return other,
        }
    }
}

#[cfg(windows)]
fn pread(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_read(buf, offset)
}

#[cfg(windows)]
fn pwrite(file: &File, buf: &[u8], offset: u64) -> io::Result<usize> {
    use std::os::windows::fs::FileExt;
    file.seek_write(buf, offset)
}
