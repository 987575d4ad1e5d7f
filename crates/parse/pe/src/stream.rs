//! Random-access byte sources.

use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use crate::PeError;

/// A byte source that supports positioned reads.
///
/// Mirrors `pread`: a read may return fewer bytes than requested, and a
/// return of zero means the offset is at or past the end of the source.
pub trait ReadAt {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error.
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize>;
}

impl ReadAt for File {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        FileExt::read_at(self, buf, offset)
    }
}

impl ReadAt for [u8] {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        let Ok(start) = usize::try_from(offset) else {
            return Ok(0);
        };
        let Some(available) = self.get(start..) else {
            return Ok(0);
        };
        let len = buf.len().min(available.len());
        buf[..len].copy_from_slice(&available[..len]);
        Ok(len)
    }
}

impl ReadAt for Vec<u8> {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        self.as_slice().read_at(buf, offset)
    }
}

impl<T: ReadAt + ?Sized> ReadAt for &T {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> io::Result<usize> {
        (**self).read_at(buf, offset)
    }
}

/// Fills `buf` from `offset`, failing with [`PeError::Truncated`] if the
/// source ends first.
pub(crate) fn read_exact_at<R: ReadAt + ?Sized>(
    stream: &R,
    mut buf: &mut [u8],
    mut offset: u64,
) -> Result<(), PeError> {
    while !buf.is_empty() {
        match stream.read_at(buf, offset) {
            Ok(0) => return Err(PeError::Truncated),
            Ok(n) => {
                buf = &mut buf[n..];
                offset += n as u64;
            }
            Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => return Err(PeError::Disk(err)),
        }
    }
    Ok(())
}
