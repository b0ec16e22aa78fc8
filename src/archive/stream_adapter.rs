//! Seekable view over a random-access byte source
//!
//! Codec crates want `Read + Seek`; content items only promise positioned
//! reads of known length. [`SeekableStream`] keeps its own cursor over a
//! shared [`ReadAt`] source so several independent cursors can be handed
//! to a codec (tar needs one per pass).

use bytes::Bytes;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

/// Positioned, length-aware byte source
pub trait ReadAt: Send + Sync {
    /// Read up to `buf.len()` bytes starting at `offset`. Zero means EOF.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize>;

    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Regular file opened read-only
pub struct FileSource {
    file: File,
    len: u64,
}

impl FileSource {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len();
        Ok(Self { file, len })
    }
}

impl ReadAt for FileSource {
    #[cfg(unix)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::unix::fs::FileExt::read_at(&self.file, buf, offset)
    }

    #[cfg(windows)]
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        std::os::windows::fs::FileExt::seek_read(&self.file, buf, offset)
    }

    fn len(&self) -> u64 {
        self.len
    }
}

impl ReadAt for Bytes {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<usize> {
        if offset >= self.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.len() - start);
        buf[..n].copy_from_slice(&self[start..start + n]);
        Ok(n)
    }

    fn len(&self) -> u64 {
        Bytes::len(self) as u64
    }
}

/// `Read + Seek` cursor over a shared [`ReadAt`] source
#[derive(Clone)]
pub struct SeekableStream {
    source: Arc<dyn ReadAt>,
    position: u64,
}

impl SeekableStream {
    pub fn new(source: Arc<dyn ReadAt>) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn open_file(path: &Path) -> io::Result<Self> {
        Ok(Self::new(Arc::new(FileSource::open(path)?)))
    }

    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self::new(Arc::new(bytes.into()))
    }

    pub fn len(&self) -> u64 {
        self.source.len()
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_empty()
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Independent cursor over the same source, positioned at the start
    pub fn rewound(&self) -> Self {
        Self::new(Arc::clone(&self.source))
    }

    /// Fill `buf` from the start of the source, returning how much was read
    pub fn read_head(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.source.read_at(filled as u64, &mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }
}

impl Read for SeekableStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        if self.position >= self.source.len() {
            return Ok(0);
        }
        let n = self.source.read_at(self.position, buf)?;
        self.position += n as u64;
        Ok(n)
    }
}

impl Seek for SeekableStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let target = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::End(delta) => self.source.len().checked_add_signed(delta),
            SeekFrom::Current(delta) => self.position.checked_add_signed(delta),
        };
        match target {
            Some(target) => {
                self.position = target;
                Ok(target)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative position",
            )),
        }
    }
}
