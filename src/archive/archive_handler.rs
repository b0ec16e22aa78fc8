/**
 * 压缩文件处理器接口
 *
 * 每种格式实现 ArchiveHandler：打开时枚举条目元数据，随后按索引批量解压，
 * 解压过程通过 ExtractCallback 向调用方索取输出流并回报每个条目的结果。
 */
use crate::archive::gz_handler::{Bzip2Handler, GzHandler};
use crate::archive::sevenz_handler::SevenZHandler;
use crate::archive::stream_adapter::SeekableStream;
use crate::archive::tar_handler::TarHandler;
use crate::archive::zip_handler::ZipHandler;
use crate::error::{Result, UnpackError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read, Write};
use tracing::{debug, warn};

/// Supported container formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArchiveFormat {
    Zip,
    SevenZip,
    Rar,
    Tar,
    Gzip,
    Bzip2,
}

impl ArchiveFormat {
    /// Bytes needed to recognise every supported signature
    pub const SIGNATURE_PROBE_LEN: usize = 512;

    /// Detect the format from the leading bytes of a stream
    pub fn detect(head: &[u8]) -> Option<Self> {
        if head.starts_with(b"PK\x03\x04") || head.starts_with(b"PK\x05\x06") {
            Some(Self::Zip)
        } else if head.starts_with(&[0x37, 0x7A, 0xBC, 0xAF, 0x27, 0x1C]) {
            Some(Self::SevenZip)
        } else if head.starts_with(b"Rar!\x1A\x07") {
            Some(Self::Rar)
        } else if head.starts_with(&[0x1F, 0x8B]) {
            Some(Self::Gzip)
        } else if head.starts_with(b"BZh") {
            Some(Self::Bzip2)
        } else if head.len() >= 262 && &head[257..262] == b"ustar" {
            Some(Self::Tar)
        } else {
            None
        }
    }

    /// Map a sniffed or cataloged MIME type to a container format
    pub fn from_mime(mime: &str) -> Option<Self> {
        match mime {
            "application/zip" | "application/x-zip-compressed" => Some(Self::Zip),
            "application/x-7z-compressed" => Some(Self::SevenZip),
            "application/vnd.rar" | "application/x-rar-compressed" | "application/x-rar" => {
                Some(Self::Rar)
            }
            "application/x-tar" | "application/x-gtar" => Some(Self::Tar),
            "application/gzip" | "application/x-gzip" => Some(Self::Gzip),
            "application/x-bzip2" | "application/x-bzip" => Some(Self::Bzip2),
            _ => None,
        }
    }

    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "zip" => Some(Self::Zip),
            "7z" => Some(Self::SevenZip),
            "rar" => Some(Self::Rar),
            "tar" => Some(Self::Tar),
            "gz" | "tgz" => Some(Self::Gzip),
            "bz2" | "tbz" | "tbz2" => Some(Self::Bzip2),
            _ => None,
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Zip => "application/zip",
            Self::SevenZip => "application/x-7z-compressed",
            Self::Rar => "application/vnd.rar",
            Self::Tar => "application/x-tar",
            Self::Gzip => "application/gzip",
            Self::Bzip2 => "application/x-bzip2",
        }
    }

    /// Formats that wrap exactly one compressed stream
    pub fn is_single_stream(&self) -> bool {
        matches!(self, Self::Gzip | Self::Bzip2)
    }
}

impl fmt::Display for ArchiveFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Zip => "zip",
            Self::SevenZip => "7z",
            Self::Rar => "rar",
            Self::Tar => "tar",
            Self::Gzip => "gzip",
            Self::Bzip2 => "bzip2",
        };
        f.write_str(name)
    }
}

/// How the codec layer should pick a backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecOptions {
    /// Detect by signature, falling back to the item's declared format
    Auto,
    /// The item is known to be RAR; skip detection
    ForceRar,
}

impl CodecOptions {
    pub fn resolve(mime_type: Option<&str>, extension: Option<&str>) -> Self {
        let declared = mime_type
            .and_then(ArchiveFormat::from_mime)
            .or_else(|| extension.and_then(ArchiveFormat::from_extension));
        match declared {
            Some(ArchiveFormat::Rar) => Self::ForceRar,
            _ => Self::Auto,
        }
    }
}

/// Metadata of one entry inside an open archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveEntryMeta {
    pub index: usize,
    /// Decoded path; empty when the container stores none
    pub path: String,
    /// Path bytes exactly as stored, when the format keeps them
    pub raw_path: Option<Vec<u8>>,
    pub size: Option<u64>,
    pub packed_size: Option<u64>,
    pub is_folder: bool,
    pub encrypted: bool,
    pub created: Option<i64>,
    pub accessed: Option<i64>,
    pub modified: Option<i64>,
}

/// Per-entry outcome reported by the codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationResult {
    Ok,
    UnsupportedMethod,
    DataError,
    CrcError,
    WrongPassword,
    Unavailable,
    IoError,
}

impl OperationResult {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok)
    }

    /// Classify an I/O failure raised while copying an entry
    ///
    /// Codec errors wrapped inside the I/O error are classified by variant;
    /// anything else by its kind.
    pub fn from_io_error(err: &io::Error) -> Self {
        if let Some(codec) = err
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<sevenz_rust::Error>())
        {
            return crate::archive::sevenz_handler::classify_error(codec);
        }
        match err.kind() {
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => Self::DataError,
            io::ErrorKind::Unsupported => Self::UnsupportedMethod,
            _ => Self::IoError,
        }
    }
}

/// Receives decompressed bytes from a handler
pub trait ExtractCallback {
    /// Output for `index`; `None` means the entry produces no bytes
    fn get_stream(&mut self, index: usize) -> io::Result<Option<&mut dyn Write>>;

    fn set_operation_result(&mut self, index: usize, result: OperationResult);

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// One open archive
pub trait ArchiveHandler: Send {
    fn format(&self) -> ArchiveFormat;

    fn entries(&self) -> &[ArchiveEntryMeta];

    /// Extract `indices` (ascending) through `callback`
    ///
    /// Per-entry failures are reported through `set_operation_result`; an
    /// `Err` means the call was interrupted or the archive became unreadable.
    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()>;
}

/// Stream one entry's bytes into the callback's sink
///
/// The reader is always left at the end of the entry, whether or not the
/// callback wanted its bytes; solid 7z blocks depend on that.
pub(crate) fn copy_entry<R: Read + ?Sized>(
    index: usize,
    reader: &mut R,
    callback: &mut dyn ExtractCallback,
) -> OperationResult {
    match callback.get_stream(index) {
        Ok(Some(out)) => match io::copy(reader, out) {
            Ok(_) => OperationResult::Ok,
            Err(e) => {
                debug!(entry_index = index, error = %e, "Entry copy failed");
                discard(index, reader);
                OperationResult::from_io_error(&e)
            }
        },
        Ok(None) => {
            discard(index, reader);
            OperationResult::Ok
        }
        Err(e) => {
            warn!(entry_index = index, error = %e, "Could not open output for entry");
            discard(index, reader);
            OperationResult::IoError
        }
    }
}

fn discard<R: Read + ?Sized>(index: usize, reader: &mut R) {
    if let Err(e) = io::copy(reader, &mut io::sink()) {
        debug!(entry_index = index, error = %e, "Could not skip rest of entry");
    }
}

/// Report `result` for every requested index not yet handled
pub(crate) fn fail_remaining(
    indices: &[usize],
    handled: &std::collections::HashSet<usize>,
    result: OperationResult,
    callback: &mut dyn ExtractCallback,
) {
    for &index in indices {
        if !handled.contains(&index) {
            callback.set_operation_result(index, result);
        }
    }
}

/// Open `stream` with the backend chosen by `options`
///
/// `declared` is the format implied by the item's MIME type or extension; it
/// is used when no signature matches (old tar headers carry none).
pub fn open_archive(
    stream: SeekableStream,
    options: CodecOptions,
    declared: Option<ArchiveFormat>,
    password: Option<&str>,
) -> Result<Box<dyn ArchiveHandler>> {
    let format = match options {
        CodecOptions::ForceRar => ArchiveFormat::Rar,
        CodecOptions::Auto => {
            let mut head = [0u8; ArchiveFormat::SIGNATURE_PROBE_LEN];
            let n = stream.read_head(&mut head)?;
            ArchiveFormat::detect(&head[..n])
                .or(declared)
                .ok_or_else(|| UnpackError::UnsupportedFormat("unrecognised signature".into()))?
        }
    };
    debug!(%format, len = stream.len(), "Opening archive");

    let handler: Box<dyn ArchiveHandler> = match format {
        ArchiveFormat::Zip => Box::new(ZipHandler::open(stream, password)?),
        ArchiveFormat::SevenZip => Box::new(SevenZHandler::open(stream, password)?),
        ArchiveFormat::Tar => Box::new(TarHandler::open(stream)?),
        ArchiveFormat::Gzip => Box::new(GzHandler::open(stream)?),
        ArchiveFormat::Bzip2 => Box::new(Bzip2Handler::open(stream)?),
        ArchiveFormat::Rar => open_rar(stream, password)?,
    };
    Ok(handler)
}

#[cfg(feature = "rar")]
fn open_rar(stream: SeekableStream, password: Option<&str>) -> Result<Box<dyn ArchiveHandler>> {
    Ok(Box::new(crate::archive::rar_handler::RarHandler::open(
        stream, password,
    )?))
}

#[cfg(not(feature = "rar"))]
fn open_rar(_stream: SeekableStream, _password: Option<&str>) -> Result<Box<dyn ArchiveHandler>> {
    Err(UnpackError::UnsupportedFormat(
        "RAR support is not compiled in (enable the `rar` feature)".into(),
    ))
}
