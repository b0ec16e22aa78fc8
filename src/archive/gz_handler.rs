use crate::archive::archive_handler::{
    copy_entry, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, ExtractCallback,
};
use crate::archive::stream_adapter::SeekableStream;
use crate::error::{Result, UnpackError};
use bzip2::read::MultiBzDecoder;
use flate2::read::{GzDecoder, MultiGzDecoder};
use std::io::{Read, Seek, SeekFrom};
use tracing::debug;

/**
 * GZ / BZ2 单流处理器
 *
 * 单流格式只有一个条目。gzip 头里可能带原始文件名，尾部 ISIZE 给出
 * 解压后大小（模 2^32）；bzip2 两者都没有，名字留空由路径树合成。
 */
pub struct GzHandler {
    stream: SeekableStream,
    entries: Vec<ArchiveEntryMeta>,
}

impl GzHandler {
    pub fn open(stream: SeekableStream) -> Result<Self> {
        let decoder = GzDecoder::new(stream.rewound());
        let header = decoder
            .header()
            .ok_or_else(|| UnpackError::archive_error("Invalid gzip header", None))?;
        let raw_name = header.filename().map(<[u8]>::to_vec);
        let modified = match header.mtime() {
            0 => None,
            t => Some(t as i64),
        };

        let size = read_isize_trailer(&stream);
        debug!(?size, has_name = raw_name.is_some(), "gzip stream opened");

        let entry = ArchiveEntryMeta {
            index: 0,
            path: raw_name
                .as_deref()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .unwrap_or_default(),
            raw_path: raw_name,
            size,
            packed_size: Some(stream.len()),
            is_folder: false,
            encrypted: false,
            created: None,
            accessed: None,
            modified,
        };
        Ok(Self {
            stream,
            entries: vec![entry],
        })
    }
}

/// Uncompressed length modulo 2^32 from the last four bytes
fn read_isize_trailer(stream: &SeekableStream) -> Option<u64> {
    if stream.len() < 18 {
        return None;
    }
    let mut cursor = stream.rewound();
    cursor.seek(SeekFrom::End(-4)).ok()?;
    let mut trailer = [0u8; 4];
    cursor.read_exact(&mut trailer).ok()?;
    Some(u32::from_le_bytes(trailer) as u64)
}

impl ArchiveHandler for GzHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Gzip
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        if !indices.contains(&0) {
            return Ok(());
        }
        if callback.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }
        let mut decoder = MultiGzDecoder::new(self.stream.rewound());
        let result = copy_entry(0, &mut decoder, callback);
        callback.set_operation_result(0, result);
        Ok(())
    }
}

/// bzip2 single-stream handler
pub struct Bzip2Handler {
    stream: SeekableStream,
    entries: Vec<ArchiveEntryMeta>,
}

impl Bzip2Handler {
    pub fn open(stream: SeekableStream) -> Result<Self> {
        let mut magic = [0u8; 3];
        if stream.read_head(&mut magic)? < 3 || &magic != b"BZh" {
            return Err(UnpackError::archive_error("Invalid bzip2 header", None));
        }
        let entry = ArchiveEntryMeta {
            index: 0,
            packed_size: Some(stream.len()),
            ..Default::default()
        };
        Ok(Self {
            stream,
            entries: vec![entry],
        })
    }
}

impl ArchiveHandler for Bzip2Handler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Bzip2
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        if !indices.contains(&0) {
            return Ok(());
        }
        if callback.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }
        let mut decoder = MultiBzDecoder::new(self.stream.rewound());
        let result = copy_entry(0, &mut decoder, callback);
        callback.set_operation_result(0, result);
        Ok(())
    }
}
