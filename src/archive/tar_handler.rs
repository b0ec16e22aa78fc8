use crate::archive::archive_handler::{
    copy_entry, fail_remaining, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, ExtractCallback,
    OperationResult,
};
use crate::archive::stream_adapter::SeekableStream;
use crate::error::{Result, UnpackError};
use std::collections::HashSet;
use tar::{Archive, EntryType};
use tracing::{debug, warn};

/**
 * TAR文件处理器
 *
 * tar 没有中央目录：打开时完整扫描一遍头部，解压时从头再扫一遍，
 * 条目索引即头部出现的顺序。
 */
pub struct TarHandler {
    stream: SeekableStream,
    entries: Vec<ArchiveEntryMeta>,
}

impl TarHandler {
    pub fn open(stream: SeekableStream) -> Result<Self> {
        let mut archive = Archive::new(stream.rewound());
        let mut entries = Vec::new();

        let iter = archive.entries().map_err(|e| {
            UnpackError::archive_error(format!("Failed to read TAR headers: {}", e), None)
        })?;
        for (index, entry) in iter.enumerate() {
            let entry = entry.map_err(|e| {
                UnpackError::archive_error(format!("Corrupt TAR header {}: {}", index, e), None)
            })?;
            let header = entry.header();
            let entry_type = header.entry_type();
            let raw = entry.path_bytes().into_owned();
            let size = entry.size();

            if !matches!(
                entry_type,
                EntryType::Regular | EntryType::Continuous | EntryType::Directory
            ) {
                debug!(entry_index = index, ?entry_type, "Non-regular TAR entry kept as empty file");
            }

            entries.push(ArchiveEntryMeta {
                index,
                path: String::from_utf8_lossy(&raw).into_owned(),
                raw_path: Some(raw),
                size: Some(size),
                packed_size: Some(size),
                is_folder: entry_type.is_dir(),
                encrypted: false,
                created: None,
                accessed: None,
                modified: header.mtime().ok().map(|t| t as i64),
            });
        }
        debug!(entry_count = entries.len(), "TAR archive enumerated");

        Ok(Self { stream, entries })
    }
}

impl ArchiveHandler for TarHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Tar
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        let wanted: HashSet<usize> = indices.iter().copied().collect();
        let mut handled = HashSet::with_capacity(wanted.len());
        let mut archive = Archive::new(self.stream.rewound());

        let iter = archive.entries().map_err(|e| {
            UnpackError::archive_error(format!("Failed to read TAR headers: {}", e), None)
        })?;
        for (index, entry) in iter.enumerate() {
            if handled.len() == wanted.len() {
                break;
            }
            let mut entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(entry_index = index, error = %e, "TAR stream ended early");
                    fail_remaining(indices, &handled, OperationResult::DataError, callback);
                    return Ok(());
                }
            };
            if !wanted.contains(&index) {
                continue;
            }
            if callback.is_cancelled() {
                return Err(UnpackError::Interrupted);
            }

            let result = if entry.header().entry_type().is_dir() {
                OperationResult::Ok
            } else {
                copy_entry(index, &mut entry, callback)
            };
            callback.set_operation_result(index, result);
            handled.insert(index);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::{tar_bytes, RecordingCallback};

    #[test]
    fn test_enumerates_and_extracts() {
        let data = tar_bytes(&[
            ("logs/app.log", b"line one\n".as_slice()),
            ("logs/db.log", b"line two\n".as_slice()),
            ("notes.txt", b"n".as_slice()),
        ]);
        let mut handler = TarHandler::open(SeekableStream::from_bytes(data)).unwrap();

        let entries = handler.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].path, "logs/app.log");
        assert_eq!(entries[0].size, Some(9));
        assert_eq!(entries[0].modified, Some(1_600_000_000));

        let mut callback = RecordingCallback::default();
        handler.extract(&[1, 2], &mut callback).unwrap();
        assert_eq!(callback.outputs.get(&1).unwrap(), b"line two\n");
        assert_eq!(callback.outputs.get(&2).unwrap(), b"n");
        assert!(!callback.outputs.contains_key(&0));
    }

    #[test]
    fn test_repeated_extraction_uses_fresh_cursor() {
        let data = tar_bytes(&[("a", b"1".as_slice()), ("b", b"2".as_slice())]);
        let mut handler = TarHandler::open(SeekableStream::from_bytes(data)).unwrap();

        for _ in 0..2 {
            let mut callback = RecordingCallback::default();
            handler.extract(&[0, 1], &mut callback).unwrap();
            assert_eq!(callback.results.len(), 2);
        }
    }
}
