use crate::archive::archive_handler::{
    copy_entry, fail_remaining, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, ExtractCallback,
    OperationResult,
};
use crate::archive::stream_adapter::SeekableStream;
use crate::error::{Result, UnpackError};
use sevenz_rust::nt_time::FileTime;
use sevenz_rust::{Archive, Error as SevenZError, Password, SevenZMethod, SevenZReader};
use std::collections::HashSet;
use std::io;
use tracing::{debug, warn};

/**
 * 7z 文件处理器
 *
 * sevenz-rust 先按块（folder）顺序解码有数据流的条目，最后才是空条目；
 * 条目索引就是这个解码顺序。列举只读取头部，不解码数据。
 * 固实块内的条目共用一个解码流，没被选中的条目也必须读完。
 * 7z 名字以 UTF-16 存储，没有原始字节。
 */
pub struct SevenZHandler {
    stream: SeekableStream,
    password: Option<String>,
    entries: Vec<ArchiveEntryMeta>,
}

/// Map a codec error onto a per-entry result
pub(crate) fn classify_error(err: &SevenZError) -> OperationResult {
    match err {
        SevenZError::PasswordRequired | SevenZError::MaybeBadPassword(_) => {
            OperationResult::WrongPassword
        }
        SevenZError::ChecksumVerificationFailed => OperationResult::CrcError,
        SevenZError::UnsupportedCompressionMethod(_)
        | SevenZError::Unsupported(_)
        | SevenZError::ExternalUnsupported => OperationResult::UnsupportedMethod,
        SevenZError::Io(e, _) | SevenZError::FileOpen(e, _) => OperationResult::from_io_error(e),
        _ => OperationResult::DataError,
    }
}

fn map_open_error(err: SevenZError) -> UnpackError {
    match err {
        SevenZError::PasswordRequired | SevenZError::MaybeBadPassword(_) => {
            UnpackError::PasswordRequired
        }
        other => UnpackError::archive_error(format!("7z error: {}", other), None),
    }
}

/// File indices in the order `for_each_entries` visits them
fn decode_order(archive: &Archive) -> Vec<usize> {
    let map = &archive.stream_map;
    let mut order = Vec::with_capacity(archive.files.len());
    for (folder_index, folder) in archive.folders.iter().enumerate() {
        if let Some(&start) = map.folder_first_file_index.get(folder_index) {
            order.extend(start..start + folder.num_unpack_sub_streams);
        }
    }
    order.extend(
        (0..archive.files.len()).filter(|&i| matches!(map.file_folder_index.get(i), Some(None))),
    );
    order
}

/// Packed bytes of one block; every entry of a solid block shares it
fn folder_packed_size(archive: &Archive, folder_index: usize) -> Option<u64> {
    let first = *archive
        .stream_map
        .folder_first_pack_stream_index
        .get(folder_index)?;
    let count = archive.folders.get(folder_index)?.packed_streams.len();
    let total: u64 = archive.pack_sizes.get(first..first + count)?.iter().sum();
    (total > 0).then_some(total)
}

fn folder_is_encrypted(archive: &Archive, folder_index: usize) -> bool {
    archive.folders.get(folder_index).is_some_and(|folder| {
        folder
            .coders
            .iter()
            .any(|coder| coder.decompression_method_id() == SevenZMethod::ID_AES256SHA256)
    })
}

fn unix_time(present: bool, time: FileTime) -> Option<i64> {
    present.then(|| time.to_unix_time())
}

fn list_entries(archive: &Archive) -> Result<Vec<ArchiveEntryMeta>> {
    let order = decode_order(archive);
    let mut entries = Vec::with_capacity(order.len());
    for (index, file_index) in order.into_iter().enumerate() {
        let file = archive.files.get(file_index).ok_or_else(|| {
            UnpackError::archive_error("7z stream map points past the file list", None)
        })?;
        let folder = archive
            .stream_map
            .file_folder_index
            .get(file_index)
            .copied()
            .flatten()
            .filter(|_| file.has_stream);
        entries.push(ArchiveEntryMeta {
            index,
            path: file.name().to_string(),
            raw_path: None,
            size: Some(file.size()),
            packed_size: folder.and_then(|f| folder_packed_size(archive, f)),
            is_folder: file.is_directory(),
            encrypted: folder.is_some_and(|f| folder_is_encrypted(archive, f)),
            created: unix_time(file.has_creation_date, file.creation_date()),
            accessed: unix_time(file.has_access_date, file.access_date()),
            modified: unix_time(file.has_last_modified_date, file.last_modified_date()),
        });
    }
    Ok(entries)
}

impl SevenZHandler {
    pub fn open(stream: SeekableStream, password: Option<&str>) -> Result<Self> {
        let mut handler = Self {
            stream,
            password: password.map(str::to_string),
            entries: Vec::new(),
        };

        let reader = handler.reader()?;
        let entries = list_entries(reader.archive())?;
        debug!(
            entry_count = entries.len(),
            blocks = reader.archive().folders.len(),
            "7z archive enumerated"
        );

        handler.entries = entries;
        Ok(handler)
    }

    fn reader(&self) -> Result<SevenZReader<SeekableStream>> {
        let password = self
            .password
            .as_deref()
            .map(Password::from)
            .unwrap_or_else(Password::empty);
        let stream = self.stream.rewound();
        let len = stream.len();
        SevenZReader::new(stream, len, password).map_err(map_open_error)
    }
}

impl ArchiveHandler for SevenZHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::SevenZip
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        let wanted: HashSet<usize> = indices.iter().copied().collect();
        let mut handled = HashSet::with_capacity(wanted.len());
        let mut position = 0usize;
        let mut cancelled = false;

        let mut reader = self.reader()?;
        let outcome = reader.for_each_entries(|entry, data| {
            let index = position;
            position += 1;
            if cancelled {
                return Ok(false);
            }
            if !wanted.contains(&index) {
                // later entries of a solid block start where this one ends
                io::copy(data, &mut io::sink())?;
                return Ok(true);
            }
            if callback.is_cancelled() {
                cancelled = true;
                return Ok(false);
            }

            let result = if entry.is_directory() {
                OperationResult::Ok
            } else {
                copy_entry(index, data, callback)
            };
            callback.set_operation_result(index, result);
            handled.insert(index);
            Ok(true)
        });

        if cancelled {
            return Err(UnpackError::Interrupted);
        }
        if let Err(e) = outcome {
            warn!(error = %e, "7z extraction stopped early");
            fail_remaining(indices, &handled, classify_error(&e), callback);
        }
        Ok(())
    }
}
