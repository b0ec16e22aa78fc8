use crate::archive::archive_handler::{
    copy_entry, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, ExtractCallback, OperationResult,
};
use crate::archive::stream_adapter::SeekableStream;
use crate::error::{Result, UnpackError};
use chrono::NaiveDate;
use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

/**
 * ZIP文件处理器
 *
 * 元数据通过 `by_index_raw` 读取（不触发解密），名字同时保留解码后的文本和原始字节。
 */
pub struct ZipHandler {
    archive: ZipArchive<SeekableStream>,
    entries: Vec<ArchiveEntryMeta>,
    password: Option<String>,
}

impl ZipHandler {
    pub fn open(stream: SeekableStream, password: Option<&str>) -> Result<Self> {
        let mut archive = ZipArchive::new(stream).map_err(|e| {
            UnpackError::archive_error(format!("Failed to open ZIP archive: {}", e), None)
        })?;

        let mut entries = Vec::with_capacity(archive.len());
        for index in 0..archive.len() {
            let file = archive.by_index_raw(index).map_err(|e| {
                UnpackError::archive_error(
                    format!("Failed to read entry {} metadata: {}", index, e),
                    None,
                )
            })?;

            entries.push(ArchiveEntryMeta {
                index,
                path: file.name().to_string(),
                raw_path: Some(file.name_raw().to_vec()),
                size: Some(file.size()),
                packed_size: Some(file.compressed_size()),
                is_folder: file.is_dir(),
                encrypted: file.encrypted(),
                created: None,
                accessed: None,
                modified: file.last_modified().and_then(dos_time_to_unix),
            });
        }
        debug!(entry_count = entries.len(), "ZIP archive enumerated");

        Ok(Self {
            archive,
            entries,
            password: password.map(str::to_string),
        })
    }
}

fn dos_time_to_unix(time: zip::DateTime) -> Option<i64> {
    NaiveDate::from_ymd_opt(time.year() as i32, time.month() as u32, time.day() as u32)?
        .and_hms_opt(time.hour() as u32, time.minute() as u32, time.second() as u32)
        .map(|dt| dt.and_utc().timestamp())
}

fn classify_open_error(err: &ZipError) -> OperationResult {
    match err {
        ZipError::InvalidPassword => OperationResult::WrongPassword,
        ZipError::UnsupportedArchive(ZipError::PASSWORD_REQUIRED) => OperationResult::WrongPassword,
        ZipError::UnsupportedArchive(_) => OperationResult::UnsupportedMethod,
        ZipError::Io(e) => OperationResult::from_io_error(e),
        _ => OperationResult::DataError,
    }
}

impl ArchiveHandler for ZipHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Zip
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        for &index in indices {
            if callback.is_cancelled() {
                return Err(UnpackError::Interrupted);
            }
            let encrypted = self.entries.get(index).map(|e| e.encrypted).unwrap_or(false);

            let opened = match (&self.password, encrypted) {
                (Some(password), true) => {
                    self.archive.by_index_decrypt(index, password.as_bytes())
                }
                _ => self.archive.by_index(index),
            };
            let result = match opened {
                Ok(mut file) => copy_entry(index, &mut file, callback),
                Err(e) => {
                    debug!(entry_index = index, error = %e, "Failed to open ZIP entry");
                    classify_open_error(&e)
                }
            };
            callback.set_operation_result(index, result);
        }
        Ok(())
    }
}
