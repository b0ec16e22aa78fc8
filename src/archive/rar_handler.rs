use crate::archive::archive_handler::{
    fail_remaining, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, ExtractCallback,
    OperationResult,
};
use crate::archive::stream_adapter::SeekableStream;
use crate::error::{Result, UnpackError};
use std::collections::HashSet;
use std::io::{self, Write};
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use unrar::error::{Code, UnrarError};
use unrar::Archive;

/**
 * RAR文件处理器（需要 `rar` feature）
 *
 * unrar 只接受文件路径，因此先把流落地到临时文件，临时文件随处理器一起释放。
 */
pub struct RarHandler {
    spool: NamedTempFile,
    password: Option<String>,
    entries: Vec<ArchiveEntryMeta>,
}

fn is_password_error(err: &UnrarError) -> bool {
    matches!(err.code, Code::MissingPassword | Code::BadPassword)
}

fn classify_error(err: &UnrarError) -> OperationResult {
    match err.code {
        Code::MissingPassword | Code::BadPassword => OperationResult::WrongPassword,
        Code::EOpen | Code::ECreate | Code::EClose | Code::ERead | Code::EWrite => {
            OperationResult::IoError
        }
        _ => OperationResult::DataError,
    }
}

fn map_rar_error(err: UnrarError) -> UnpackError {
    if is_password_error(&err) {
        UnpackError::PasswordRequired
    } else {
        UnpackError::archive_error(format!("RAR error: {}", err), None)
    }
}

impl RarHandler {
    pub fn open(stream: SeekableStream, password: Option<&str>) -> Result<Self> {
        let mut spool = NamedTempFile::new()?;
        io::copy(&mut stream.rewound(), spool.as_file_mut())?;
        spool.as_file_mut().flush()?;

        let mut handler = Self {
            spool,
            password: password.map(str::to_string),
            entries: Vec::new(),
        };

        let listing = handler.archive().open_for_listing().map_err(map_rar_error)?;
        let mut entries = Vec::new();
        for (index, header) in listing.enumerate() {
            let header = header.map_err(map_rar_error)?;
            let path = header.filename.to_string_lossy().into_owned();
            entries.push(ArchiveEntryMeta {
                index,
                raw_path: Some(path.as_bytes().to_vec()),
                path,
                size: Some(header.unpacked_size),
                packed_size: None,
                is_folder: header.is_directory(),
                encrypted: header.is_encrypted(),
                created: None,
                accessed: None,
                modified: None,
            });
        }
        debug!(entry_count = entries.len(), "RAR archive enumerated");

        handler.entries = entries;
        Ok(handler)
    }

    fn archive(&self) -> Archive<'_> {
        match &self.password {
            Some(password) => Archive::with_password(self.spool.path(), password.as_str()),
            None => Archive::new(self.spool.path()),
        }
    }
}

impl ArchiveHandler for RarHandler {
    fn format(&self) -> ArchiveFormat {
        ArchiveFormat::Rar
    }

    fn entries(&self) -> &[ArchiveEntryMeta] {
        &self.entries
    }

    fn extract(&mut self, indices: &[usize], callback: &mut dyn ExtractCallback) -> Result<()> {
        let wanted: HashSet<usize> = indices.iter().copied().collect();
        let mut handled = HashSet::with_capacity(wanted.len());
        let mut archive = self.archive().open_for_processing().map_err(map_rar_error)?;
        let mut index = 0usize;

        loop {
            let header = match archive.read_header() {
                Ok(Some(header)) => header,
                Ok(None) => break,
                Err(e) => {
                    warn!(entry_index = index, error = %e, "RAR stream ended early");
                    fail_remaining(indices, &handled, OperationResult::DataError, callback);
                    return Ok(());
                }
            };

            if !wanted.contains(&index) || header.entry().is_directory() {
                if wanted.contains(&index) {
                    callback.set_operation_result(index, OperationResult::Ok);
                    handled.insert(index);
                }
                archive = header.skip().map_err(map_rar_error)?;
                index += 1;
                continue;
            }
            if callback.is_cancelled() {
                return Err(UnpackError::Interrupted);
            }

            let (result, rest) = match header.read() {
                Ok((data, rest)) => {
                    let result = match callback.get_stream(index) {
                        Ok(Some(out)) => match out.write_all(&data) {
                            Ok(()) => OperationResult::Ok,
                            Err(e) => OperationResult::from_io_error(&e),
                        },
                        Ok(None) => OperationResult::Ok,
                        Err(_) => OperationResult::IoError,
                    };
                    (result, rest)
                }
                Err(e) => {
                    let result = classify_error(&e);
                    callback.set_operation_result(index, result);
                    handled.insert(index);
                    fail_remaining(indices, &handled, OperationResult::DataError, callback);
                    return Ok(());
                }
            };
            callback.set_operation_result(index, result);
            handled.insert(index);
            archive = rest;
            index += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unrar::error::When;

    fn error(code: Code) -> UnrarError {
        UnrarError { code, when: When::Process }
    }

    #[test]
    fn test_error_codes_map_to_results() {
        assert_eq!(classify_error(&error(Code::BadPassword)), OperationResult::WrongPassword);
        assert_eq!(classify_error(&error(Code::MissingPassword)), OperationResult::WrongPassword);
        assert_eq!(classify_error(&error(Code::ERead)), OperationResult::IoError);
        assert_eq!(classify_error(&error(Code::BadData)), OperationResult::DataError);
        assert!(matches!(
            map_rar_error(error(Code::MissingPassword)),
            UnpackError::PasswordRequired
        ));
    }
}
