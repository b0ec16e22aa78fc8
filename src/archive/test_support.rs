//! Shared fixtures for handler unit tests

use crate::archive::archive_handler::{ExtractCallback, OperationResult};
use sevenz_rust::nt_time::FileTime;
use sevenz_rust::{SeqReader, SevenZArchiveEntry, SevenZWriter, SourceReader};
use std::collections::BTreeMap;
use std::io::{self, Write};
use zip::write::SimpleFileOptions;

/// Modification time stamped on every entry by [`sevenz_bytes`]
pub const SEVENZ_MTIME: i64 = 1_700_000_000;

/// Collects every extracted entry in memory
#[derive(Default)]
pub struct RecordingCallback {
    pub outputs: BTreeMap<usize, Vec<u8>>,
    pub results: BTreeMap<usize, OperationResult>,
    cancel_after: Option<usize>,
}

impl RecordingCallback {
    /// Reports cancellation once `n` results have been recorded
    pub fn cancelling_after(n: usize) -> Self {
        Self {
            cancel_after: Some(n),
            ..Default::default()
        }
    }
}

impl ExtractCallback for RecordingCallback {
    fn get_stream(&mut self, index: usize) -> io::Result<Option<&mut dyn Write>> {
        Ok(Some(self.outputs.entry(index).or_default()))
    }

    fn set_operation_result(&mut self, index: usize, result: OperationResult) {
        self.results.insert(index, result);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel_after
            .map(|limit| self.results.len() >= limit)
            .unwrap_or(false)
    }
}

/// Build a zip in memory; names ending in `/` become directories
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(io::Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for (name, data) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}

/// Build a ustar archive in memory
pub fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_ustar();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_600_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

/// Build a LZMA2 7z in memory; `solid` packs every entry into one block
pub fn sevenz_bytes(entries: &[(&str, &[u8])], solid: bool) -> Vec<u8> {
    let entry = |name: &str| {
        let mut entry = SevenZArchiveEntry::new();
        entry.name = name.to_string();
        entry.has_stream = true;
        entry.has_last_modified_date = true;
        entry.last_modified_date = FileTime::from_unix_time(SEVENZ_MTIME).unwrap();
        entry
    };
    let mut writer = SevenZWriter::new(io::Cursor::new(Vec::new())).unwrap();
    if solid {
        let metas: Vec<_> = entries.iter().map(|(name, _)| entry(*name)).collect();
        let sources: Vec<_> = entries.iter().map(|(_, data)| SourceReader::new(*data)).collect();
        writer
            .push_archive_entries(metas, SeqReader::new(sources))
            .unwrap();
    } else {
        for (name, data) in entries {
            writer.push_archive_entry(entry(*name), Some(*data)).unwrap();
        }
    }
    writer.finish().unwrap().into_inner()
}
