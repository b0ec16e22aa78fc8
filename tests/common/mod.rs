//! Shared fixtures for the integration tests
//!
//! Archives are built in memory with `zip`, `tar`, `flate2` and
//! `sevenz-rust`; the zip
//! patch helpers rewrite header fields in place to fake sizes and
//! encryption flags without producing large or really encrypted data.

#![allow(dead_code)]

use evidence_unpacker::archive::ExtractionOrchestrator;
use evidence_unpacker::config::UnpackConfig;
use evidence_unpacker::utils::{DiskSpaceMonitor, StaticDiskSpace};
use evidence_unpacker::{ArtifactSink, CatalogStore, ContentItem, EventBus, ExtractionService};
use flate2::write::GzEncoder;
use flate2::Compression;
use sevenz_rust::{SevenZArchiveEntry, SevenZWriter};
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tracing_subscriber::util::SubscriberInitExt;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

pub const MIB: u64 = 1024 * 1024;

/// Scoped fmt subscriber; set `RUST_LOG=evidence_unpacker=debug` to see output
pub fn init_tracing() -> tracing::subscriber::DefaultGuard {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .set_default()
}

pub const GIB: u64 = 1024 * MIB;

/// Stored (uncompressed) zip; names ending in `/` become directories
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
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

pub fn tar_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, data) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o644);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, name, *data).unwrap();
    }
    builder.into_inner().unwrap()
}

pub fn gzip_bytes(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).unwrap();
    encoder.finish().unwrap()
}

/// LZMA2 7z with one block per entry
pub fn sevenz_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = SevenZWriter::new(Cursor::new(Vec::new())).unwrap();
    for (name, data) in entries {
        let mut entry = SevenZArchiveEntry::new();
        entry.name = name.to_string();
        writer.push_archive_entry(entry, Some(*data)).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// One central-directory record of a zip built by [`zip_bytes`]
struct CentralRecord {
    offset: usize,
    local_offset: usize,
    name: String,
}

fn u16_at(bytes: &[u8], at: usize) -> usize {
    u16::from_le_bytes([bytes[at], bytes[at + 1]]) as usize
}

fn u32_at(bytes: &[u8], at: usize) -> usize {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]) as usize
}

fn central_records(bytes: &[u8]) -> Vec<CentralRecord> {
    let eocd = bytes
        .windows(4)
        .rposition(|w| w == b"PK\x05\x06")
        .expect("end of central directory");
    let count = u16_at(bytes, eocd + 10);
    let mut offset = u32_at(bytes, eocd + 16);
    let mut records = Vec::with_capacity(count);
    for _ in 0..count {
        assert_eq!(&bytes[offset..offset + 4], b"PK\x01\x02");
        let name_len = u16_at(bytes, offset + 28);
        let extra_len = u16_at(bytes, offset + 30);
        let comment_len = u16_at(bytes, offset + 32);
        records.push(CentralRecord {
            offset,
            local_offset: u32_at(bytes, offset + 42),
            name: String::from_utf8_lossy(&bytes[offset + 46..offset + 46 + name_len]).into_owned(),
        });
        offset += 46 + name_len + extra_len + comment_len;
    }
    records
}

/// Set the general-purpose encryption bit of the named entries
pub fn mark_encrypted(mut bytes: Vec<u8>, names: &[&str]) -> Vec<u8> {
    for record in central_records(&bytes) {
        if names.contains(&record.name.as_str()) {
            bytes[record.offset + 8] |= 0x01;
            bytes[record.local_offset + 6] |= 0x01;
        }
    }
    bytes
}

/// Overwrite the declared uncompressed size of the named entry
pub fn fake_uncompressed_size(mut bytes: Vec<u8>, name: &str, size: u32) -> Vec<u8> {
    for record in central_records(&bytes) {
        if record.name == name {
            bytes[record.offset + 24..record.offset + 28].copy_from_slice(&size.to_le_bytes());
            bytes[record.local_offset + 22..record.local_offset + 26]
                .copy_from_slice(&size.to_le_bytes());
        }
    }
    bytes
}

/// Temp workspace with a catalog, an event bus and an output root
pub struct Harness {
    pub dir: TempDir,
    pub catalog: CatalogStore,
    pub bus: Arc<EventBus>,
    pub config: UnpackConfig,
}

impl Harness {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = UnpackConfig::default();
        config.task_executor.attempt_delays_ms = vec![0, 1, 1];
        config.task_executor.attempt_timeout_ms = 5_000;
        let catalog = CatalogStore::open(&dir.path().join("catalog.db"), &config.catalog)
            .await
            .unwrap();
        Self {
            dir,
            catalog,
            bus: Arc::new(EventBus::new()),
            config,
        }
    }

    pub fn output_root(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    pub fn orchestrator(&self) -> ExtractionOrchestrator {
        self.orchestrator_with_disk(Arc::new(StaticDiskSpace(None)))
    }

    pub fn orchestrator_with_disk(&self, disk: Arc<dyn DiskSpaceMonitor>) -> ExtractionOrchestrator {
        ExtractionOrchestrator::new(
            &self.config,
            self.output_root(),
            self.catalog.clone(),
            Arc::clone(&self.bus) as Arc<dyn ArtifactSink>,
        )
        .unwrap()
        .with_disk_monitor(disk)
    }

    pub fn service(&self, max_concurrent: usize) -> ExtractionService {
        let mut service_config = self.config.service.clone();
        service_config.max_concurrent_items = max_concurrent;
        ExtractionService::new(self.orchestrator(), &service_config)
    }

    /// Write `data` as evidence and register it as a root item
    pub async fn add_root(&self, name: &str, data: &[u8]) -> ContentItem {
        self.add_root_with(name, data, true).await
    }

    pub async fn add_root_with(&self, name: &str, data: &[u8], is_allocated: bool) -> ContentItem {
        let evidence = self.dir.path().join("evidence");
        std::fs::create_dir_all(&evidence).unwrap();
        let path = evidence.join(name);
        std::fs::write(&path, data).unwrap();
        self.catalog
            .add_root_item(&ContentItem {
                id: 0,
                root_id: 0,
                parent_id: None,
                name: name.to_string(),
                parent_path: "/".to_string(),
                local_path: path,
                size: data.len() as u64,
                created: None,
                accessed: None,
                modified: None,
                is_file: true,
                is_allocated,
                mime_type: None,
                name_encoding: None,
            })
            .await
            .unwrap()
    }

    /// Every cataloged item below `item`, keyed by unique path
    pub async fn descendants(&self, item: &ContentItem) -> Vec<ContentItem> {
        let mut items = self
            .catalog
            .find_children_by_parent_path(&item.child_parent_path())
            .await
            .unwrap();
        items.sort_by(|a, b| a.unique_path().cmp(&b.unique_path()));
        items
    }

    pub fn read_local(&self, item: &ContentItem) -> Vec<u8> {
        std::fs::read(item.resolve_local_path(&self.output_root())).unwrap()
    }
}
