//! Extraction Orchestrator
//!
//! Runs one `unpack` call for one archive content item:
//!
//! ```text
//! START → DEDUPE-CHECK → (already processed)
//!                      → OPEN → ENUMERATE → EXTRACT → RECONCILE → REPORT
//! ```
//!
//! Cancellation and zip-bomb verdicts abort at the next entry boundary.
//! Every failure is turned into an [`UnpackOutcome`]; nothing escapes.

use crate::archive::archive_handler::{
    open_archive, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, CodecOptions,
};
use crate::archive::catalog_reconciler::{CatalogReconciler, ReconcileStats, StatusMap};
use crate::archive::depth_tracker::{ArchiveRecord, DepthTracker};
use crate::archive::extract_callback::{EntryTarget, UnpackCallback};
use crate::archive::extraction_context::ExtractionSession;
use crate::archive::security_detector::{RatioVerdict, SecurityDetector, SecurityViolation};
use crate::archive::stream_adapter::SeekableStream;
use crate::archive::unpacked_tree::UnpackedTree;
use crate::config::UnpackConfig;
use crate::error::{Result, UnpackError};
use crate::events::{ArtifactSink, MessageLevel, UnpackEvent};
use crate::models::{ContentItem, JobId};
use crate::storage::CatalogStore;
use crate::utils::disk_space::{DiskSpaceMonitor, SysinfoDiskMonitor};
use crate::utils::encoding::CharsetInferrer;
use crate::utils::path::sanitize_component;
use crate::utils::retry::RetryingTaskExecutor;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How an `unpack` call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnpackStatus {
    Completed,
    /// Children are cataloged and the output directory exists
    AlreadyProcessed,
    /// The archive tree was flagged; nothing more is done under its root
    ZipBomb,
    Cancelled,
    Failed,
}

/// Result of one `unpack` call
#[derive(Debug, Clone)]
pub struct UnpackOutcome {
    pub item_id: i64,
    pub status: UnpackStatus,
    pub stats: ReconcileStats,
    /// Cataloged children that are archives themselves
    pub nested_archives: Vec<ContentItem>,
    /// Some entries were skipped or failed
    pub partial_failure: bool,
    pub encrypted_entries: usize,
    pub error: Option<String>,
}

impl UnpackOutcome {
    fn new(item_id: i64, status: UnpackStatus) -> Self {
        Self {
            item_id,
            status,
            stats: ReconcileStats::default(),
            nested_archives: Vec::new(),
            partial_failure: false,
            encrypted_entries: 0,
            error: None,
        }
    }

    pub fn cancelled(item_id: i64) -> Self {
        Self::new(item_id, UnpackStatus::Cancelled)
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            UnpackStatus::Completed | UnpackStatus::AlreadyProcessed
        ) && !self.partial_failure
    }
}

/// Directory an archive item unpacks into, relative to the output root
pub fn output_dir_for(item: &ContentItem) -> PathBuf {
    PathBuf::from(format!("{}_{}", sanitize_component(&item.name), item.id))
}

/// Recursive-extraction driver for single archive items
pub struct ExtractionOrchestrator {
    catalog: CatalogStore,
    tracker: Arc<DepthTracker>,
    detector: SecurityDetector,
    executor: Arc<RetryingTaskExecutor>,
    disk: Arc<dyn DiskSpaceMonitor>,
    sink: Arc<dyn ArtifactSink>,
    charset: CharsetInferrer,
    output_root: PathBuf,
    min_free_space: u64,
    batch_limit: usize,
}

impl ExtractionOrchestrator {
    /// Build an orchestrator with a fresh depth tracker and the sysinfo
    /// disk monitor
    pub fn new(
        config: &UnpackConfig,
        output_root: impl Into<PathBuf>,
        catalog: CatalogStore,
        sink: Arc<dyn ArtifactSink>,
    ) -> Result<Self> {
        let output_root = output_root.into();
        info!(output_root = %output_root.display(), "Initializing ExtractionOrchestrator");
        Ok(Self {
            catalog,
            tracker: Arc::new(DepthTracker::new()),
            detector: SecurityDetector::new(config.guard.clone()),
            executor: Arc::new(RetryingTaskExecutor::new(&config.task_executor)?),
            disk: Arc::new(SysinfoDiskMonitor),
            sink,
            charset: CharsetInferrer::new(&config.charset),
            output_root,
            min_free_space: config.disk.min_free_space,
            batch_limit: config.catalog.batch_limit,
        })
    }

    pub fn with_disk_monitor(mut self, disk: Arc<dyn DiskSpaceMonitor>) -> Self {
        self.disk = disk;
        self
    }

    pub fn with_tracker(mut self, tracker: Arc<DepthTracker>) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn tracker(&self) -> &Arc<DepthTracker> {
        &self.tracker
    }

    pub fn catalog(&self) -> &CatalogStore {
        &self.catalog
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// Unpack one archive item and reconcile its contents with the catalog
    pub async fn unpack(
        &self,
        job: JobId,
        item: &ContentItem,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> UnpackOutcome {
        info!(%job, item_id = item.id, name = %item.name, "Unpacking archive");
        match self.run(job, item, password, cancel).await {
            Ok(outcome) => {
                info!(
                    %job,
                    item_id = item.id,
                    status = ?outcome.status,
                    added = outcome.stats.added,
                    updated = outcome.stats.updated,
                    partial_failure = outcome.partial_failure,
                    "Unpack finished"
                );
                outcome
            }
            Err(e) if e.is_interrupted() => {
                info!(%job, item_id = item.id, "Unpack cancelled");
                UnpackOutcome::new(item.id, UnpackStatus::Cancelled)
            }
            Err(e) => {
                error!(%job, item_id = item.id, error = %e, "Unpack failed");
                let mut outcome = UnpackOutcome::new(item.id, UnpackStatus::Failed);
                outcome.error = Some(e.to_string());
                outcome
            }
        }
    }

    async fn run(
        &self,
        job: JobId,
        item: &ContentItem,
        password: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<UnpackOutcome> {
        if cancel.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }

        let record = self.tracker.get_or_insert_root(job, item.id);
        if record.is_zip_bomb() {
            debug!(%job, item_id = item.id, root_id = record.root_id, "Root already flagged, skipping");
            return Ok(UnpackOutcome::new(item.id, UnpackStatus::ZipBomb));
        }
        if let Some(violation) = self.detector.check_depth(record.depth) {
            self.report_zip_bomb(job, item, &record, violation);
            return Ok(UnpackOutcome::new(item.id, UnpackStatus::ZipBomb));
        }

        // DEDUPE-CHECK
        let output_dir = output_dir_for(item);
        let output_abs = self.output_root.join(&output_dir);
        if self.catalog.has_children(item.id).await?
            && self.executor.exists(&output_abs, cancel).await?
        {
            info!(item_id = item.id, dir = %output_abs.display(), "Archive already unpacked");
            return Ok(UnpackOutcome::new(item.id, UnpackStatus::AlreadyProcessed));
        }
        let statuses = StatusMap::seed(&self.catalog, item).await?;

        // OPEN
        let mut handler = match self.open(item, password).await {
            Ok(handler) => handler,
            Err(UnpackError::PasswordRequired) => {
                warn!(item_id = item.id, "Archive cannot be listed without a password");
                self.report_encryption(item, true, 0);
                let mut outcome = UnpackOutcome::new(item.id, UnpackStatus::Completed);
                outcome.partial_failure = true;
                return Ok(outcome);
            }
            Err(e) => {
                self.codec_failure(item, &e);
                return Err(e);
            }
        };
        let format = handler.format();

        // ENUMERATE
        let entries: Vec<ArchiveEntryMeta> = handler.entries().to_vec();
        let mut session =
            ExtractionSession::new(self.disk.free_space(&self.output_root), self.min_free_space);
        let mut tree = UnpackedTree::new(&item.name, &self.output_root, &output_dir);
        let mut created_dirs = HashSet::new();
        self.ensure_dir(&output_abs, &mut created_dirs, cancel).await?;

        let mut targets = HashMap::with_capacity(entries.len());
        let mut metas = HashMap::with_capacity(entries.len());
        for entry in &entries {
            if cancel.is_cancelled() {
                return Err(UnpackError::Interrupted);
            }
            if record.is_zip_bomb() {
                info!(item_id = item.id, root_id = record.root_id, "Root flagged during enumeration, stopping");
                return Ok(UnpackOutcome::new(item.id, UnpackStatus::ZipBomb));
            }
            if let RatioVerdict::Excessive(violation) =
                self.detector.check_entry(entry, format, item.is_allocated)
            {
                self.report_zip_bomb(job, item, &record, violation);
                return Ok(UnpackOutcome::new(item.id, UnpackStatus::ZipBomb));
            }

            if !entry.is_folder {
                session.file_entries += 1;
            }
            if entry.encrypted && password.is_none() {
                debug!(entry_index = entry.index, path = %entry.path, "Skipping encrypted entry");
                session.skip_encrypted();
                continue;
            }
            if !entry.is_folder && !session.admit(entry.index, entry.size) {
                continue;
            }

            let node = match tree.add_node(&entry.path, entry.raw_path.as_deref()) {
                Some(node) => node,
                None => {
                    let synthesized = tree.synthesize_path(entry.index);
                    debug!(entry_index = entry.index, path = %synthesized, "Synthesized entry path");
                    match tree.add_node(&synthesized, None) {
                        Some(node) => node,
                        None => {
                            warn!(entry_index = entry.index, "No usable path for entry");
                            session.partial_failure = true;
                            continue;
                        }
                    }
                }
            };

            // placeholders go through the retrying executor
            let path = tree.absolute_path(node);
            if entry.is_folder {
                self.ensure_dir(&path, &mut created_dirs, cancel).await?;
            } else {
                if let Some(parent) = path.parent() {
                    self.ensure_dir(parent, &mut created_dirs, cancel).await?;
                }
                self.executor.create_empty_file(&path, cancel).await?;
                tree.node_mut(node).is_file = true;
            }
            targets.insert(
                entry.index,
                EntryTarget {
                    node,
                    path,
                    is_folder: entry.is_folder,
                },
            );
            metas.insert(entry.index, entry.clone());
        }

        // EXTRACT
        let mut indices: Vec<usize> = targets.keys().copied().collect();
        indices.sort_unstable();
        debug!(item_id = item.id, %format, admitted = indices.len(), total = entries.len(), "Extracting entries");
        let callback = UnpackCallback::new(tree, targets, metas, cancel.clone());
        let (extracted, callback) = tokio::task::spawn_blocking(move || {
            let mut callback = callback;
            let result = handler.extract(&indices, &mut callback);
            (result, callback)
        })
        .await?;
        let (mut tree, tally) = callback.into_parts();

        match extracted {
            Ok(()) => {}
            Err(e) if e.is_interrupted() => return Err(e),
            Err(e) => {
                // keep what was written and catalog it
                self.codec_failure(item, &e);
                session.partial_failure = true;
            }
        }
        if tally.failed > 0 {
            session.partial_failure = true;
        }
        session.record_wrong_password(tally.wrong_password);

        let renamed = tree.apply_charsets(&self.charset);
        if renamed > 0 {
            debug!(item_id = item.id, renamed, "Recovered entry names");
        }

        // RECONCILE
        if cancel.is_cancelled() {
            return Err(UnpackError::Interrupted);
        }
        if record.is_zip_bomb() {
            info!(item_id = item.id, root_id = record.root_id, "Root flagged during extraction, not cataloging");
            return Ok(UnpackOutcome::new(item.id, UnpackStatus::ZipBomb));
        }
        let reconciler = CatalogReconciler::new(&self.catalog, &self.tracker, self.batch_limit);
        let reconciled = reconciler
            .reconcile(job, &tree, item, &record, statuses)
            .await?;

        // REPORT
        if session.has_encrypted {
            self.report_encryption(item, session.fully_encrypted(), session.encrypted_skipped);
        }
        if !reconciled.changed.is_empty() {
            self.sink.publish(UnpackEvent::ContentAdded {
                item_id: item.id,
                items: reconciled.changed.clone(),
            });
        }

        Ok(UnpackOutcome {
            item_id: item.id,
            status: UnpackStatus::Completed,
            stats: reconciled.stats,
            nested_archives: reconciled.nested_archives,
            partial_failure: session.partial_failure,
            encrypted_entries: session.encrypted_skipped,
            error: None,
        })
    }

    async fn open(
        &self,
        item: &ContentItem,
        password: Option<&str>,
    ) -> Result<Box<dyn ArchiveHandler>> {
        let source = item.resolve_local_path(&self.output_root);
        let extension = item.extension();
        let options = CodecOptions::resolve(item.mime_type.as_deref(), extension.as_deref());
        let declared = item
            .mime_type
            .as_deref()
            .and_then(ArchiveFormat::from_mime)
            .or_else(|| extension.as_deref().and_then(ArchiveFormat::from_extension));
        let password = password.map(str::to_string);

        tokio::task::spawn_blocking(move || {
            let stream = SeekableStream::open_file(&source)
                .map_err(|e| UnpackError::archive_error(e.to_string(), Some(source.clone())))?;
            open_archive(stream, options, declared, password.as_deref())
        })
        .await?
    }

    async fn ensure_dir(
        &self,
        path: &Path,
        created: &mut HashSet<PathBuf>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if created.contains(path) {
            return Ok(());
        }
        if !self.executor.mkdirs(path, cancel).await? {
            return Err(UnpackError::archive_error(
                "output directory could not be created",
                Some(path.to_path_buf()),
            ));
        }
        created.insert(path.to_path_buf());
        Ok(())
    }

    /// Log a codec failure; allocated items also get a user-facing message
    fn codec_failure(&self, item: &ContentItem, err: &UnpackError) {
        error!(item_id = item.id, name = %item.name, error = %err, "Archive codec failure");
        if item.is_allocated {
            self.sink.publish(UnpackEvent::UserMessage {
                level: MessageLevel::Error,
                item_id: item.id,
                message: format!("Failed to unpack {}: {}", item.unique_path(), err),
            });
        }
    }

    fn report_zip_bomb(
        &self,
        job: JobId,
        item: &ContentItem,
        record: &ArchiveRecord,
        violation: SecurityViolation,
    ) {
        self.tracker.flag_root(job, record, &violation.message);
        self.sink.publish(UnpackEvent::ZipBombSuspected {
            job_id: job,
            item_id: item.id,
            root_id: record.root_id,
            archive_path: item.unique_path(),
            violation,
        });
    }

    fn report_encryption(&self, item: &ContentItem, fully_encrypted: bool, skipped_entries: usize) {
        let scope = if fully_encrypted { "fully" } else { "partially" };
        warn!(item_id = item.id, scope, skipped_entries, "Encrypted archive content skipped");
        self.sink.publish(UnpackEvent::EncryptionDetected {
            item_id: item.id,
            archive_path: item.unique_path(),
            fully_encrypted,
            skipped_entries,
        });
        self.sink.publish(UnpackEvent::UserMessage {
            level: MessageLevel::Warning,
            item_id: item.id,
            message: format!(
                "{} is {} encrypted; {} entries were not extracted",
                item.unique_path(),
                scope,
                skipped_entries
            ),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::test_support::zip_bytes;
    use crate::config::CatalogConfig;
    use crate::events::EventBus;
    use crate::utils::disk_space::StaticDiskSpace;
    use tempfile::TempDir;

    struct Fixture {
        orchestrator: ExtractionOrchestrator,
        bus: Arc<EventBus>,
        root: ContentItem,
        dir: TempDir,
    }

    async fn fixture(archive: &[u8], name: &str) -> Fixture {
        let dir = TempDir::new().unwrap();
        let evidence = dir.path().join(name);
        std::fs::write(&evidence, archive).unwrap();
        let catalog = CatalogStore::open(&dir.path().join("catalog.db"), &CatalogConfig::default())
            .await
            .unwrap();
        let root = catalog
            .add_root_item(&ContentItem {
                id: 0,
                root_id: 0,
                parent_id: None,
                name: name.to_string(),
                parent_path: "/".to_string(),
                local_path: evidence,
                size: archive.len() as u64,
                created: None,
                accessed: None,
                modified: None,
                is_file: true,
                is_allocated: true,
                mime_type: None,
                name_encoding: None,
            })
            .await
            .unwrap();

        let mut config = UnpackConfig::default();
        config.task_executor.attempt_delays_ms = vec![0, 1, 1, 1];
        let bus = Arc::new(EventBus::new());
        let orchestrator = ExtractionOrchestrator::new(
            &config,
            dir.path().join("out"),
            catalog,
            Arc::clone(&bus) as Arc<dyn ArtifactSink>,
        )
        .unwrap()
        .with_disk_monitor(Arc::new(StaticDiskSpace(None)));
        Fixture {
            orchestrator,
            bus,
            root,
            dir,
        }
    }

    #[tokio::test]
    async fn test_unpack_builds_tree_and_catalog() {
        let archive = zip_bytes(&[
            ("a/b/c.txt", b"ccc".as_slice()),
            ("a/b/d.txt", b"dddd".as_slice()),
            ("a/e.txt", b"e".as_slice()),
        ]);
        let fx = fixture(&archive, "bundle.zip").await;
        let cancel = CancellationToken::new();

        let outcome = fx.orchestrator.unpack(JobId::new(), &fx.root, None, &cancel).await;
        assert_eq!(outcome.status, UnpackStatus::Completed);
        assert!(outcome.is_success());
        assert_eq!(outcome.stats.added, 5);

        let out = fx.dir.path().join("out").join(output_dir_for(&fx.root));
        assert_eq!(std::fs::read(out.join("a/b/d.txt")).unwrap(), b"dddd");
        assert_eq!(fx.bus.get_stats().events_by_type.get("ContentAdded"), Some(&1));
    }

    #[tokio::test]
    async fn test_second_unpack_is_already_processed() {
        let archive = zip_bytes(&[("x.txt", b"x".as_slice())]);
        let fx = fixture(&archive, "again.zip").await;
        let cancel = CancellationToken::new();
        let job = JobId::new();

        fx.orchestrator.unpack(job, &fx.root, None, &cancel).await;
        let second = fx.orchestrator.unpack(job, &fx.root, None, &cancel).await;
        assert_eq!(second.status, UnpackStatus::AlreadyProcessed);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let archive = zip_bytes(&[("x.txt", b"x".as_slice())]);
        let fx = fixture(&archive, "cancel.zip").await;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = fx.orchestrator.unpack(JobId::new(), &fx.root, None, &cancel).await;
        assert_eq!(outcome.status, UnpackStatus::Cancelled);
        assert_eq!(fx.orchestrator.catalog().count_items().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_not_an_archive_fails_with_user_message() {
        let fx = fixture(b"just a text file", "notes.zip").await;
        let mut events = fx.bus.subscribe("test");
        let outcome = fx
            .orchestrator
            .unpack(JobId::new(), &fx.root, None, &CancellationToken::new())
            .await;

        assert_eq!(outcome.status, UnpackStatus::Failed);
        assert!(outcome.error.is_some());
        match events.try_recv().unwrap() {
            UnpackEvent::UserMessage { level, .. } => assert_eq!(level, MessageLevel::Error),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_depth_limit_flags_root() {
        let archive = zip_bytes(&[("x.txt", b"x".as_slice())]);
        let fx = fixture(&archive, "deep.zip").await;
        let job = JobId::new();
        let tracker = fx.orchestrator.tracker();

        // place the item four levels below a synthetic root
        let mut parent = tracker.get_or_insert_root(job, 10_000);
        for id in 10_001..10_004 {
            parent = tracker.add_child(job, &parent, id);
        }
        let record = tracker.add_child(job, &parent, fx.root.id);
        assert_eq!(record.depth, 4);

        let outcome = fx
            .orchestrator
            .unpack(job, &fx.root, None, &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, UnpackStatus::ZipBomb);
        assert!(tracker.get(job, 10_000).unwrap().is_zip_bomb());
        assert_eq!(fx.orchestrator.catalog().count_items().await.unwrap(), 1);
    }

    /// Flags the root the first time free space is queried, the way a
    /// sibling worker would after OPEN
    struct FlagOnQuery {
        tracker: Arc<DepthTracker>,
        job: JobId,
        root_id: i64,
    }

    impl DiskSpaceMonitor for FlagOnQuery {
        fn free_space(&self, _path: &Path) -> Option<u64> {
            if let Some(root) = self.tracker.get(self.job, self.root_id) {
                self.tracker.flag_root(self.job, &root, "nested bomb in sibling archive");
            }
            None
        }
    }

    #[tokio::test]
    async fn test_root_flagged_mid_run_admits_nothing() {
        let archive = zip_bytes(&[("a.txt", b"a".as_slice()), ("b/c.txt", b"c".as_slice())]);
        let Fixture { orchestrator, root, dir, .. } = fixture(&archive, "sibling.zip").await;
        let job = JobId::new();
        let tracker = Arc::new(DepthTracker::new());
        let orchestrator = orchestrator
            .with_tracker(Arc::clone(&tracker))
            .with_disk_monitor(Arc::new(FlagOnQuery {
                tracker: Arc::clone(&tracker),
                job,
                root_id: root.id,
            }));

        let outcome = orchestrator
            .unpack(job, &root, None, &CancellationToken::new())
            .await;
        assert_eq!(outcome.status, UnpackStatus::ZipBomb);
        assert!(tracker.get(job, root.id).unwrap().is_zip_bomb());
        assert_eq!(orchestrator.catalog().count_items().await.unwrap(), 1);

        let out = dir.path().join("out").join(output_dir_for(&root));
        let written = std::fs::read_dir(&out).map(|d| d.count()).unwrap_or(0);
        assert_eq!(written, 0, "no placeholder may be created");
    }

    #[test]
    fn test_output_dir_naming() {
        let item = ContentItem {
            id: 42,
            root_id: 1,
            parent_id: Some(1),
            name: "logs:2024.zip".to_string(),
            parent_path: "/".to_string(),
            local_path: PathBuf::from("x"),
            size: 0,
            created: None,
            accessed: None,
            modified: None,
            is_file: true,
            is_allocated: true,
            mime_type: None,
            name_encoding: None,
        };
        assert_eq!(output_dir_for(&item), PathBuf::from("logs_2024.zip_42"));
    }
}
