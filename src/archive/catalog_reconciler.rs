//! Catalog Reconciler
//!
//! Merges a freshly unpacked tree into the catalog. Each node is keyed by
//! `parent_path + name`; nodes unknown to the catalog are added, nodes the
//! catalog holds with a smaller size are updated, everything else is
//! skipped and its existing record reused as the parent for its children.
//! Writes share one transaction that is committed and restarted every
//! `batch_limit` operations.

use crate::archive::archive_handler::ArchiveFormat;
use crate::archive::depth_tracker::{ArchiveRecord, DepthTracker};
use crate::archive::unpacked_tree::{NodeId, UnpackedNode, UnpackedTree};
use crate::error::{Result, UnpackError};
use crate::models::{ContentItem, JobId};
use crate::storage::CatalogStore;
use crate::utils::mime::is_generic;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// State of one cataloged path relative to the tree being reconciled
#[derive(Debug, Clone, PartialEq)]
pub enum CatalogStatus {
    /// Cataloged before this call; not yet compared
    Exists(ContentItem),
    /// Cataloged with a smaller size; overwritten by this call
    Update(ContentItem),
    /// Cataloged and complete; left as is
    Skip(ContentItem),
}

impl CatalogStatus {
    pub fn item(&self) -> &ContentItem {
        match self {
            CatalogStatus::Exists(item) | CatalogStatus::Update(item) | CatalogStatus::Skip(item) => {
                item
            }
        }
    }

    /// Resolve an `Exists` entry against the freshly extracted node
    fn resolve(self, node: &UnpackedNode) -> Self {
        match self {
            CatalogStatus::Exists(item) if item.size < node.size => CatalogStatus::Update(item),
            CatalogStatus::Exists(item) => CatalogStatus::Skip(item),
            resolved => resolved,
        }
    }
}

/// Status of every cataloged descendant of one archive, keyed by unique path
#[derive(Debug, Default)]
pub struct StatusMap {
    entries: HashMap<String, CatalogStatus>,
}

impl StatusMap {
    /// Seed from the catalog's existing descendants of `archive`
    pub async fn seed(catalog: &CatalogStore, archive: &ContentItem) -> Result<Self> {
        let existing = catalog
            .find_children_by_parent_path(&archive.child_parent_path())
            .await?;
        debug!(item_id = archive.id, existing = existing.len(), "Seeded catalog status map");
        Ok(Self::from_items(existing))
    }

    pub fn from_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let entries = items
            .into_iter()
            .map(|item| (item.unique_path(), CatalogStatus::Exists(item)))
            .collect();
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, unique_path: &str) -> Option<&CatalogStatus> {
        self.entries.get(unique_path)
    }
}

/// Counters of one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileStats {
    pub added: usize,
    pub updated: usize,
    pub skipped: usize,
    /// Transactions committed, the final one included
    pub commits: usize,
}

impl ReconcileStats {
    pub fn writes(&self) -> usize {
        self.added + self.updated
    }
}

/// What a reconciliation produced
#[derive(Debug, Default)]
pub struct ReconcileOutcome {
    pub stats: ReconcileStats,
    /// Items added or updated, in tree order
    pub changed: Vec<ContentItem>,
    /// File items that are supported containers, registered one level deeper
    pub nested_archives: Vec<ContentItem>,
}

pub struct CatalogReconciler<'a> {
    catalog: &'a CatalogStore,
    tracker: &'a DepthTracker,
    batch_limit: usize,
}

impl<'a> CatalogReconciler<'a> {
    pub fn new(catalog: &'a CatalogStore, tracker: &'a DepthTracker, batch_limit: usize) -> Self {
        Self {
            catalog,
            tracker,
            batch_limit: batch_limit.max(1),
        }
    }

    /// Persist `tree` under `archive`, walking parents before children
    ///
    /// On failure the open transaction is rolled back; batches committed
    /// before the failure stay in the catalog.
    pub async fn reconcile(
        &self,
        job: JobId,
        tree: &UnpackedTree,
        archive: &ContentItem,
        record: &ArchiveRecord,
        mut statuses: StatusMap,
    ) -> Result<ReconcileOutcome> {
        let mut outcome = ReconcileOutcome::default();
        let mut tx = self.catalog.begin_transaction().await?;
        let mut pending = 0usize;
        let mut parents: HashMap<NodeId, ContentItem> = HashMap::new();
        parents.insert(UnpackedTree::ROOT, archive.clone());

        for id in tree.top_down() {
            let node = tree.node(id);
            let parent = node
                .parent
                .and_then(|p| parents.get(&p))
                .ok_or_else(|| UnpackError::internal_error(format!("node {} has no reconciled parent", node.name)))?;
            let unique_path = format!("{}{}", parent.child_parent_path(), node.name);

            let status = statuses.entries.remove(&unique_path).map(|s| s.resolve(node));
            let item = match status {
                None => {
                    let mut item = derived_item(archive, parent, node);
                    match CatalogStore::add_derived_file_tx(&mut tx, &item).await {
                        Ok(new_id) => item.id = new_id,
                        Err(e) => return Err(self.fail(tx, &unique_path, e).await),
                    }
                    pending += 1;
                    outcome.stats.added += 1;
                    outcome.changed.push(item.clone());
                    item
                }
                Some(CatalogStatus::Update(existing)) => {
                    let mime_type = if is_generic(existing.mime_type.as_deref()) {
                        node.mime_type.clone()
                    } else {
                        existing.mime_type.clone()
                    };
                    let item = ContentItem {
                        local_path: node.local_path.clone(),
                        size: node.size,
                        created: node.created,
                        accessed: node.accessed,
                        modified: node.modified,
                        is_file: node.is_file,
                        mime_type,
                        name_encoding: node.name_encoding.map(str::to_string),
                        ..existing
                    };
                    if let Err(e) = CatalogStore::update_derived_file_tx(&mut tx, &item).await {
                        return Err(self.fail(tx, &unique_path, e).await);
                    }
                    pending += 1;
                    outcome.stats.updated += 1;
                    outcome.changed.push(item.clone());
                    item
                }
                Some(CatalogStatus::Skip(existing)) | Some(CatalogStatus::Exists(existing)) => {
                    outcome.stats.skipped += 1;
                    existing
                }
            };

            if pending >= self.batch_limit {
                if let Err(e) = tx.commit().await {
                    error!(item_id = archive.id, error = %e, "Intermediate catalog commit failed");
                    return Err(e.into());
                }
                outcome.stats.commits += 1;
                debug!(item_id = archive.id, commits = outcome.stats.commits, "Committed catalog batch");
                pending = 0;
                tx = self.catalog.begin_transaction().await?;
            }

            if item.is_file && is_container(item.mime_type.as_deref(), &item) {
                self.tracker.add_child(job, record, item.id);
                outcome.nested_archives.push(item.clone());
            }
            parents.insert(id, item);
        }

        if let Err(e) = tx.commit().await {
            error!(item_id = archive.id, error = %e, "Final catalog commit failed");
            return Err(e.into());
        }
        outcome.stats.commits += 1;

        info!(
            item_id = archive.id,
            added = outcome.stats.added,
            updated = outcome.stats.updated,
            skipped = outcome.stats.skipped,
            commits = outcome.stats.commits,
            nested = outcome.nested_archives.len(),
            "Reconciled unpacked tree with catalog"
        );
        Ok(outcome)
    }

    async fn fail(
        &self,
        tx: sqlx::Transaction<'_, sqlx::Sqlite>,
        unique_path: &str,
        err: UnpackError,
    ) -> UnpackError {
        error!(path = unique_path, error = %err, "Catalog write failed, rolling back");
        if let Err(rollback) = tx.rollback().await {
            error!(error = %rollback, "Rollback failed");
        }
        err
    }
}

fn derived_item(archive: &ContentItem, parent: &ContentItem, node: &UnpackedNode) -> ContentItem {
    ContentItem {
        id: 0,
        root_id: archive.root_id,
        parent_id: Some(parent.id),
        name: node.name.clone(),
        parent_path: parent.child_parent_path(),
        local_path: node.local_path.clone(),
        size: node.size,
        created: node.created,
        accessed: node.accessed,
        modified: node.modified,
        is_file: node.is_file,
        is_allocated: archive.is_allocated,
        mime_type: node.mime_type.clone(),
        name_encoding: node.name_encoding.map(str::to_string),
    }
}

/// Supported container by MIME type, falling back to the extension for
/// generic types
fn is_container(mime_type: Option<&str>, item: &ContentItem) -> bool {
    match mime_type.and_then(ArchiveFormat::from_mime) {
        Some(_) => true,
        None if is_generic(mime_type) => item
            .extension()
            .and_then(|ext| ArchiveFormat::from_extension(&ext))
            .is_some(),
        None => false,
    }
}
