//! Nesting-depth and zip-bomb bookkeeping shared by every worker of a job
//!
//! One [`DepthTracker`] holds an [`ArchiveRecord`] per (job, content item).
//! Records are inserted atomically and never removed while the job runs.
//! All records under one root share a single zip-bomb flag, so flagging any
//! of them stops work on the whole tree.

use crate::models::JobId;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Depth record of one archive content item
#[derive(Debug)]
pub struct ArchiveRecord {
    pub item_id: i64,
    pub root_id: i64,
    /// 0 for the root evidence archive, +1 per nesting level
    pub depth: u32,
    zip_bomb: Arc<AtomicBool>,
    children: Mutex<Vec<i64>>,
}

impl ArchiveRecord {
    fn root(item_id: i64) -> Self {
        Self {
            item_id,
            root_id: item_id,
            depth: 0,
            zip_bomb: Arc::new(AtomicBool::new(false)),
            children: Mutex::new(Vec::new()),
        }
    }

    fn child_of(parent: &ArchiveRecord, item_id: i64) -> Self {
        Self {
            item_id,
            root_id: parent.root_id,
            depth: parent.depth + 1,
            zip_bomb: Arc::clone(&parent.zip_bomb),
            children: Mutex::new(Vec::new()),
        }
    }

    /// True once any record under the same root was flagged
    pub fn is_zip_bomb(&self) -> bool {
        self.zip_bomb.load(Ordering::Acquire)
    }

    /// Flag the root tree; returns true only for the call that set it
    pub fn flag_zip_bomb(&self) -> bool {
        !self.zip_bomb.swap(true, Ordering::AcqRel)
    }

    pub fn children(&self) -> Vec<i64> {
        self.children.lock().clone()
    }
}

/// Concurrent depth map keyed by (job, content item)
#[derive(Debug, Default)]
pub struct DepthTracker {
    records: DashMap<(JobId, i64), Arc<ArchiveRecord>>,
}

impl DepthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, job: JobId, item_id: i64) -> Option<Arc<ArchiveRecord>> {
        self.records.get(&(job, item_id)).map(|r| Arc::clone(r.value()))
    }

    /// Record for `item_id`, creating a depth-0 root when it is unknown
    pub fn get_or_insert_root(&self, job: JobId, item_id: i64) -> Arc<ArchiveRecord> {
        let record = self
            .records
            .entry((job, item_id))
            .or_insert_with(|| {
                debug!(%job, item_id, "Registering root archive");
                Arc::new(ArchiveRecord::root(item_id))
            });
        Arc::clone(record.value())
    }

    /// Register `child_id` one level below `parent`
    ///
    /// If the child is already known (two workers racing on the same item)
    /// the existing record wins and is returned unchanged.
    pub fn add_child(
        &self,
        job: JobId,
        parent: &ArchiveRecord,
        child_id: i64,
    ) -> Arc<ArchiveRecord> {
        let mut inserted = false;
        let record = {
            let entry = self.records.entry((job, child_id)).or_insert_with(|| {
                inserted = true;
                Arc::new(ArchiveRecord::child_of(parent, child_id))
            });
            Arc::clone(entry.value())
        };
        if inserted {
            parent.children.lock().push(child_id);
            debug!(
                %job,
                parent_id = parent.item_id,
                child_id,
                depth = record.depth,
                "Registered nested archive"
            );
        }
        record
    }

    /// Flag the root of `record`'s tree as a zip bomb
    pub fn flag_root(&self, job: JobId, record: &ArchiveRecord, reason: &str) {
        if record.flag_zip_bomb() {
            warn!(
                %job,
                item_id = record.item_id,
                root_id = record.root_id,
                depth = record.depth,
                reason,
                "Archive tree flagged as zip bomb"
            );
        }
    }

    /// Drop every record of a finished job; returns how many were removed
    pub fn clear_job(&self, job: JobId) -> usize {
        let before = self.records.len();
        self.records.retain(|(record_job, _), _| *record_job != job);
        before.saturating_sub(self.records.len())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
