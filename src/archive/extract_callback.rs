/**
 * 解压回调：把解压出的字节写入预先创建的占位文件，并回填路径树节点
 *
 * 整个会话只持有一个可重新绑定的输出（RebindableSink），每个条目开始时
 * 重新打开对应文件，结束时刷新、关闭并统计字节数。
 */
use crate::archive::archive_handler::{ArchiveEntryMeta, ExtractCallback, OperationResult};
use crate::archive::unpacked_tree::{NodeId, UnpackedTree};
use crate::utils::mime::{sniff_mime, SNIFF_LEN};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bytes written to one entry
#[derive(Debug, Default)]
pub struct SinkSummary {
    pub written: u64,
    /// Leading bytes, at most [`SNIFF_LEN`]
    pub head: Vec<u8>,
}

/// One reusable output, re-pointed at a new file for every entry
#[derive(Debug, Default)]
pub struct RebindableSink {
    writer: Option<BufWriter<File>>,
    bound: Option<usize>,
    written: u64,
    head: Vec<u8>,
}

impl RebindableSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point the sink at `path` for entry `index`, truncating the file
    ///
    /// Anything still bound from the previous entry is flushed first.
    pub fn rebind(&mut self, index: usize, path: &Path) -> io::Result<()> {
        if self.bound.is_some() {
            self.finish()?;
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        self.writer = Some(BufWriter::new(file));
        self.bound = Some(index);
        self.written = 0;
        self.head.clear();
        Ok(())
    }

    pub fn bound_index(&self) -> Option<usize> {
        self.bound
    }

    /// Flush and release the current file
    pub fn finish(&mut self) -> io::Result<SinkSummary> {
        self.bound = None;
        let summary = SinkSummary {
            written: self.written,
            head: std::mem::take(&mut self.head),
        };
        self.written = 0;
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(summary)
    }
}

impl Write for RebindableSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "sink is not bound"))?;
        let n = writer.write(buf)?;
        if self.head.len() < SNIFF_LEN {
            let take = n.min(SNIFF_LEN - self.head.len());
            self.head.extend_from_slice(&buf[..take]);
        }
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }
}

/// Where one admitted entry goes
#[derive(Debug, Clone)]
pub struct EntryTarget {
    pub node: NodeId,
    pub path: PathBuf,
    pub is_folder: bool,
}

/// Callback owned by the blocking extraction task
///
/// Takes the tree by value so the whole extraction can run on a blocking
/// thread; hand it back with [`UnpackCallback::into_parts`].
pub struct UnpackCallback {
    tree: UnpackedTree,
    targets: HashMap<usize, EntryTarget>,
    entries: HashMap<usize, ArchiveEntryMeta>,
    sink: RebindableSink,
    cancel: CancellationToken,
    failed: usize,
    wrong_password: usize,
    /// Entries rejected for their password; never cataloged
    locked: Vec<NodeId>,
}

/// Outcome counters of one extraction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractTally {
    /// Entries reported with any non-OK result
    pub failed: usize,
    /// Of those, entries rejected for a wrong or missing password
    pub wrong_password: usize,
}

impl UnpackCallback {
    pub fn new(
        tree: UnpackedTree,
        targets: HashMap<usize, EntryTarget>,
        entries: HashMap<usize, ArchiveEntryMeta>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tree,
            targets,
            entries,
            sink: RebindableSink::new(),
            cancel,
            failed: 0,
            wrong_password: 0,
            locked: Vec::new(),
        }
    }

    pub fn into_parts(mut self) -> (UnpackedTree, ExtractTally) {
        if self.sink.bound_index().is_some() {
            if let Err(e) = self.sink.finish() {
                warn!(error = %e, "Failed to flush last extracted entry");
            }
        }
        for node in std::mem::take(&mut self.locked) {
            self.tree.detach(node);
        }
        let tally = ExtractTally {
            failed: self.failed,
            wrong_password: self.wrong_password,
        };
        (self.tree, tally)
    }

    fn stamp(&mut self, index: usize, summary: SinkSummary) {
        let Some(target) = self.targets.get(&index) else {
            return;
        };
        let meta = self.entries.get(&index);
        let node = self.tree.node_mut(target.node);
        node.created = meta.and_then(|m| m.created);
        node.accessed = meta.and_then(|m| m.accessed);
        node.modified = meta.and_then(|m| m.modified);
        if target.is_folder {
            node.is_file = false;
            node.size = 0;
            return;
        }
        node.is_file = true;
        node.size = summary.written;
        node.mime_type = Some(sniff_mime(&summary.head, &node.name));
    }
}

impl UnpackCallback {
    /// Forget a file entry the password did not open, placeholder included
    fn lock(&mut self, index: usize) {
        let Some(target) = self.targets.get(&index) else {
            return;
        };
        if target.is_folder {
            return;
        }
        if let Err(e) = std::fs::remove_file(&target.path) {
            debug!(entry_index = index, error = %e, "Could not remove placeholder of locked entry");
        }
        self.locked.push(target.node);
    }
}

impl ExtractCallback for UnpackCallback {
    fn get_stream(&mut self, index: usize) -> io::Result<Option<&mut dyn Write>> {
        let Some(target) = self.targets.get(&index) else {
            return Ok(None);
        };
        if target.is_folder {
            return Ok(None);
        }
        let path = target.path.clone();
        self.sink.rebind(index, &path)?;
        Ok(Some(&mut self.sink))
    }

    fn set_operation_result(&mut self, index: usize, result: OperationResult) {
        let summary = if self.sink.bound_index() == Some(index) {
            match self.sink.finish() {
                Ok(summary) => summary,
                Err(e) => {
                    warn!(entry_index = index, error = %e, "Failed to flush extracted entry");
                    self.failed += 1;
                    SinkSummary::default()
                }
            }
        } else {
            SinkSummary::default()
        };

        if !result.is_ok() {
            self.failed += 1;
            if result == OperationResult::WrongPassword {
                self.wrong_password += 1;
                self.lock(index);
            }
            warn!(
                entry_index = index,
                ?result,
                written = summary.written,
                "Entry extraction did not succeed"
            );
        } else {
            debug!(entry_index = index, written = summary.written, "Entry extracted");
        }
        self.stamp(index, summary);
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
