//! 磁盘剩余空间查询
//!
//! 解包前估算输出卷的可用空间；无法确定时返回 `None`，调用方据此跳过磁盘保护。

use std::path::Path;
use sysinfo::Disks;
use tracing::debug;

/// 可用空间来源
pub trait DiskSpaceMonitor: Send + Sync {
    /// Free bytes on the volume holding `path`, or `None` when unknown
    fn free_space(&self, path: &Path) -> Option<u64>;
}

/// 基于 sysinfo 的实现：取挂载点为目标路径最长前缀的磁盘
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDiskMonitor;

impl DiskSpaceMonitor for SysinfoDiskMonitor {
    fn free_space(&self, path: &Path) -> Option<u64> {
        let disks = Disks::new_with_refreshed_list();
        let target = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        let available = disks
            .list()
            .iter()
            .filter(|disk| target.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space());
        debug!(path = %target.display(), ?available, "Queried free disk space");
        available
    }
}

/// 固定值实现，用于测试和不可查询的存储
#[derive(Debug, Clone, Copy)]
pub struct StaticDiskSpace(pub Option<u64>);

impl DiskSpaceMonitor for StaticDiskSpace {
    fn free_space(&self, _path: &Path) -> Option<u64> {
        self.0
    }
}
