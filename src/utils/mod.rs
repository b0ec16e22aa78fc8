//! 通用工具函数模块
//!
//! 提供路径清洗、文件名编码推断、MIME 嗅探、磁盘空间查询、
//! 作业取消与文件系统任务重试等通用工具。

pub mod cancellation_manager;
pub mod disk_space;
pub mod encoding;
pub mod mime;
pub mod path;
pub mod retry;

pub use cancellation_manager::{CancellationManager, JobCancellation};
pub use disk_space::{DiskSpaceMonitor, StaticDiskSpace, SysinfoDiskMonitor};
pub use encoding::{CharsetGuess, CharsetInferrer};
pub use mime::sniff_mime;
pub use path::{sanitize_component, split_path_tokens};
pub use retry::RetryingTaskExecutor;
