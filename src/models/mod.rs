pub mod content_item;

// 重新导出核心类型
pub use content_item::{ContentItem, JobId};
