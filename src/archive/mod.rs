/**
 * 压缩包递归解包模块
 *
 * 格式后端（ZIP、7z、TAR、GZ、BZ2、RAR）实现统一的 `ArchiveHandler`；
 * 编排器负责安全检查、路径树重建与目录库对账。
 */
pub mod archive_handler;
pub mod catalog_reconciler;
pub mod depth_tracker;
pub mod extract_callback;
pub mod extraction_context;
pub mod extraction_orchestrator;
pub mod extraction_service;
pub mod gz_handler;
#[cfg(feature = "rar")]
pub mod rar_handler;
pub mod security_detector;
pub mod sevenz_handler;
pub mod stream_adapter;
pub mod tar_handler;
pub mod unpacked_tree;
pub mod zip_handler;

#[cfg(test)]
mod test_support;


pub use archive_handler::{
    open_archive, ArchiveEntryMeta, ArchiveFormat, ArchiveHandler, CodecOptions,
    ExtractCallback, OperationResult,
};
pub use catalog_reconciler::{CatalogReconciler, CatalogStatus, ReconcileStats, StatusMap};
pub use depth_tracker::{ArchiveRecord, DepthTracker};
pub use extraction_orchestrator::{ExtractionOrchestrator, UnpackOutcome, UnpackStatus};
pub use extraction_service::{ExtractionService, JobProgress, JobReport};
pub use security_detector::{RatioVerdict, SecurityDetector, SecurityViolation, ViolationType};
pub use stream_adapter::SeekableStream;
pub use unpacked_tree::{NodeId, UnpackedNode, UnpackedTree};
