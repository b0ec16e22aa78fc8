//! 证据压缩包递归解包引擎
//!
//! 打开证据中的压缩包，在压缩炸弹、磁盘空间与加密策略的约束下解出内容，
//! 重建条目路径树并与 SQLite 目录库对账，对嵌套压缩包递归调度。
//!
//! ```no_run
//! use evidence_unpacker::{
//!     CatalogStore, EventBus, ExtractionOrchestrator, ExtractionService, UnpackConfig,
//! };
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # let roots: Vec<evidence_unpacker::ContentItem> = Vec::new();
//! # tokio_test::block_on(async {
//! let config = UnpackConfig::default();
//! let catalog = CatalogStore::open(Path::new("out/catalog.db"), &config.catalog).await?;
//! let orchestrator =
//!     ExtractionOrchestrator::new(&config, "out", catalog, Arc::new(EventBus::new()))?;
//! let service = ExtractionService::new(orchestrator, &config.service);
//! let report = service.run(roots, None).await;
//! println!("{} items added", report.total_added());
//! # Ok::<(), evidence_unpacker::UnpackError>(())
//! # });
//! ```

pub mod archive;
pub mod config;
pub mod error;
pub mod events;
pub mod models;
pub mod storage;
pub mod utils;

pub use archive::{
    DepthTracker, ExtractionOrchestrator, ExtractionService, JobReport, UnpackOutcome,
    UnpackStatus,
};
pub use config::UnpackConfig;
pub use error::{Result, UnpackError};
pub use events::{ArtifactSink, EventBus, MessageLevel, UnpackEvent};
pub use models::{ContentItem, JobId};
pub use storage::CatalogStore;
