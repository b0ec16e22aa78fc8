//! Catalog persistence
//!
//! ```text
//! output_root/
//! ├── catalog.db                 # SQLite catalog (content_items)
//! └── bundle.zip_12/             # one directory per unpacked archive
//!     └── logs/app.log
//! ```

pub mod catalog_store;

pub use catalog_store::CatalogStore;
