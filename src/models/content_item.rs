//! Content items: evidence files and the files derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Identity of one ingest job; depth records are scoped by it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A cataloged unit of evidence data
///
/// Root items are registered by the caller; derived items are produced by
/// extraction. `parent_path` always ends with `/` and `parent_path + name`
/// is the unique path used for reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: i64,
    /// Id of the root evidence item this item descends from
    pub root_id: i64,
    pub parent_id: Option<i64>,
    pub name: String,
    pub parent_path: String,
    /// Absolute for root items, relative to the output root for derived files
    pub local_path: PathBuf,
    pub size: u64,
    pub created: Option<i64>,
    pub accessed: Option<i64>,
    pub modified: Option<i64>,
    pub is_file: bool,
    /// False when the data was carved from unallocated space
    pub is_allocated: bool,
    pub mime_type: Option<String>,
    /// Charset the name was decoded with, when it was not plain UTF-8
    pub name_encoding: Option<String>,
}

impl ContentItem {
    pub fn unique_path(&self) -> String {
        format!("{}{}", self.parent_path, self.name)
    }

    /// Parent path that children of this item are cataloged under
    pub fn child_parent_path(&self) -> String {
        format!("{}/", self.unique_path())
    }

    /// Resolve the item's bytes on disk
    pub fn resolve_local_path(&self, output_root: &Path) -> PathBuf {
        output_root.join(&self.local_path)
    }

    pub fn extension(&self) -> Option<String> {
        Path::new(&self.name)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, parent_path: &str) -> ContentItem {
        ContentItem {
            id: 7,
            root_id: 7,
            parent_id: None,
            name: name.to_string(),
            parent_path: parent_path.to_string(),
            local_path: PathBuf::from("/evidence").join(name),
            size: 10,
            created: None,
            accessed: None,
            modified: None,
            is_file: true,
            is_allocated: true,
            mime_type: None,
            name_encoding: None,
        }
    }

    #[test]
    fn test_unique_and_child_paths() {
        let item = item("bundle.zip", "/img/");
        assert_eq!(item.unique_path(), "/img/bundle.zip");
        assert_eq!(item.child_parent_path(), "/img/bundle.zip/");
        assert_eq!(item.extension().as_deref(), Some("zip"));
    }

    #[test]
    fn test_absolute_local_path_ignores_output_root() {
        let item = item("bundle.zip", "/");
        assert_eq!(
            item.resolve_local_path(Path::new("/out")),
            PathBuf::from("/evidence/bundle.zip")
        );
    }

    #[test]
    fn test_job_ids_are_distinct() {
        assert_ne!(JobId::new(), JobId::new());
    }
}
