//! In-memory tree mirroring the paths inside one archive
//!
//! Nodes live in an arena and refer to each other by [`NodeId`]. The root
//! node is the archive itself; every entry path is split into components
//! and intermediate directories are created on demand. Each node also gets
//! a sanitized on-disk path under the archive's output directory, which
//! never changes once assigned, even when the display name is later
//! corrected by charset inference.

use crate::utils::encoding::{decode_clean, CharsetInferrer};
use crate::utils::path::{sanitize_component, split_path_tokens, split_raw_tokens, synthesize_entry_path};
use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Index of a node in its tree's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

#[derive(Debug, Clone, PartialEq)]
pub struct UnpackedNode {
    pub name: String,
    /// Name bytes as stored in the archive, when they survived tokenization
    pub raw_name: Option<Vec<u8>>,
    /// Charset the name was recovered with
    pub name_encoding: Option<&'static str>,
    /// Path relative to the output root
    pub local_path: PathBuf,
    pub size: u64,
    pub created: Option<i64>,
    pub accessed: Option<i64>,
    pub modified: Option<i64>,
    pub is_file: bool,
    pub mime_type: Option<String>,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
}

impl UnpackedNode {
    fn new(name: String, raw_name: Option<Vec<u8>>, local_path: PathBuf, parent: Option<NodeId>) -> Self {
        Self {
            name,
            raw_name,
            name_encoding: None,
            local_path,
            size: 0,
            created: None,
            accessed: None,
            modified: None,
            is_file: false,
            mime_type: None,
            parent,
            children: Vec::new(),
        }
    }
}

/// Arena tree for one `unpack` call
#[derive(Debug)]
pub struct UnpackedTree {
    nodes: Vec<UnpackedNode>,
    output_root: PathBuf,
    /// (parent, name) -> child
    by_name: HashMap<(NodeId, String), NodeId>,
    /// (parent, sanitized local name) already in use
    local_names: HashSet<(NodeId, String)>,
}

impl UnpackedTree {
    pub const ROOT: NodeId = NodeId(0);

    /// Tree rooted at `archive_name`, unpacking into `output_root/output_dir`
    pub fn new(archive_name: &str, output_root: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        let root = UnpackedNode::new(archive_name.to_string(), None, output_dir.into(), None);
        Self {
            nodes: vec![root],
            output_root: output_root.into(),
            by_name: HashMap::new(),
            local_names: HashSet::new(),
        }
    }

    pub fn root(&self) -> &UnpackedNode {
        &self.nodes[0]
    }

    pub fn node(&self, id: NodeId) -> &UnpackedNode {
        &self.nodes[id.0]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut UnpackedNode {
        &mut self.nodes[id.0]
    }

    /// Number of nodes, the root included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() <= 1
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    pub fn absolute_path(&self, id: NodeId) -> PathBuf {
        self.output_root.join(&self.nodes[id.0].local_path)
    }

    /// Add an entry path, creating intermediate directories
    ///
    /// Returns `None` when the path has no usable component; the caller
    /// then places the entry under a synthesized path.
    pub fn add_node(&mut self, path: &str, raw: Option<&[u8]>) -> Option<NodeId> {
        let tokens = split_path_tokens(path);
        if tokens.is_empty() {
            return None;
        }

        let raw_tokens = raw.map(split_raw_tokens).and_then(|raw_tokens| {
            if raw_tokens.len() == tokens.len() {
                Some(raw_tokens)
            } else {
                debug!(
                    path,
                    tokens = tokens.len(),
                    raw_tokens = raw_tokens.len(),
                    "Raw name bytes do not line up with the decoded path, discarding them"
                );
                None
            }
        });

        let mut current = Self::ROOT;
        for (i, token) in tokens.iter().enumerate() {
            let raw_token = raw_tokens.as_ref().map(|raw| raw[i]);
            current = self.child_or_insert(current, token, raw_token);
        }
        Some(current)
    }

    /// Synthesize a deterministic, unused top-level path for a nameless entry
    pub fn synthesize_path(&self, entry_index: usize) -> String {
        let archive_name = self.root().name.clone();
        synthesize_entry_path(&archive_name, entry_index, |candidate| {
            self.find(candidate).is_some()
        })
    }

    /// Look up a node by its path below the root
    pub fn find(&self, path: &str) -> Option<NodeId> {
        let mut current = Self::ROOT;
        for token in split_path_tokens(path) {
            current = *self.by_name.get(&(current, token.to_string()))?;
        }
        if current == Self::ROOT {
            None
        } else {
            Some(current)
        }
    }

    fn child_or_insert(&mut self, parent: NodeId, name: &str, raw: Option<&[u8]>) -> NodeId {
        if let Some(existing) = self.by_name.get(&(parent, name.to_string())) {
            let existing = *existing;
            let node = &mut self.nodes[existing.0];
            if node.raw_name.is_none() {
                node.raw_name = raw.map(<[u8]>::to_vec);
            }
            return existing;
        }

        let local_name = self.unique_local_name(parent, name);
        let local_path = self.nodes[parent.0].local_path.join(&local_name);
        let id = NodeId(self.nodes.len());
        self.nodes.push(UnpackedNode::new(
            name.to_string(),
            raw.map(<[u8]>::to_vec),
            local_path,
            Some(parent),
        ));
        self.nodes[parent.0].children.push(id);
        self.by_name.insert((parent, name.to_string()), id);
        self.local_names.insert((parent, local_name));
        id
    }

    fn unique_local_name(&self, parent: NodeId, name: &str) -> String {
        let base = sanitize_component(name);
        if !self.local_names.contains(&(parent, base.clone())) {
            return base;
        }
        (1..)
            .map(|n| format!("{}~{}", base, n))
            .find(|candidate| !self.local_names.contains(&(parent, candidate.clone())))
            .unwrap_or(base)
    }

    /// Infer a charset per sibling group and rename the group when accepted
    ///
    /// Only display names change; local paths stay where they were
    /// materialized. Returns the number of renamed nodes.
    pub fn apply_charsets(&mut self, inferrer: &CharsetInferrer) -> usize {
        let mut renamed = 0;
        for parent in 0..self.nodes.len() {
            let group: Vec<NodeId> = self.nodes[parent]
                .children
                .iter()
                .copied()
                .filter(|child| self.nodes[child.0].raw_name.is_some())
                .collect();
            if group.is_empty() {
                continue;
            }

            let guess = {
                let names: Vec<&[u8]> = group
                    .iter()
                    .filter_map(|child| self.nodes[child.0].raw_name.as_deref())
                    .collect();
                inferrer.infer(&names)
            };
            let Some(guess) = guess else { continue };
            debug!(
                parent = %self.nodes[parent].name,
                charset = guess.name(),
                confidence = guess.confidence,
                siblings = group.len(),
                "Applying inferred charset to sibling group"
            );

            for child in group {
                let decoded = match self.nodes[child.0].raw_name.as_deref() {
                    Some(raw) => decode_clean(guess.encoding, raw),
                    None => None,
                };
                let Some(decoded) = decoded else { continue };
                if decoded.is_empty() || decoded.contains(['/', '\\']) {
                    warn!(raw_name = ?self.nodes[child.0].raw_name, "Decoded name is not a single component");
                    continue;
                }
                if guess.encoding != encoding_rs::UTF_8 {
                    self.nodes[child.0].name_encoding = Some(guess.name());
                }
                if decoded != self.nodes[child.0].name && self.rename(child, decoded) {
                    renamed += 1;
                }
            }
        }
        renamed
    }

    fn rename(&mut self, id: NodeId, new_name: String) -> bool {
        let Some(parent) = self.nodes[id.0].parent else {
            return false;
        };
        if self.by_name.contains_key(&(parent, new_name.clone())) {
            warn!(name = %new_name, "Recovered name collides with a sibling, keeping original");
            return false;
        }
        let old_name = std::mem::replace(&mut self.nodes[id.0].name, new_name.clone());
        self.by_name.remove(&(parent, old_name));
        self.by_name.insert((parent, new_name), id);
        true
    }

    /// Drop a leaf from the tree so it is neither renamed nor cataloged
    ///
    /// Its local name stays reserved. Returns `false` for the root or a node
    /// that still has children.
    pub fn detach(&mut self, id: NodeId) -> bool {
        if id == Self::ROOT || !self.nodes[id.0].children.is_empty() {
            return false;
        }
        let Some(parent) = self.nodes[id.0].parent.take() else {
            return false;
        };
        self.nodes[parent.0].children.retain(|child| *child != id);
        let name = self.nodes[id.0].name.clone();
        self.by_name.remove(&(parent, name));
        true
    }

    /// Every node below the root, parents before children
    pub fn top_down(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len().saturating_sub(1));
        let mut queue: VecDeque<NodeId> = self.root().children.iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            order.push(id);
            queue.extend(self.nodes[id.0].children.iter().copied());
        }
        order
    }

    /// Path of `id` below the root, components joined by `/`
    pub fn relative_name_path(&self, id: NodeId) -> String {
        let mut parts = Vec::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if node_id == Self::ROOT {
                break;
            }
            let node = &self.nodes[node_id.0];
            parts.push(node.name.as_str());
            current = node.parent;
        }
        parts.reverse();
        parts.join("/")
    }
}
