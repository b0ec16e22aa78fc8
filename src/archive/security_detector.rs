//! Security Detector for Archive Extraction
//!
//! Compression-ratio and nesting-depth checks that decide whether an
//! archive tree is treated as a zip bomb. Verdicts are control-flow
//! outcomes; the orchestrator turns them into artifacts and aborts.

use crate::archive::archive_handler::{ArchiveEntryMeta, ArchiveFormat};
use crate::config::GuardConfig;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Compression metrics for one entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompressionMetrics {
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    /// uncompressed / compressed
    pub compression_ratio: f64,
}

/// Types of security violations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationType {
    /// Compression ratio at or above the threshold
    ExcessiveCompressionRatio,
    /// Archive nested deeper than allowed
    DepthLimitExceeded,
}

/// Security violation detected during extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityViolation {
    pub violation_type: ViolationType,
    pub message: String,
    /// Path of the offending entry inside its archive
    pub entry_path: Option<String>,
    pub metrics: Option<CompressionMetrics>,
}

/// Outcome of the per-entry ratio check
#[derive(Debug, Clone, PartialEq)]
pub enum RatioVerdict {
    /// Item or format is exempt, or the entry is below the size threshold
    NotChecked,
    /// Large entry whose packed size is unknown or non-positive
    PackedSizeUnknown,
    Acceptable(CompressionMetrics),
    Excessive(SecurityViolation),
}

/// Security detector for archive extraction
#[derive(Debug, Clone)]
pub struct SecurityDetector {
    policy: GuardConfig,
}

impl Default for SecurityDetector {
    fn default() -> Self {
        Self::new(GuardConfig::default())
    }
}

impl SecurityDetector {
    pub fn new(policy: GuardConfig) -> Self {
        info!(
            max_depth = policy.max_depth,
            min_size = policy.ratio_check_min_size,
            max_ratio = policy.max_compression_ratio,
            "Initializing SecurityDetector"
        );
        Self { policy }
    }

    pub fn policy(&self) -> &GuardConfig {
        &self.policy
    }

    /// Calculate compression ratio for a file
    ///
    /// Handles edge cases:
    /// - Zero compressed size: returns f64::INFINITY
    /// - Zero uncompressed size: returns 0.0
    pub fn calculate_compression_ratio(&self, compressed_size: u64, uncompressed_size: u64) -> f64 {
        if uncompressed_size == 0 {
            0.0
        } else if compressed_size == 0 {
            f64::INFINITY
        } else {
            uncompressed_size as f64 / compressed_size as f64
        }
    }

    /// Ratio check for one entry of an open archive
    ///
    /// Unallocated items and single-stream formats are exempt: carved data
    /// reports garbage sizes and gzip/bzip2 carry no trustworthy size.
    pub fn check_entry(
        &self,
        entry: &ArchiveEntryMeta,
        format: ArchiveFormat,
        item_is_allocated: bool,
    ) -> RatioVerdict {
        if !item_is_allocated || format.is_single_stream() {
            return RatioVerdict::NotChecked;
        }
        let size = match entry.size {
            Some(size) if size >= self.policy.ratio_check_min_size => size,
            _ => return RatioVerdict::NotChecked,
        };
        let packed = match entry.packed_size {
            Some(packed) if packed > 0 => packed,
            _ => {
                debug!(
                    entry_index = entry.index,
                    path = %entry.path,
                    size,
                    "Packed size unavailable, skipping ratio check"
                );
                return RatioVerdict::PackedSizeUnknown;
            }
        };

        let metrics = CompressionMetrics {
            compressed_size: packed,
            uncompressed_size: size,
            compression_ratio: self.calculate_compression_ratio(packed, size),
        };
        if metrics.compression_ratio >= self.policy.max_compression_ratio {
            warn!(
                entry_index = entry.index,
                path = %entry.path,
                ratio = metrics.compression_ratio,
                threshold = self.policy.max_compression_ratio,
                "Excessive compression ratio detected"
            );
            let message = format!(
                "Compression ratio {:.1} of '{}' exceeds threshold {}",
                metrics.compression_ratio, entry.path, self.policy.max_compression_ratio
            );
            return RatioVerdict::Excessive(SecurityViolation {
                violation_type: ViolationType::ExcessiveCompressionRatio,
                message,
                entry_path: Some(entry.path.clone()),
                metrics: Some(metrics),
            });
        }
        RatioVerdict::Acceptable(metrics)
    }

    /// Depth check run before an archive is opened
    pub fn check_depth(&self, depth: u32) -> Option<SecurityViolation> {
        if depth < self.policy.max_depth {
            return None;
        }
        warn!(depth, max_depth = self.policy.max_depth, "Archive nesting too deep");
        Some(SecurityViolation {
            violation_type: ViolationType::DepthLimitExceeded,
            message: format!(
                "Archive nested {} levels deep (limit {})",
                depth, self.policy.max_depth
            ),
            entry_path: None,
            metrics: None,
        })
    }
}
