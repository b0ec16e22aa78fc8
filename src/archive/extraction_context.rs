//! Per-call extraction state
//!
//! One [`ExtractionSession`] lives for a single `unpack` call. It carries the
//! running free-space estimate used by the disk guard and the flags that
//! drive the final report.

use tracing::{debug, warn};

/// Mutable state of one `unpack` call
#[derive(Debug, Clone)]
pub struct ExtractionSession {
    /// Remaining free bytes on the output volume, `None` when unknown
    free_space: Option<u64>,
    min_free_space: u64,
    pub has_encrypted: bool,
    /// Encrypted file entries skipped for lack of a password
    pub encrypted_skipped: usize,
    /// File entries seen during enumeration
    pub file_entries: usize,
    /// Entries rejected by the disk guard
    pub disk_skipped: usize,
    /// Any entry was skipped or failed; the call still completes
    pub partial_failure: bool,
}

impl ExtractionSession {
    pub fn new(free_space: Option<u64>, min_free_space: u64) -> Self {
        debug!(?free_space, min_free_space, "Starting extraction session");
        Self {
            free_space,
            min_free_space,
            has_encrypted: false,
            encrypted_skipped: 0,
            file_entries: 0,
            disk_skipped: 0,
            partial_failure: false,
        }
    }

    pub fn free_space(&self) -> Option<u64> {
        self.free_space
    }

    /// Disk guard: admit an entry of `size` bytes if the margin survives it
    ///
    /// Admitted sizes are subtracted from the estimate. Unknown free space or
    /// unknown entry size always admits.
    pub fn admit(&mut self, entry_index: usize, size: Option<u64>) -> bool {
        let (Some(free), Some(size)) = (self.free_space, size) else {
            return true;
        };
        if free < size || free - size < self.min_free_space {
            warn!(
                entry_index,
                size,
                free,
                margin = self.min_free_space,
                "Not enough disk space for entry, skipping"
            );
            self.disk_skipped += 1;
            self.partial_failure = true;
            return false;
        }
        self.free_space = Some(free - size);
        true
    }

    /// Record an encrypted entry skipped for lack of a password
    pub fn skip_encrypted(&mut self) {
        self.has_encrypted = true;
        self.encrypted_skipped += 1;
        self.partial_failure = true;
    }

    /// Entries the codec rejected for a wrong or missing password
    ///
    /// Formats without a per-entry encryption flag (7z) only reveal
    /// encryption this way.
    pub fn record_wrong_password(&mut self, count: usize) {
        if count == 0 {
            return;
        }
        self.has_encrypted = true;
        self.encrypted_skipped += count;
        self.partial_failure = true;
    }

    /// Every file entry was encrypted, so nothing but directories came out
    pub fn fully_encrypted(&self) -> bool {
        self.file_entries > 0 && self.encrypted_skipped >= self.file_entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;
    const GIB: u64 = 1024 * MIB;

    #[test]
    fn test_disk_guard_admits_then_rejects() {
        let mut session = ExtractionSession::new(Some(GIB + 200 * MIB), GIB);
        assert!(session.admit(0, Some(150 * MIB)));
        assert_eq!(session.free_space(), Some(GIB + 50 * MIB));
        assert!(!session.admit(1, Some(150 * MIB)));
        assert_eq!(session.free_space(), Some(GIB + 50 * MIB));
        assert!(session.partial_failure);
        assert_eq!(session.disk_skipped, 1);
    }

    #[test]
    fn test_small_entries_still_fit_after_rejection() {
        let mut session = ExtractionSession::new(Some(GIB + 200 * MIB), GIB);
        assert!(!session.admit(0, Some(300 * MIB)));
        assert!(session.admit(1, Some(10 * MIB)));
    }

    #[test]
    fn test_entry_larger_than_free_space() {
        let mut session = ExtractionSession::new(Some(100), 10);
        assert!(!session.admit(0, Some(101)));
    }

    #[test]
    fn test_unknown_values_always_admit() {
        let mut unknown_disk = ExtractionSession::new(None, GIB);
        assert!(unknown_disk.admit(0, Some(u64::MAX)));

        let mut unknown_size = ExtractionSession::new(Some(0), GIB);
        assert!(unknown_size.admit(0, None));
        assert!(!unknown_size.partial_failure);
    }

    #[test]
    fn test_encryption_flags() {
        let mut session = ExtractionSession::new(None, GIB);
        session.file_entries = 2;
        session.skip_encrypted();
        assert!(session.has_encrypted);
        assert!(!session.fully_encrypted());
        session.skip_encrypted();
        assert!(session.fully_encrypted());

        let empty = ExtractionSession::new(None, GIB);
        assert!(!empty.fully_encrypted());
    }
}
