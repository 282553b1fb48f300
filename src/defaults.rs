//! Process-wide execution defaults read by providers when a bulk insert starts.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::options::BulkCopyOptions;

pub const DEFAULT_BATCH_SIZE: usize = 500;
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_NOTIFY_AFTER: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    /// Rows per batch. Zero is rejected when options are resolved.
    pub batch_size: usize,
    pub bulk_copy_options: BulkCopyOptions,
    /// Zero means no timeout.
    pub timeout_secs: u64,
    /// Rows between progress notifications. Zero disables them.
    pub notify_after: u64,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            bulk_copy_options: BulkCopyOptions::empty(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            notify_after: DEFAULT_NOTIFY_AFTER,
        }
    }
}

static DEFAULTS: Lazy<RwLock<ExecutionDefaults>> =
    Lazy::new(|| RwLock::new(ExecutionDefaults::default()));

/// Snapshot of the current defaults.
pub fn defaults() -> ExecutionDefaults {
    *DEFAULTS.read()
}

pub fn set_defaults(defaults: ExecutionDefaults) {
    *DEFAULTS.write() = defaults;
}

/// Mutate the defaults in place.
///
/// ```
/// bulkinsert::update_defaults(|d| d.batch_size = 2000);
/// ```
pub fn update_defaults<F>(f: F)
where
    F: FnOnce(&mut ExecutionDefaults),
{
    f(&mut DEFAULTS.write());
}

pub fn reset_defaults() {
    set_defaults(ExecutionDefaults::default());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_documented_defaults() {
        let d = ExecutionDefaults::default();
        assert_eq!(d.batch_size, 500);
        assert_eq!(d.timeout_secs, 30);
        assert_eq!(d.notify_after, 1000);
        assert!(d.bulk_copy_options.is_empty());
    }

    // The only unit test touching the global record, so no other test races it.
    #[test]
    fn test_update_and_reset_global_defaults() {
        update_defaults(|d| {
            d.batch_size = 2000;
            d.bulk_copy_options |= BulkCopyOptions::KEEP_IDENTITY;
        });
        let snapshot = defaults();
        assert_eq!(snapshot.batch_size, 2000);
        assert!(snapshot.bulk_copy_options.contains(BulkCopyOptions::KEEP_IDENTITY));

        reset_defaults();
        assert_eq!(defaults(), ExecutionDefaults::default());
    }
}
