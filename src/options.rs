use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bitflags::bitflags;

use crate::defaults::{self, ExecutionDefaults};
use crate::error::{Error, Result};

bitflags! {
    /// Flags altering copy behavior. Providers document which ones they honor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BulkCopyOptions: u32 {
        /// Preserve source identity values instead of letting the destination assign them.
        const KEEP_IDENTITY            = 0b0000_0001;
        /// Check constraints while data is being inserted.
        const CHECK_CONSTRAINTS        = 0b0000_0010;
        /// Take a table-level lock for the duration of each batch.
        const TABLE_LOCK               = 0b0000_0100;
        /// Preserve null values instead of substituting column defaults.
        const KEEP_NULLS               = 0b0000_1000;
        /// Fire insert triggers for the rows being inserted.
        const FIRE_TRIGGERS            = 0b0001_0000;
        /// Run each batch inside its own transaction.
        const USE_INTERNAL_TRANSACTION = 0b0010_0000;
    }
}

impl serde::Serialize for BulkCopyOptions {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        bitflags::serde::serialize(self, serializer)
    }
}

impl<'de> serde::Deserialize<'de> for BulkCopyOptions {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        bitflags::serde::deserialize(deserializer)
    }
}

/// Receives the running count of copied rows.
pub type ProgressCallback = Arc<dyn Fn(u64) + Send + Sync>;

/// Per-call override of [`ExecutionDefaults`]. Unset fields fall back to the
/// defaults snapshot taken when the insert starts.
#[derive(Clone, Default)]
pub struct BulkInsertOptions {
    pub batch_size: Option<usize>,
    pub bulk_copy_options: Option<BulkCopyOptions>,
    pub timeout_secs: Option<u64>,
    pub notify_after: Option<u64>,
    pub callback: Option<ProgressCallback>,
}

impl BulkInsertOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn bulk_copy_options(mut self, options: BulkCopyOptions) -> Self {
        self.bulk_copy_options = Some(options);
        self
    }

    pub fn timeout_secs(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = Some(timeout_secs);
        self
    }

    pub fn notify_after(mut self, notify_after: u64) -> Self {
        self.notify_after = Some(notify_after);
        self
    }

    pub fn callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }
}

impl fmt::Debug for BulkInsertOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkInsertOptions")
            .field("batch_size", &self.batch_size)
            .field("bulk_copy_options", &self.bulk_copy_options)
            .field("timeout_secs", &self.timeout_secs)
            .field("notify_after", &self.notify_after)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// Options a provider actually executes with.
#[derive(Clone)]
pub struct EffectiveOptions {
    pub batch_size: usize,
    pub bulk_copy_options: BulkCopyOptions,
    pub timeout: Option<Duration>,
    pub notify_after: u64,
    pub callback: Option<ProgressCallback>,
}

impl EffectiveOptions {
    /// Resolve against the current process-wide defaults.
    pub fn resolve(overrides: Option<&BulkInsertOptions>) -> Result<Self> {
        Self::resolve_with(&defaults::defaults(), overrides)
    }

    /// Resolve against an explicit defaults record.
    pub fn resolve_with(
        base: &ExecutionDefaults,
        overrides: Option<&BulkInsertOptions>,
    ) -> Result<Self> {
        let o = overrides.cloned().unwrap_or_default();
        let batch_size = o.batch_size.unwrap_or(base.batch_size);
        if batch_size == 0 {
            return Err(Error::InvalidOptions(
                "batch_size must be greater than zero".into(),
            ));
        }
        let timeout_secs = o.timeout_secs.unwrap_or(base.timeout_secs);
        Ok(Self {
            batch_size,
            bulk_copy_options: o.bulk_copy_options.unwrap_or(base.bulk_copy_options),
            timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
            notify_after: o.notify_after.unwrap_or(base.notify_after),
            callback: o.callback,
        })
    }

    pub fn has(&self, flag: BulkCopyOptions) -> bool {
        self.bulk_copy_options.contains(flag)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.map(|t| t.as_secs()).unwrap_or(0)
    }

    /// Deadline for a run started at `started`. `None` without a timeout, or
    /// when the timeout reaches past what `Instant` can represent.
    pub fn deadline(&self, started: Instant) -> Option<Instant> {
        self.timeout.and_then(|t| started.checked_add(t))
    }
}

/// Fires the progress callback each time the copied count crosses a multiple
/// of `notify_after`.
pub(crate) struct ProgressNotifier {
    every: u64,
    next: u64,
    callback: Option<ProgressCallback>,
}

impl ProgressNotifier {
    pub(crate) fn new(opts: &EffectiveOptions) -> Self {
        Self {
            every: opts.notify_after,
            next: opts.notify_after,
            callback: opts.callback.clone(),
        }
    }

    pub(crate) fn advance(&mut self, rows_copied: u64) {
        let Some(callback) = &self.callback else {
            return;
        };
        if self.every == 0 || rows_copied < self.next {
            return;
        }
        callback(rows_copied);
        while self.next <= rows_copied {
            self.next += self.every;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_overrides_fall_back_to_defaults() {
        let base = ExecutionDefaults::default();
        let opts = EffectiveOptions::resolve_with(&base, Some(&BulkInsertOptions::new().batch_size(50)))
            .unwrap();
        assert_eq!(opts.batch_size, 50);
        assert_eq!(opts.timeout, Some(Duration::from_secs(30)));
        assert_eq!(opts.notify_after, 1000);
        assert!(opts.bulk_copy_options.is_empty());
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let base = ExecutionDefaults {
            batch_size: 0,
            ..Default::default()
        };
        let err = EffectiveOptions::resolve_with(&base, None).err().unwrap();
        assert!(matches!(err, Error::InvalidOptions(_)));

        let err = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(&BulkInsertOptions::new().batch_size(0)),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::InvalidOptions(_)));
    }

    #[test]
    fn test_zero_timeout_means_none() {
        let opts = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(&BulkInsertOptions::new().timeout_secs(0)),
        )
        .unwrap();
        assert_eq!(opts.timeout, None);
        assert_eq!(opts.timeout_secs(), 0);
        assert_eq!(opts.deadline(Instant::now()), None);
    }

    #[test]
    fn test_unrepresentable_deadline_is_none() {
        let opts = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(&BulkInsertOptions::new().timeout_secs(u64::MAX)),
        )
        .unwrap();
        assert_eq!(opts.timeout_secs(), u64::MAX);
        assert_eq!(opts.deadline(Instant::now()), None);

        let started = Instant::now();
        let opts = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(&BulkInsertOptions::new().timeout_secs(30)),
        )
        .unwrap();
        assert_eq!(opts.deadline(started), Some(started + Duration::from_secs(30)));
    }

    #[test]
    fn test_notifier_fires_on_thresholds() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let opts = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(
                &BulkInsertOptions::new()
                    .notify_after(100)
                    .callback(move |n| sink.lock().unwrap().push(n)),
            ),
        )
        .unwrap();
        let mut notifier = ProgressNotifier::new(&opts);
        for copied in [40, 100, 150, 350, 399, 400] {
            notifier.advance(copied);
        }
        assert_eq!(*seen.lock().unwrap(), vec![100, 350, 400]);
    }

    #[test]
    fn test_notifier_disabled_with_zero() {
        let seen = Arc::new(Mutex::new(0u32));
        let sink = seen.clone();
        let opts = EffectiveOptions::resolve_with(
            &ExecutionDefaults::default(),
            Some(
                &BulkInsertOptions::new()
                    .notify_after(0)
                    .callback(move |_| *sink.lock().unwrap() += 1),
            ),
        )
        .unwrap();
        let mut notifier = ProgressNotifier::new(&opts);
        notifier.advance(10_000);
        assert_eq!(*seen.lock().unwrap(), 0);
    }

    #[test]
    fn test_flags_text_form_round_trips_through_toml() {
        #[derive(serde::Deserialize)]
        struct Wrapper {
            flags: BulkCopyOptions,
        }
        let w: Wrapper = toml::from_str(r#"flags = "KEEP_IDENTITY | TABLE_LOCK""#).unwrap();
        assert_eq!(w.flags, BulkCopyOptions::KEEP_IDENTITY | BulkCopyOptions::TABLE_LOCK);
    }
}
