use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bsj_common::{BsjError, Result};

/// Working-storage accounting shared by every spill writer of a pipeline.
///
/// Bytes are charged as they are written and released when a spill file is
/// deleted. With a limit set, a charge that would exceed it fails with
/// [`BsjError::StorageExhausted`].
#[derive(Debug, Clone, Default)]
pub struct SpillBudget {
    inner: Arc<BudgetInner>,
}

#[derive(Debug, Default)]
struct BudgetInner {
    limit: Option<u64>,
    used: AtomicU64,
    peak: AtomicU64,
}

impl SpillBudget {
    pub fn new(limit: Option<u64>) -> Self {
        Self {
            inner: Arc::new(BudgetInner {
                limit,
                used: AtomicU64::new(0),
                peak: AtomicU64::new(0),
            }),
        }
    }

    pub fn unlimited() -> Self {
        Self::new(None)
    }

    pub fn charge(&self, bytes: u64) -> Result<()> {
        let previous = self.inner.used.fetch_add(bytes, Ordering::SeqCst);
        let used = previous.saturating_add(bytes);
        if let Some(limit) = self.inner.limit {
            if used > limit {
                self.inner.used.fetch_sub(bytes, Ordering::SeqCst);
                return Err(BsjError::StorageExhausted(format!(
                    "spill budget of {limit} bytes exceeded ({previous} in use, {bytes} requested)"
                )));
            }
        }
        self.inner.peak.fetch_max(used, Ordering::SeqCst);
        Ok(())
    }

    pub fn release(&self, bytes: u64) {
        let _ = self
            .inner
            .used
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |used| {
                Some(used.saturating_sub(bytes))
            });
    }

    /// Deletes a spill file and releases its bytes. Missing files are ignored.
    pub fn remove_file(&self, path: &Path) -> Result<()> {
        let len = match fs::metadata(path) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(path)?;
        self.release(len);
        Ok(())
    }

    pub fn used(&self) -> u64 {
        self.inner.used.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> u64 {
        self.inner.peak.load(Ordering::SeqCst)
    }

    pub fn limit(&self) -> Option<u64> {
        self.inner.limit
    }
}
