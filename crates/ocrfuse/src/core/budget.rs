//! Memory budget shared by all pages of a pipeline.
//!
//! Bitmaps are the dominant allocation of the pipeline: every page holds its raw
//! bitmap and one bitmap per preprocessing variant until its report is returned. The
//! budget bounds the total of those bitmaps across concurrently processed pages.
//!
//! # Accounting
//!
//! The budget is a semaphore counted in KiB. A page reserves the footprint of its
//! bitmaps through its [`PageArena`] in a single acquisition, so a page never holds
//! part of the budget while waiting for more and pages cannot deadlock each other. A
//! reservation larger than the whole budget is capped to the budget, which lets an
//! oversized page run alone instead of waiting forever.
//!
//! Dropping the arena returns everything it reserved.
//!
//! # Example
//!
//! ```rust
//! use ocrfuse::core::budget::{MemoryBudget, PageArena};
//! use tokio_util::sync::CancellationToken;
//!
//! # tokio_test::block_on(async {
//! let budget = MemoryBudget::from_megabytes(1);
//! let arena = PageArena::new(budget.clone());
//! arena
//!     .reserve(&[("raw", 512 * 1024)], &CancellationToken::new())
//!     .await
//!     .unwrap();
//! assert_eq!(budget.available_kib(), 512);
//! drop(arena);
//! assert_eq!(budget.available_kib(), 1024);
//! # });
//! ```

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{OcrFuseError, Result};

const KIB: usize = 1024;

/// Pipeline-wide memory budget in KiB units.
#[derive(Debug, Clone)]
pub struct MemoryBudget {
    semaphore: Arc<Semaphore>,
    total_kib: u32,
}

impl MemoryBudget {
    pub fn from_megabytes(megabytes: usize) -> Self {
        let total_kib = megabytes
            .saturating_mul(KIB)
            .clamp(1, (u32::MAX as usize).min(Semaphore::MAX_PERMITS)) as u32;
        Self {
            semaphore: Arc::new(Semaphore::new(total_kib as usize)),
            total_kib,
        }
    }

    pub fn total_kib(&self) -> u32 {
        self.total_kib
    }

    pub fn available_kib(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// KiB charged for `bytes`, rounded up and capped to the whole budget.
    pub fn charge_for(&self, bytes: usize) -> u32 {
        let kib = bytes.div_ceil(KIB).max(1);
        kib.min(self.total_kib as usize) as u32
    }

    async fn acquire(&self, kib: u32, cancel: &CancellationToken) -> Result<OwnedSemaphorePermit> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(OcrFuseError::Cancelled),
            permit = Arc::clone(&self.semaphore).acquire_many_owned(kib) => {
                permit.map_err(|_| OcrFuseError::Other("memory budget closed".to_string()))
            }
        }
    }
}

/// A granted share of the budget, returned when dropped.
#[derive(Debug)]
pub struct Reservation {
    labels: Vec<String>,
    kib: u32,
    _permit: OwnedSemaphorePermit,
}

impl Reservation {
    pub fn kib(&self) -> u32 {
        self.kib
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }
}

/// Page-scoped owner of budget reservations.
#[derive(Debug)]
pub struct PageArena {
    budget: MemoryBudget,
    reservations: Mutex<Vec<Reservation>>,
}

impl PageArena {
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            budget,
            reservations: Mutex::new(Vec::new()),
        }
    }

    /// Reserve the combined size of `items` (label, bytes) in one acquisition.
    ///
    /// Waits until the budget has room or `cancel` fires.
    pub async fn reserve(&self, items: &[(&str, usize)], cancel: &CancellationToken) -> Result<u32> {
        let bytes: usize = items.iter().map(|(_, b)| *b).fold(0, usize::saturating_add);
        let kib = self.budget.charge_for(bytes);
        let permit = self.budget.acquire(kib, cancel).await?;
        debug!(
            kib,
            items = items.len(),
            available_kib = self.budget.available_kib(),
            "Reserved page memory"
        );
        self.reservations.lock().push(Reservation {
            labels: items.iter().map(|(label, _)| label.to_string()).collect(),
            kib,
            _permit: permit,
        });
        Ok(kib)
    }

    pub fn reserved_kib(&self) -> u64 {
        self.reservations.lock().iter().map(|r| r.kib as u64).sum()
    }

    /// Labels of everything currently held, in reservation order.
    pub fn labels(&self) -> Vec<String> {
        self.reservations
            .lock()
            .iter()
            .flat_map(|r| r.labels().iter().cloned())
            .collect()
    }

    /// Return all reservations to the budget now.
    pub fn release(&self) {
        self.reservations.lock().clear();
    }
}
