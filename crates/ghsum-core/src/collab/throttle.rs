//! Process-wide admission budget for summary generation.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::domain::ConfigError;

/// Counting budget bounding outstanding generator calls across every
/// pipeline and every batch that shares it.
///
/// Cloning shares the budget. It is independent of the repository budget: a
/// pipeline waiting here keeps its repository slot.
#[derive(Debug, Clone)]
pub struct GeneratorBudget {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl GeneratorBudget {
    pub fn new(capacity: usize) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::InvalidBudget {
                name: "max_concurrent_llm",
            });
        }
        Ok(Self {
            permits: Arc::new(Semaphore::new(capacity)),
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Wait for a slot. The semaphore is never closed, so `None` does not
    /// happen in practice.
    pub async fn acquire(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }
}
