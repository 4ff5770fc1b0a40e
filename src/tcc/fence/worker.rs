//! Fence Clean Worker
//!
//! Background worker that prunes terminal fence records past retention.
//! Non-terminal rows are never touched: they still guard live branches.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

use super::TccFenceHandler;
use crate::tcc::error::FenceError;

/// Configuration for the clean worker
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    /// How often to run a clean pass
    pub clean_interval: Duration,
    /// How long terminal records are kept
    pub retention: Duration,
    /// Maximum rows deleted per batch
    pub batch_size: usize,
}

impl Default for CleanerConfig {
    fn default() -> Self {
        Self {
            clean_interval: Duration::from_secs(3600),
            retention: Duration::from_secs(24 * 3600),
            batch_size: 1000,
        }
    }
}

pub struct FenceCleanWorker {
    fence: Arc<TccFenceHandler>,
    config: CleanerConfig,
}

impl FenceCleanWorker {
    pub fn new(fence: Arc<TccFenceHandler>, config: CleanerConfig) -> Self {
        Self { fence, config }
    }

    pub fn with_defaults(fence: Arc<TccFenceHandler>) -> Self {
        Self::new(fence, CleanerConfig::default())
    }

    /// Run the clean loop forever
    pub async fn run(&self) -> ! {
        info!(
            clean_interval_secs = self.config.clean_interval.as_secs(),
            retention_secs = self.config.retention.as_secs(),
            store = self.fence.store().name(),
            "Starting fence clean worker"
        );

        loop {
            if let Err(e) = self.clean_once().await {
                error!(error = %e, "Fence clean pass failed");
            }

            tokio::time::sleep(self.config.clean_interval).await;
        }
    }

    /// Delete expired records batch by batch until a short batch comes back
    pub async fn clean_once(&self) -> Result<u64, FenceError> {
        let retention = chrono::Duration::from_std(self.config.retention)
            .map_err(|e| FenceError::Store(format!("invalid retention: {}", e)))?;
        let cutoff = chrono::Utc::now() - retention;
        let batch_size = self.config.batch_size.max(1);

        let mut total = 0u64;
        loop {
            let deleted = self
                .fence
                .clean_before(cutoff, batch_size)
                .await?;
            total += deleted;
            if deleted < batch_size as u64 {
                break;
            }
        }

        if total > 0 {
            info!(count = total, cutoff = %cutoff, "Pruned fence records");
        } else {
            debug!("No expired fence records");
        }

        Ok(total)
    }
}
