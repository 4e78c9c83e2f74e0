//! Bounded admission for collaborator calls
//!
//! Every recognition, generation and synthesis call from every connection goes
//! through one shared pool, so a slow provider can hold at most `size` slots.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use super::Stage;
use crate::config::PipelineConfig;
use crate::{Error, Result};

/// Time budget for each collaborator stage
#[derive(Debug, Clone, Copy)]
pub struct StageTimeouts {
    pub recognition: Duration,
    pub generation: Duration,
    pub synthesis: Duration,
}

impl StageTimeouts {
    const fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Recognizing => self.recognition,
            Stage::Generating => self.generation,
            // nothing external runs while idle or delivering
            Stage::Synthesizing | Stage::Idle | Stage::Delivering => self.synthesis,
        }
    }
}

impl From<&PipelineConfig> for StageTimeouts {
    fn from(config: &PipelineConfig) -> Self {
        Self {
            recognition: config.recognition_timeout,
            generation: config.generation_timeout,
            synthesis: config.synthesis_timeout,
        }
    }
}

/// Fixed-size worker pool shared across connections
#[derive(Debug, Clone)]
pub struct WorkerPool {
    permits: Arc<Semaphore>,
    size: usize,
    timeouts: StageTimeouts,
}

impl WorkerPool {
    #[must_use]
    pub fn new(size: usize, timeouts: StageTimeouts) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(size)),
            size,
            timeouts,
        }
    }

    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.worker_pool_size, StageTimeouts::from(config))
    }

    /// Run one collaborator call for `stage` inside the pool
    ///
    /// The stage budget covers both waiting for a slot and the call itself.
    ///
    /// # Errors
    ///
    /// Returns `Error::Timeout` when the budget is exceeded, otherwise the
    /// call's own error
    pub async fn run<T, F>(&self, stage: Stage, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let after = self.timeouts.for_stage(stage);
        let admitted = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| Error::Config("worker pool closed".to_string()))?;
            call.await
        };

        tokio::time::timeout(after, admitted).await.map_err(|_| {
            tracing::warn!(stage = ?stage, after = ?after, "collaborator call timed out");
            Error::Timeout { stage, after }
        })?
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Slots not currently held by a call
    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
