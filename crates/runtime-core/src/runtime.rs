//! Tokio runtime owned by a job driver

use crate::{Error, ExecutorConfig, Result};
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::info;

/// Owns the Tokio runtime a synchronous driver blocks on
pub struct RuntimeManager {
    /// Taken out only in Drop
    runtime: Option<Runtime>,
}

impl RuntimeManager {
    /// Create a new runtime manager
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        if config.io_threads == 0 {
            return Err(Error::InvalidConfig {
                message: "io_threads must be at least 1".to_string(),
            });
        }

        let runtime = Builder::new_multi_thread()
            .worker_threads(config.io_threads)
            .enable_all()
            .thread_name("epoch-runtime-worker")
            .build()
            .map_err(|e| Error::Internal {
                message: format!("Failed to build Tokio runtime: {}", e),
            })?;

        info!(io_threads = config.io_threads, "Runtime manager started");
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    fn runtime(&self) -> &Runtime {
        // Only taken out in Drop
        self.runtime.as_ref().expect("Runtime should exist")
    }

    /// Block on a future until completion
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime().block_on(future)
    }
}

impl Drop for RuntimeManager {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_timeout(Duration::from_secs(5));
            info!("Runtime manager shut down");
        }
    }
}
