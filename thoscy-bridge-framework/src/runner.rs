//! Bridge runner for lifecycle management.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use thoscy_common::{LoggingConfig, init_tracing};

use crate::BridgeArgs;
use crate::config::BridgeConfig;
use crate::error::{BridgeError, Result};

/// How long workers get to wind down after the shutdown signal.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Bridge runner that manages the lifecycle of a relay.
///
/// Handles:
/// - Logging initialization
/// - Task spawning and management
/// - Shutdown on Ctrl+C or SIGTERM, broadcast to workers over a
///   `watch` channel so they can stop at their next suspension point
///
/// # Example
///
/// ```ignore
/// use thoscy_bridge_framework::{BridgeConfig, BridgeRunner};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = MyRelayConfig::load("relay.json5")?;
///     let mut runner = BridgeRunner::new("relay", config)?;
///
///     let shutdown = runner.shutdown_signal();
///     runner.spawn(async move {
///         // Worker logic here, stopping when `shutdown` flips to true
///     });
///
///     runner.run().await
/// }
/// ```
pub struct BridgeRunner<C: BridgeConfig> {
    /// Bridge name for logging.
    name: String,
    /// Bridge version.
    version: String,
    /// The loaded configuration.
    config: C,
    /// Shutdown broadcast.
    shutdown_tx: watch::Sender<bool>,
    /// Spawned tasks.
    tasks: Vec<JoinHandle<()>>,
}

impl<C: BridgeConfig> BridgeRunner<C> {
    /// Create a new bridge runner, initializing logging from the config.
    pub fn new(name: impl Into<String>, config: C) -> Result<Self> {
        Self::new_with_args(name, config, None)
    }

    /// Create a new bridge runner with CLI args for log level override.
    pub fn new_with_args(
        name: impl Into<String>,
        config: C,
        args: Option<&BridgeArgs>,
    ) -> Result<Self> {
        let name = name.into();
        let version = env!("CARGO_PKG_VERSION").to_string();

        // Initialize logging with optional CLI override
        let log_config = match args.and_then(BridgeArgs::log_level_override) {
            Some(level) => LoggingConfig {
                level,
                format: config.logging().format,
            },
            None => config.logging().clone(),
        };

        init_tracing(&log_config).map_err(|e| BridgeError::config(e.to_string()))?;

        tracing::info!(bridge = %name, version = %version, "Starting bridge");

        Ok(Self::with_tracing_initialized(name, version, config))
    }

    /// Create a runner without touching the global tracing subscriber.
    pub fn without_tracing(name: impl Into<String>, config: C) -> Self {
        Self::with_tracing_initialized(name.into(), env!("CARGO_PKG_VERSION").to_string(), config)
    }

    fn with_tracing_initialized(name: String, version: String, config: C) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            name,
            version,
            config,
            shutdown_tx,
            tasks: Vec::new(),
        }
    }

    /// Get a reference to the configuration.
    pub fn config(&self) -> &C {
        &self.config
    }

    /// Get a receiver that flips to `true` when shutdown is requested.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Spawn a worker task.
    ///
    /// The task is awaited on shutdown and aborted if it overstays the grace period.
    pub fn spawn<F>(&mut self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future);
        self.tasks.push(handle);
    }

    /// Run the bridge until Ctrl+C / SIGTERM, or until every worker has exited.
    pub async fn run(self) -> Result<()> {
        self.run_until(wait_for_signal()).await
    }

    /// Run the bridge until `stop` completes, or until every worker has exited.
    ///
    /// This will:
    /// 1. Wait for `stop` or for all workers to finish
    /// 2. Broadcast the shutdown signal
    /// 3. Give workers a grace period, then abort the rest
    pub async fn run_until<F>(mut self, stop: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tracing::info!(
            bridge = %self.name,
            version = %self.version,
            tasks = self.tasks.len(),
            "Bridge running. Press Ctrl+C to stop."
        );

        let all_exited = tokio::select! {
            _ = stop => false,
            _ = futures::future::join_all(self.tasks.iter_mut()) => true,
        };

        if all_exited {
            tracing::warn!(bridge = %self.name, "All workers exited");
            return Err(BridgeError::worker("all workers exited"));
        }

        tracing::info!(bridge = %self.name, "Received shutdown signal");
        self.shutdown_tx.send_replace(true);

        // Handles already driven to completion must not be polled again
        for task in self.tasks.iter_mut().filter(|task| !task.is_finished()) {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut *task).await.is_err() {
                tracing::warn!(bridge = %self.name, "Worker did not stop in time, aborting");
                task.abort();
            }
        }

        tracing::info!(bridge = %self.name, "Goodbye!");

        Ok(())
    }
}

/// Wait for Ctrl+C, or SIGTERM on unix.
pub async fn wait_for_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                        }
                    }
                    _ = sigterm.recv() => {
                        tracing::info!("Received SIGTERM");
                    }
                }
                return;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
            }
        }
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
}

/// Await `future` unless shutdown is requested first.
///
/// Returns `None` when the shutdown signal fired (or its sender is gone).
pub async fn until_shutdown<F>(shutdown: &mut watch::Receiver<bool>, future: F) -> Option<F::Output>
where
    F: Future,
{
    if *shutdown.borrow() {
        return None;
    }
    tokio::select! {
        biased;
        _ = shutdown.wait_for(|stop| *stop) => None,
        output = future => Some(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Default, Deserialize)]
    struct TestConfig {
        #[serde(default)]
        logging: LoggingConfig,
    }

    impl BridgeConfig for TestConfig {
        fn logging(&self) -> &LoggingConfig {
            &self.logging
        }
    }

    #[tokio::test]
    async fn test_workers_see_shutdown() {
        let mut runner = BridgeRunner::without_tracing("test", TestConfig::default());
        let stopped = Arc::new(AtomicBool::new(false));

        let mut shutdown = runner.shutdown_signal();
        let flag = stopped.clone();
        runner.spawn(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
            flag.store(true, Ordering::SeqCst);
        });

        runner.run_until(async {}).await.unwrap();
        assert!(stopped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_all_workers_exited_is_an_error() {
        let mut runner = BridgeRunner::without_tracing("test", TestConfig::default());
        runner.spawn(async {});

        let result = runner.run_until(std::future::pending()).await;
        assert!(matches!(result, Err(BridgeError::Worker(_))));
    }

    #[tokio::test]
    async fn test_shutdown_after_early_worker_exit() {
        let mut runner = BridgeRunner::without_tracing("test", TestConfig::default());
        runner.spawn(async {});

        let mut shutdown = runner.shutdown_signal();
        runner.spawn(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        });

        let result = runner
            .run_until(tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_until_shutdown_interrupts() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move {
            until_shutdown(&mut rx, std::future::pending::<()>()).await
        });
        tx.send_replace(true);
        assert_eq!(waiter.await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_until_shutdown_passes_output() {
        let (_tx, mut rx) = watch::channel(false);
        assert_eq!(until_shutdown(&mut rx, async { 7 }).await, Some(7));
    }
}
