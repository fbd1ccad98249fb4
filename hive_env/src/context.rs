//! Core runtime context trait for Hive worlds.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;

/// The central interface for runtime interaction.
///
/// Agents, the world clock and the metrics updater never touch the async
/// runtime directly. They go through this trait so that a world can be
/// driven by real wall time in production and by paused, auto-advancing
/// time in tests.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and `tokio::spawn`
#[async_trait]
pub trait WorldContext: Send + Sync + 'static {
    /// Returns the monotonic time elapsed since context creation.
    ///
    /// The world clock derives simulated time from this value.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time, used for human-readable timestamps.
    fn system_time(&self) -> SystemTime;

    /// Suspends the calling unit for the given duration.
    ///
    /// Every explicit delay in an agent loop or the clock goes through
    /// here, so this is also a suspension point for cancellation checks.
    async fn sleep(&self, duration: Duration);

    /// Spawns a named concurrency unit onto the runtime.
    ///
    /// The returned handle lets the orchestrator join the unit with a
    /// grace deadline and abort it if the deadline passes.
    fn spawn<F>(&self, name: &str, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static;
}
