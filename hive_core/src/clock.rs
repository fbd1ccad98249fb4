//! Simulation clock: simulated time advancing at a fixed ratio to wall time.

use hive_env::{ShutdownToken, WorldContext};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Wall-time interval between clock updates.
pub const CLOCK_TICK: Duration = Duration::from_millis(100);

/// Governs how long a world runs.
///
/// Simulated time is `real elapsed * time_scale`. When a duration is set and
/// simulated time reaches it, the clock cancels the world's token.
pub struct SimulationClock<Ctx: WorldContext> {
    context: Arc<Ctx>,
    time_scale: f64,
    duration: Option<Duration>,
    elapsed_micros: AtomicU64,
}

impl<Ctx: WorldContext> SimulationClock<Ctx> {
    pub fn new(context: Arc<Ctx>, time_scale: f64, duration: Option<Duration>) -> Self {
        Self {
            context,
            time_scale,
            duration,
            elapsed_micros: AtomicU64::new(0),
        }
    }

    pub fn time_scale(&self) -> f64 {
        self.time_scale
    }

    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Simulated time since `run` started.
    pub fn simulated_elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_micros.load(Ordering::Relaxed))
    }

    fn scaled(&self, real: Duration) -> Duration {
        Duration::try_from_secs_f64(real.as_secs_f64() * self.time_scale).unwrap_or(Duration::MAX)
    }

    /// Ticks until the duration is reached or the token is cancelled.
    ///
    /// Returns `true` when the clock itself ended the run.
    pub async fn run(&self, shutdown: ShutdownToken) -> bool {
        let start = self.context.now();
        debug!(time_scale = self.time_scale, duration = ?self.duration, "Clock started");

        loop {
            let simulated = self.scaled(self.context.now().saturating_sub(start));
            let micros = u64::try_from(simulated.as_micros()).unwrap_or(u64::MAX);
            self.elapsed_micros.store(micros, Ordering::Relaxed);

            if let Some(duration) = self.duration {
                if simulated >= duration {
                    info!(simulated_secs = simulated.as_secs_f64(), "Simulation duration reached");
                    shutdown.cancel();
                    return true;
                }
            }

            tokio::select! {
                _ = self.context.sleep(CLOCK_TICK) => {}
                _ = shutdown.cancelled() => return false,
            }
        }
    }
}
