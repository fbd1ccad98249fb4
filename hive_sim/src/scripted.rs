//! Deterministic offline reasoning service.
//!
//! Replaces the HTTP backend for `--offline` runs and tests. All choices
//! come from one seeded ChaCha8 RNG, so a seed fixes the sequence of
//! responses for a given sequence of prompts.

use async_trait::async_trait;
use hive_env::{ReasoningService, SwarmError};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

const VERBS: &[&str] = &[
    "reviews",
    "drafts",
    "negotiates",
    "presents",
    "schedules",
    "investigates",
    "reworks",
    "announces",
];

const OBJECTS: &[&str] = &[
    "the quarterly plan",
    "a budget proposal",
    "the open issues list",
    "a partnership offer",
    "the next milestone",
    "a policy change",
    "the latest feedback",
];

/// Seeded stand-in for an external reasoning backend.
pub struct ScriptedReasoner {
    seed: u64,
    rng: Mutex<ChaCha8Rng>,
    latency: Duration,
    failure_rate: f64,
    calls: AtomicU64,
}

impl ScriptedReasoner {
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            rng: Mutex::new(ChaCha8Rng::seed_from_u64(seed)),
            latency: Duration::ZERO,
            failure_rate: 0.0,
            calls: AtomicU64::new(0),
        }
    }

    /// Simulated response time per call.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fraction of calls that fail with a transient error. Clamped to
    /// `[0, 1]`; a non-finite rate means no failures.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_finite() { rate.clamp(0.0, 1.0) } else { 0.0 };
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Finds the acting agent in a prompt (`You are <id>.`).
fn speaker(prompt: &str) -> &str {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix("You are "))
        .map(|rest| rest.trim_end_matches('.'))
        .unwrap_or("someone")
}

#[async_trait]
impl ReasoningService for ScriptedReasoner {
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let (fails, verb, object) = {
            let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
            let fails = rng.gen_bool(self.failure_rate);
            let verb = VERBS.choose(&mut *rng).copied().unwrap_or("considers");
            let object = OBJECTS.choose(&mut *rng).copied().unwrap_or("the situation");
            (fails, verb, object)
        };

        if fails {
            return Err(SwarmError::service(format!("scripted failure on call {}", call)));
        }
        Ok(format!("{} {} {}.", speaker(prompt), verb, object))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_seed_same_responses() {
        let a = ScriptedReasoner::new(7);
        let b = ScriptedReasoner::new(7);
        for _ in 0..5 {
            assert_eq!(
                a.complete("You are ada.").await.unwrap(),
                b.complete("You are ada.").await.unwrap()
            );
        }
        assert_eq!(a.calls(), 5);
    }

    #[tokio::test]
    async fn test_response_names_speaker() {
        let reasoner = ScriptedReasoner::new(1);
        let response = reasoner
            .complete("system text\n\nYou are grace.\nRole: engineer")
            .await
            .unwrap();
        assert!(response.starts_with("grace "));
        assert!(response.ends_with('.'));
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let reasoner = ScriptedReasoner::new(3).with_failure_rate(1.0);
        let err = reasoner.complete("You are x.").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_non_finite_failure_rate_never_fails() {
        for rate in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            let reasoner = ScriptedReasoner::new(3).with_failure_rate(rate);
            assert!(reasoner.complete("You are x.").await.is_ok());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_is_simulated() {
        let reasoner = ScriptedReasoner::new(3).with_latency(Duration::from_secs(2));
        let start = tokio::time::Instant::now();
        reasoner.complete("You are x.").await.unwrap();
        assert!(start.elapsed() >= Duration::from_secs(2));
    }
}
