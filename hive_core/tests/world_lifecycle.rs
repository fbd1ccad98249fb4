//! End-to-end world lifecycle against the in-memory state.

use async_trait::async_trait;
use hive_core::cache::ResponseCache;
use hive_core::llm::{layered, RetryPolicy};
use hive_core::{World, WorldSettings, WorldStatus};
use hive_env::{Event, EventHandler, EventKind, ReasoningService, SwarmError, TokioContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct Monitor {
    events: Mutex<Vec<Event>>,
}

impl Monitor {
    fn of_kinds(&self, kinds: &[EventKind]) -> Vec<Event> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| kinds.contains(&e.kind))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventHandler for Monitor {
    async fn handle(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

#[derive(Default)]
struct Counting {
    calls: AtomicUsize,
}

#[async_trait]
impl ReasoningService for Counting {
    async fn complete(&self, prompt: &str) -> Result<String, SwarmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let who = prompt
            .lines()
            .find_map(|line| line.strip_prefix("You are "))
            .unwrap_or("someone");
        Ok(format!("{} files a report", who.trim_end_matches('.')))
    }
}

#[tokio::test]
async fn test_three_agents_spawn_then_act_in_order() {
    let world = World::builder("office", TokioContext::shared(), Arc::new(Counting::default()))
        .build()
        .await
        .unwrap();
    let monitor = Arc::new(Monitor::default());
    world.state().subscribe("monitor", monitor.clone()).await;

    let mut agents = Vec::new();
    for id in ["alice", "bob", "carol"] {
        agents.push(world.spawn_agent(id).await.unwrap());
    }

    let records = world.state().get_agents().await;
    assert_eq!(records.len(), 3);
    for record in records.values() {
        assert!(record.active);
        assert_eq!(record.status, "ready");
    }

    for agent in &agents {
        agent.step().await.unwrap();
    }

    let events = monitor.of_kinds(&[EventKind::AgentSpawned, EventKind::AgentAction]);
    let kinds: Vec<&EventKind> = events.iter().map(|e| &e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            &EventKind::AgentSpawned,
            &EventKind::AgentSpawned,
            &EventKind::AgentSpawned,
            &EventKind::AgentAction,
            &EventKind::AgentAction,
            &EventKind::AgentAction,
        ]
    );

    let sources: Vec<&str> = events[3..].iter().map(|e| e.source.as_str()).collect();
    assert_eq!(sources, vec!["alice", "bob", "carol"]);
    assert_eq!(events[3].data["action"]["content"], "alice files a report");
}

#[tokio::test(start_paused = true)]
async fn test_world_run_publishes_lifecycle_events() {
    let settings = WorldSettings {
        duration: Some(Duration::from_secs(10)),
        time_scale: 5.0,
        ..WorldSettings::default()
    };
    let world = World::builder("lab", TokioContext::shared(), Arc::new(Counting::default()))
        .settings(settings)
        .build()
        .await
        .unwrap();
    let monitor = Arc::new(Monitor::default());
    world.state().subscribe("monitor", monitor.clone()).await;
    world.spawn_agent("ada").await.unwrap();

    world.run().await.unwrap();

    let lifecycle = monitor.of_kinds(&[EventKind::WorldStarted, EventKind::WorldStopped]);
    assert_eq!(lifecycle.len(), 2);
    assert_eq!(lifecycle[0].kind, EventKind::WorldStarted);
    assert_eq!(lifecycle[1].kind, EventKind::WorldStopped);
    assert_eq!(world.status(), WorldStatus::Stopped);

    // stopping again publishes nothing new
    world.stop().await;
    assert_eq!(monitor.of_kinds(&[EventKind::WorldStopped]).len(), 1);
}

#[tokio::test]
async fn test_cached_backend_skips_repeat_calls() {
    let backend = Arc::new(Counting::default());
    let cache = Arc::new(ResponseCache::in_memory(None));
    let reasoner = layered(
        backend.clone(),
        RetryPolicy::default(),
        Some(cache.clone()),
        "office",
    );

    let first = reasoner.complete("You are alice.").await.unwrap();
    let second = reasoner.complete("You are alice.").await.unwrap();

    assert_eq!(first, second);
    assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    assert_eq!(cache.memory_len(), 1);
}

/// Takes `delay` per call and counts calls that never got to finish.
struct Slow {
    delay: Duration,
    finished: AtomicUsize,
    abandoned: AtomicUsize,
}

impl Slow {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            finished: AtomicUsize::new(0),
            abandoned: AtomicUsize::new(0),
        }
    }
}

struct Unfinished<'a> {
    counter: &'a AtomicUsize,
    armed: bool,
}

impl Drop for Unfinished<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.counter.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl ReasoningService for Slow {
    async fn complete(&self, _prompt: &str) -> Result<String, SwarmError> {
        let mut guard = Unfinished {
            counter: &self.abandoned,
            armed: true,
        };
        tokio::time::sleep(self.delay).await;
        guard.armed = false;
        self.finished.fetch_add(1, Ordering::SeqCst);
        Ok("done thinking".into())
    }
}

fn open_ended(stop_grace: Duration) -> WorldSettings {
    WorldSettings {
        duration: None,
        stop_grace,
        ..WorldSettings::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_run_returns_only_after_external_stop_completes() {
    let reasoner = Arc::new(Slow::new(Duration::from_secs(3)));
    let world = World::builder("den", TokioContext::shared(), reasoner.clone())
        .settings(open_ended(Duration::from_secs(5)))
        .build()
        .await
        .unwrap();
    let monitor = Arc::new(Monitor::default());
    world.state().subscribe("monitor", monitor.clone()).await;
    world.spawn_agent("ada").await.unwrap();

    let run = tokio::spawn({
        let world = world.clone();
        async move { world.run().await }
    });
    // ada is now inside her first reasoning call
    tokio::time::sleep(Duration::from_secs(1)).await;
    let stopper = tokio::spawn({
        let world = world.clone();
        async move { world.stop().await }
    });

    run.await.unwrap().unwrap();

    // the in-flight cycle finished before run returned
    assert_eq!(reasoner.finished.load(Ordering::SeqCst), 1);
    assert_eq!(reasoner.abandoned.load(Ordering::SeqCst), 0);
    assert_eq!(world.status(), WorldStatus::Stopped);
    assert!(world.agents().iter().all(|a| a.is_stopped()));

    let tail = monitor.of_kinds(&[EventKind::AgentAction, EventKind::WorldStopped]);
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].kind, EventKind::AgentAction);
    assert_eq!(tail[1].kind, EventKind::WorldStopped);

    stopper.await.unwrap();
    assert_eq!(monitor.of_kinds(&[EventKind::WorldStopped]).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_aborts_agents_past_grace_deadline() {
    let grace = Duration::from_secs(2);
    let reasoner = Arc::new(Slow::new(Duration::from_secs(3600)));
    let world = World::builder("vault", TokioContext::shared(), reasoner.clone())
        .settings(open_ended(grace))
        .build()
        .await
        .unwrap();
    let monitor = Arc::new(Monitor::default());
    world.state().subscribe("monitor", monitor.clone()).await;
    world.spawn_agent("stuck").await.unwrap();

    let run = tokio::spawn({
        let world = world.clone();
        async move { world.run().await }
    });
    tokio::time::sleep(Duration::from_secs(1)).await;

    let started = tokio::time::Instant::now();
    world.stop().await;
    let waited = started.elapsed();
    assert!(waited >= grace, "stop returned after {:?}", waited);
    assert!(waited < grace + Duration::from_secs(1), "stop returned after {:?}", waited);

    run.await.unwrap().unwrap();
    // let the aborted task be dropped
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(reasoner.abandoned.load(Ordering::SeqCst), 1);
    assert_eq!(reasoner.finished.load(Ordering::SeqCst), 0);
    assert_eq!(world.total_actions(), 0);
    assert_eq!(world.status(), WorldStatus::Stopped);
    assert_eq!(monitor.of_kinds(&[EventKind::WorldStopped]).len(), 1);
}
