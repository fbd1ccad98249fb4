//! Hive Environment Abstraction Layer
//!
//! This crate holds the contracts every other Hive crate is written
//! against, with no engine logic of its own:
//!
//! - **Runtime** (`WorldContext`): time, sleep, spawning of concurrency units
//! - **Shared state** (`WorldState`, `EventHandler`): key/value store, event
//!   bus with broadcast and targeted delivery, derived agent directory
//! - **Reasoning** (`ReasoningService`): the external `prompt -> text` backend
//! - **Cancellation** (`ShutdownToken`): cooperative stop signal
//!
//! # Example
//!
//! ```ignore
//! use hive_env::{WorldContext, WorldState, ShutdownToken};
//!
//! async fn unit<Ctx: WorldContext>(ctx: &Ctx, state: &dyn WorldState, token: &ShutdownToken) {
//!     while !token.is_cancelled() {
//!         let world = state.get("world_state").await;
//!         // ... decide, act ...
//!         tokio::select! {
//!             _ = ctx.sleep(Duration::from_secs(5)) => {}
//!             _ = token.cancelled() => break,
//!         }
//!     }
//! }
//! ```

mod context;
mod error;
mod reasoning;
mod shutdown;
mod state;
mod tokio_impl;
mod types;

pub use context::WorldContext;
pub use error::SwarmError;
pub use reasoning::ReasoningService;
pub use shutdown::ShutdownToken;
pub use state::{EventHandler, WorldState};
pub use tokio_impl::TokioContext;
pub use types::{AgentRecord, Event, EventKind, STATE_MANAGER_SOURCE};
