//! Gangway Core - embedded script engine bridge.
//!
//! This crate embeds a scripting engine inside a host application process
//! and exposes a bidirectional, named-channel message bus between host
//! code and script code:
//!
//! - **Bridge** - lifecycle facade: `start`, `send`, listener registration
//! - **Engine Host** - owns the engine's execution and message injection
//! - **Channel Registry** - routes inbound messages to the listener
//! - **Launch** - argv/env snapshots and script project resolution
//! - **Engine** - the engine seam and the shipped Rhai adapter
//! - **Event** - the JSON envelope convention layered on raw channels
//!
//! # Architecture
//!
//! The engine runs to completion on one dedicated thread ([`Bridge::start`]
//! blocks it for the engine's whole lifetime; [`spawn_engine`] provisions
//! it with the required stack). Any other thread may call [`Bridge::send`]
//! concurrently: delivery is marshaled onto the engine's own message pump,
//! never a direct call into live engine state. Messages the script emits
//! are delivered to the registered listener synchronously on the engine's
//! thread. Message passing is best-effort in both directions: outside the
//! `Running` window, or with no live listener, messages are dropped.
//!
//! # Example
//!
//! ```no_run
//! use gangway_core::{spawn_engine, Bridge, Project, RhaiEngine};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let project = Project::resolve("scripts/app")?;
//! let spec = project.launch_spec(&[], &HashMap::new())?;
//!
//! let bridge = Arc::new(Bridge::new(Box::new(RhaiEngine::new())));
//! let engine = spawn_engine(bridge.clone(), spec)?;
//!
//! bridge.send("cmd", "ping");
//! engine.join()?;
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod engine;
pub mod error;
pub mod event;
pub mod host;
pub mod launch;
pub mod registry;

pub use bridge::{spawn_engine, Bridge, EngineThread, Lifecycle};
pub use engine::{Engine, RhaiEngine};
pub use error::{BridgeError, EngineError, LaunchError};
pub use event::{Envelope, EventGateway, CHANNEL_APP, CHANNEL_EVENTS};
pub use host::{EngineCommand, EngineHost, EngineLink, Injector, ENGINE_STACK_SIZE};
pub use launch::{LaunchSpec, Project};
pub use registry::{ChannelListener, ChannelRegistry};
