//! Engine host - owns and drives the embedded engine's execution.
//!
//! The host is the seam between the bridge and the engine. It runs the
//! engine to completion on the calling thread, wires the engine's outbound
//! messages into the [`ChannelRegistry`], and adapts cross-thread message
//! injection to the queue the engine drains on its own thread.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::launch::LaunchSpec;
use crate::registry::ChannelRegistry;
use crossbeam_channel::Sender;
use std::sync::{Arc, Mutex};

/// Minimum stack size in bytes for the thread that runs the engine.
///
/// Engine startup performs deep call chains; a thread with the platform's
/// default auxiliary stack will overflow. [`spawn_engine`](crate::bridge::spawn_engine)
/// provisions this automatically.
pub const ENGINE_STACK_SIZE: usize = 2 * 1024 * 1024;

/// A command queued for the running engine.
///
/// Commands are drained by the engine on its own thread, so foreign
/// threads never touch live engine state.
#[derive(Clone, Debug)]
pub enum EngineCommand {
    /// Deliver a message to the engine's handler for `channel`.
    Deliver { channel: String, message: String },
}

/// Thread-safe injection primitive published by the engine once its
/// message pump is up.
///
/// Cloning is cheap; any thread may inject concurrently.
#[derive(Clone)]
pub struct Injector {
    tx: Sender<EngineCommand>,
}

impl Injector {
    /// Wrap the sending half of the engine's command queue.
    pub fn new(tx: Sender<EngineCommand>) -> Self {
        Self { tx }
    }

    /// Queue a message for delivery on the engine thread.
    pub fn inject(&self, channel: &str, message: &str) {
        let command = EngineCommand::Deliver {
            channel: channel.to_string(),
            message: message.to_string(),
        };
        if self.tx.send(command).is_err() {
            log::debug!("engine pump gone; message on '{}' dropped", channel);
        }
    }
}

/// Connects a running engine to the host.
///
/// Outbound: the engine calls [`emit`](EngineLink::emit) for every message
/// its script sends, and the link forwards it to the channel registry.
/// Inbound: once the engine's message pump exists, the engine publishes an
/// [`Injector`] through [`attach_injector`](EngineLink::attach_injector);
/// until then, injected messages are dropped.
#[derive(Clone)]
pub struct EngineLink {
    registry: ChannelRegistry,
    injector: Arc<Mutex<Option<Injector>>>,
}

impl EngineLink {
    fn new(registry: ChannelRegistry, injector: Arc<Mutex<Option<Injector>>>) -> Self {
        Self { registry, injector }
    }

    /// Forward a message the engine emitted on `channel` to the host side.
    pub fn emit(&self, channel: &str, message: &str) {
        self.registry.notify(channel, message);
    }

    /// Publish the engine's injection primitive.
    ///
    /// Called by the engine as soon as its inbound queue exists. Messages
    /// injected before this point are dropped.
    pub fn attach_injector(&self, injector: Injector) {
        *self.injector.lock().expect("injector lock poisoned") = Some(injector);
    }
}

/// Owns the embedded engine and its execution.
pub struct EngineHost {
    engine: Mutex<Box<dyn Engine>>,
    registry: ChannelRegistry,
    injector: Arc<Mutex<Option<Injector>>>,
}

impl EngineHost {
    /// Create a host for `engine`, forwarding emitted messages to `registry`.
    pub fn new(engine: Box<dyn Engine>, registry: ChannelRegistry) -> Self {
        Self {
            engine: Mutex::new(engine),
            registry,
            injector: Arc::new(Mutex::new(None)),
        }
    }

    /// Run the engine to completion on the calling thread.
    ///
    /// Blocks until the engine exits. The calling thread must be
    /// provisioned with at least [`ENGINE_STACK_SIZE`] bytes of stack;
    /// this is a documented precondition, not something the host can
    /// check. When this returns, the injector is cleared so further
    /// injections become no-ops.
    pub fn run(&self, spec: &LaunchSpec) -> Result<(), EngineError> {
        let link = EngineLink::new(self.registry.clone(), self.injector.clone());
        let result = self
            .engine
            .lock()
            .expect("engine lock poisoned")
            .run(spec, link);
        self.injector.lock().expect("injector lock poisoned").take();
        result
    }

    /// Hand a message to the running engine on `channel`.
    ///
    /// Safe to call from any thread: delivery is marshaled onto the
    /// engine's own pump. If the engine's messaging subsystem is not up
    /// (not yet initialized, or already terminated), the message is
    /// silently dropped. There is no queuing of pre-start messages.
    pub fn inject(&self, channel: &str, message: &str) {
        let injector = self
            .injector
            .lock()
            .expect("injector lock poisoned")
            .clone();

        match injector {
            Some(injector) => injector.inject(channel, message),
            None => log::debug!(
                "engine not accepting messages; message on '{}' dropped",
                channel
            ),
        }
    }
}
