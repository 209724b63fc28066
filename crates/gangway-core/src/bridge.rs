//! Bridge facade - the single entry point for host applications.
//!
//! The bridge wires the [`EngineHost`] and [`ChannelRegistry`] together
//! and enforces the engine lifecycle:
//!
//! ```text
//! Unstarted ──start()──► Running ──engine exits──► Terminated
//! ```
//!
//! The lifecycle is monotonic and one-way. `start` blocks the calling
//! thread for the engine's entire lifetime; use [`spawn_engine`] to run
//! it on a dedicated, properly-sized thread instead.

use crate::engine::Engine;
use crate::error::BridgeError;
use crate::host::{EngineHost, ENGINE_STACK_SIZE};
use crate::launch::LaunchSpec;
use crate::registry::{ChannelListener, ChannelRegistry};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

/// Lifecycle of the embedded engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// `start` has not been called yet.
    Unstarted,
    /// The engine is executing; `send` delivers.
    Running,
    /// The engine has exited. The bridge is dead.
    Terminated,
}

impl fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Lifecycle::Unstarted => "unstarted",
            Lifecycle::Running => "running",
            Lifecycle::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Connects a host application to one embedded engine.
///
/// One bridge owns one engine, one channel registry, and at most one
/// listener; it is deliberately not a broadcast bus.
pub struct Bridge {
    state: Mutex<Lifecycle>,
    host: EngineHost,
    registry: ChannelRegistry,
}

impl Bridge {
    /// Create a bridge around an engine.
    pub fn new(engine: Box<dyn Engine>) -> Self {
        let registry = ChannelRegistry::new();
        Self {
            state: Mutex::new(Lifecycle::Unstarted),
            host: EngineHost::new(engine, registry.clone()),
            registry,
        }
    }

    /// Register the listener for inbound messages, replacing any
    /// previous one. Register before `start`: messages arriving with no
    /// listener are lost.
    ///
    /// The bridge holds the listener weakly; dropping it stops delivery
    /// without notifying the bridge.
    pub fn set_listener<L>(&self, listener: &Arc<L>)
    where
        L: ChannelListener + 'static,
    {
        self.registry.set_listener(listener);
    }

    /// Current lifecycle state.
    pub fn state(&self) -> Lifecycle {
        *self.state.lock().expect("state lock poisoned")
    }

    /// Start the engine with raw arguments and environment.
    ///
    /// Blocks the calling thread until the engine terminates. The calling
    /// thread must have at least [`ENGINE_STACK_SIZE`] bytes of stack;
    /// violating this precondition is not detectable here and typically
    /// ends in a stack overflow. [`spawn_engine`] handles the thread
    /// contract for you.
    ///
    /// Fails with [`BridgeError::AlreadyStarted`] if the bridge has ever
    /// been started. Engine-internal failures are logged and surface only
    /// as termination, not as an error from this call.
    pub fn start(
        &self,
        args: Vec<String>,
        env: HashMap<String, String>,
    ) -> Result<(), BridgeError> {
        self.start_spec(LaunchSpec::new(args, env))
    }

    /// Start the engine from a full launch snapshot.
    ///
    /// Same contract as [`start`](Bridge::start).
    pub fn start_spec(&self, spec: LaunchSpec) -> Result<(), BridgeError> {
        {
            let mut state = self.state.lock().expect("state lock poisoned");
            if *state != Lifecycle::Unstarted {
                return Err(BridgeError::AlreadyStarted { state: *state });
            }
            *state = Lifecycle::Running;
        }

        log::info!("starting engine: argv {:?}", spec.args);
        let result = self.host.run(&spec);
        *self.state.lock().expect("state lock poisoned") = Lifecycle::Terminated;

        match result {
            Ok(()) => log::info!("engine terminated"),
            Err(e) => log::error!("engine terminated with error: {}", e),
        }
        Ok(())
    }

    /// Send a message to the engine on a named channel.
    ///
    /// Best-effort: outside the `Running` state this is a documented
    /// no-op, and a running engine whose messaging subsystem is not yet
    /// up drops the message as well. Safe to call from any thread.
    pub fn send(&self, channel: &str, message: &str) {
        if self.state() != Lifecycle::Running {
            log::debug!("bridge not running; message on '{}' dropped", channel);
            return;
        }
        self.host.inject(channel, message);
    }
}

/// Handle to the dedicated engine thread created by [`spawn_engine`].
pub struct EngineThread {
    handle: JoinHandle<Result<(), BridgeError>>,
}

impl EngineThread {
    /// Wait for the engine to terminate and surface the `start` result.
    pub fn join(self) -> Result<(), BridgeError> {
        self.handle.join().map_err(|_| BridgeError::EnginePanicked)?
    }
}

/// Run `bridge.start_spec(spec)` on a dedicated engine thread.
///
/// The thread is named `gangway-engine` and provisioned with
/// [`ENGINE_STACK_SIZE`] bytes of stack, satisfying the engine's stack
/// precondition. This is the sanctioned way to keep the caller's thread
/// responsive while the engine runs.
pub fn spawn_engine(bridge: Arc<Bridge>, spec: LaunchSpec) -> io::Result<EngineThread> {
    let handle = thread::Builder::new()
        .name("gangway-engine".to_string())
        .stack_size(ENGINE_STACK_SIZE)
        .spawn(move || bridge.start_spec(spec))?;
    Ok(EngineThread { handle })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Engine;
    use crate::error::EngineError;
    use crate::host::{EngineCommand, EngineLink, Injector};
    use crossbeam_channel::{unbounded, Receiver, Sender};
    use std::time::Duration;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Scripted engine: publishes its injector, emits a fixed set of
    /// messages, then records injected messages until told to exit.
    struct FakeEngine {
        emits: Vec<(String, String)>,
        received: Arc<Mutex<Vec<(String, String)>>>,
        exit_rx: Receiver<()>,
    }

    impl FakeEngine {
        fn new(
            emits: &[(&str, &str)],
        ) -> (Self, Arc<Mutex<Vec<(String, String)>>>, Sender<()>) {
            let received = Arc::new(Mutex::new(Vec::new()));
            let (exit_tx, exit_rx) = unbounded();
            let engine = Self {
                emits: emits
                    .iter()
                    .map(|(c, m)| (c.to_string(), m.to_string()))
                    .collect(),
                received: received.clone(),
                exit_rx,
            };
            (engine, received, exit_tx)
        }
    }

    impl Engine for FakeEngine {
        fn run(&mut self, _spec: &LaunchSpec, link: EngineLink) -> Result<(), EngineError> {
            let (tx, rx) = unbounded();
            link.attach_injector(Injector::new(tx));

            for (channel, message) in &self.emits {
                link.emit(channel, message);
            }

            loop {
                crossbeam_channel::select! {
                    recv(rx) -> command => {
                        if let Ok(EngineCommand::Deliver { channel, message }) = command {
                            self.received.lock().unwrap().push((channel, message));
                        }
                    }
                    recv(self.exit_rx) -> _ => {
                        // Drain anything injected before the exit signal so
                        // tests observe every message sent while running.
                        while let Ok(EngineCommand::Deliver { channel, message }) = rx.try_recv()
                        {
                            self.received.lock().unwrap().push((channel, message));
                        }
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Listener forwarding deliveries into a channel tests can block on.
    struct Forwarder {
        tx: Sender<(String, String)>,
    }

    impl Forwarder {
        fn new() -> (Arc<Self>, Receiver<(String, String)>) {
            let (tx, rx) = unbounded();
            (Arc::new(Self { tx }), rx)
        }
    }

    impl ChannelListener for Forwarder {
        fn on_message(&self, channel: &str, message: &str) {
            let _ = self.tx.send((channel.to_string(), message.to_string()));
        }
    }

    #[test]
    fn test_full_lifecycle_scenario() {
        let (engine, received, exit_tx) = FakeEngine::new(&[("ready", "1")]);
        let bridge = Arc::new(Bridge::new(Box::new(engine)));
        let (listener, rx) = Forwarder::new();
        bridge.set_listener(&listener);

        assert_eq!(bridge.state(), Lifecycle::Unstarted);

        let engine_thread = spawn_engine(bridge.clone(), LaunchSpec::default()).unwrap();

        // The fake engine emits ("ready", "1") as soon as it starts.
        assert_eq!(
            rx.recv_timeout(RECV_TIMEOUT).unwrap(),
            ("ready".to_string(), "1".to_string())
        );
        assert_eq!(bridge.state(), Lifecycle::Running);

        bridge.send("cmd", "ping");
        exit_tx.send(()).unwrap();
        engine_thread.join().unwrap();

        assert_eq!(bridge.state(), Lifecycle::Terminated);
        assert_eq!(
            received.lock().unwrap().clone(),
            vec![("cmd".to_string(), "ping".to_string())]
        );

        // Post-termination send is a no-op.
        bridge.send("cmd", "late");
        assert_eq!(received.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_second_start_fails_without_reentering_engine() {
        let (engine, _received, exit_tx) = FakeEngine::new(&[]);
        let bridge = Bridge::new(Box::new(engine));

        exit_tx.send(()).unwrap();
        bridge.start(Vec::new(), HashMap::new()).unwrap();
        assert_eq!(bridge.state(), Lifecycle::Terminated);

        match bridge.start(Vec::new(), HashMap::new()) {
            Err(BridgeError::AlreadyStarted { state }) => {
                assert_eq!(state, Lifecycle::Terminated);
            }
            other => panic!("expected AlreadyStarted, got {:?}", other),
        }
    }

    #[test]
    fn test_start_while_running_fails() {
        let (engine, _received, exit_tx) = FakeEngine::new(&[("ready", "1")]);
        let bridge = Arc::new(Bridge::new(Box::new(engine)));
        let (listener, rx) = Forwarder::new();
        bridge.set_listener(&listener);

        let engine_thread = spawn_engine(bridge.clone(), LaunchSpec::default()).unwrap();
        rx.recv_timeout(RECV_TIMEOUT).unwrap();

        match bridge.start(Vec::new(), HashMap::new()) {
            Err(BridgeError::AlreadyStarted { state }) => {
                assert_eq!(state, Lifecycle::Running);
            }
            other => panic!("expected AlreadyStarted, got {:?}", other),
        }

        exit_tx.send(()).unwrap();
        engine_thread.join().unwrap();
    }

    #[test]
    fn test_send_before_start_is_noop() {
        let (engine, received, exit_tx) = FakeEngine::new(&[]);
        let bridge = Bridge::new(Box::new(engine));

        bridge.send("cmd", "too-early");

        exit_tx.send(()).unwrap();
        bridge.start(Vec::new(), HashMap::new()).unwrap();
        assert!(received.lock().unwrap().is_empty());
    }

    #[test]
    fn test_emission_order_is_preserved() {
        let (engine, _received, exit_tx) =
            FakeEngine::new(&[("a", "1"), ("b", "2"), ("a", "3")]);
        let bridge = Arc::new(Bridge::new(Box::new(engine)));
        let (listener, rx) = Forwarder::new();
        bridge.set_listener(&listener);

        let engine_thread = spawn_engine(bridge.clone(), LaunchSpec::default()).unwrap();
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(rx.recv_timeout(RECV_TIMEOUT).unwrap());
        }
        exit_tx.send(()).unwrap();
        engine_thread.join().unwrap();

        assert_eq!(
            seen,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string()),
                ("a".to_string(), "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_emission_without_listener_is_silent() {
        let (engine, _received, exit_tx) = FakeEngine::new(&[("ready", "1")]);
        let bridge = Bridge::new(Box::new(engine));

        exit_tx.send(()).unwrap();
        bridge.start(Vec::new(), HashMap::new()).unwrap();
        assert_eq!(bridge.state(), Lifecycle::Terminated);
    }
}
