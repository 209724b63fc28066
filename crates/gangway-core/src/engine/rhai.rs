//! Rhai engine adapter.
//!
//! Runs a Rhai project as the embedded engine. The script talks to the
//! host through a small registered API:
//!
//! - `emit(channel, message)` - send a message to the host
//! - `on_message(channel, handler)` - receive messages from the host
//! - `exit()` - shut the engine down
//! - `args()` / `env(key)` - read the launch snapshot
//! - `ready()` - complete the ready handshake on the app channel
//! - `emit_event(name, payload)` - send an enveloped application event
//! - `event_name(raw)` / `event_payload(raw)` - decode an envelope
//!
//! After the main script body runs, the adapter pumps injected messages
//! to the registered handlers on the engine thread until the script calls
//! `exit()`. A script that registers no handlers terminates as soon as
//! its main body returns.

use crate::engine::Engine;
use crate::error::EngineError;
use crate::event::{Envelope, CHANNEL_APP, CHANNEL_EVENTS, EVENT_READY};
use crate::host::{EngineCommand, EngineLink, Injector};
use crate::launch::{LaunchSpec, ENV_MODULE_PATH};
use crossbeam_channel::{unbounded, RecvTimeoutError};
use rhai::module_resolvers::{FileModuleResolver, ModuleResolversCollection};
use rhai::{Array, Dynamic, FnPtr};
use std::collections::HashMap;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// How often the pump wakes to check for exit between injected messages.
const PUMP_TICK: Duration = Duration::from_millis(10);

/// Shared state between the script API and the message pump.
#[derive(Clone, Default)]
struct PumpState {
    handlers: Arc<Mutex<HashMap<String, FnPtr>>>,
    exit: Arc<AtomicBool>,
}

impl PumpState {
    fn set_handler(&self, channel: &str, handler: FnPtr) {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .insert(channel.to_string(), handler);
    }

    fn handler(&self, channel: &str) -> Option<FnPtr> {
        self.handlers
            .lock()
            .expect("handler lock poisoned")
            .get(channel)
            .cloned()
    }

    fn handler_count(&self) -> usize {
        self.handlers.lock().expect("handler lock poisoned").len()
    }

    fn request_exit(&self) {
        self.exit.store(true, Ordering::Relaxed);
    }

    fn exit_requested(&self) -> bool {
        self.exit.load(Ordering::Relaxed)
    }
}

/// The shipped [`Engine`] implementation, backed by Rhai.
pub struct RhaiEngine {
    poll_interval: Duration,
}

impl RhaiEngine {
    pub fn new() -> Self {
        Self {
            poll_interval: PUMP_TICK,
        }
    }
}

impl Default for RhaiEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine for RhaiEngine {
    fn run(&mut self, spec: &LaunchSpec, link: EngineLink) -> Result<(), EngineError> {
        let script_path = spec
            .script
            .clone()
            .ok_or_else(|| EngineError::Script("launch spec has no main script".to_string()))?;
        let source = fs::read_to_string(&script_path)?;

        let pump = PumpState::default();
        let engine = build_engine(spec, &link, &pump);

        // The inbound queue is the engine's messaging subsystem: from here
        // on, injected messages reach the pump instead of being dropped.
        let (tx, rx) = unbounded();
        link.attach_injector(Injector::new(tx));

        let ast = engine
            .compile(&source)
            .map_err(|e| EngineError::Script(e.to_string()))?;

        log::debug!("running script {}", script_path.display());
        engine
            .run_ast(&ast)
            .map_err(|e| EngineError::Script(e.to_string()))?;

        // Pump injected messages to script handlers until exit().
        while !pump.exit_requested() && pump.handler_count() > 0 {
            let command = match rx.recv_timeout(self.poll_interval) {
                Ok(command) => command,
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => break,
            };

            let EngineCommand::Deliver { channel, message } = command;
            match pump.handler(&channel) {
                Some(handler) => {
                    let result: Result<Dynamic, _> =
                        handler.call(&engine, &ast, (channel.clone(), message));
                    if let Err(e) = result {
                        log::error!("[script] handler for '{}' failed: {}", channel, e);
                    }
                }
                None => log::debug!("no script handler for '{}'; message dropped", channel),
            }
        }

        log::debug!("script {} finished", script_path.display());
        Ok(())
    }
}

/// Build a Rhai engine with the bridge API and module resolution wired up.
fn build_engine(spec: &LaunchSpec, link: &EngineLink, pump: &PumpState) -> rhai::Engine {
    let mut engine = rhai::Engine::new();

    engine.set_max_expr_depths(4096, 4096);
    engine.set_max_call_levels(4096);

    // Route print()/debug() through the log system instead of stdout.
    engine.on_print(|text| {
        log::info!("[script] {}", text);
    });
    engine.on_debug(|text, source, pos| {
        let loc = match (source, pos) {
            (Some(src), pos) if !pos.is_none() => format!(" ({}:{})", src, pos),
            (Some(src), _) => format!(" ({})", src),
            (None, pos) if !pos.is_none() => format!(" ({})", pos),
            _ => String::new(),
        };
        log::debug!("[script]{} {}", loc, text);
    });

    // Imports resolve against the script's own directory, the project
    // base directory, and each entry of the module search path.
    let mut collection = ModuleResolversCollection::new();
    let mut source_resolver = FileModuleResolver::new();
    source_resolver.set_extension("rhai");
    collection.push(source_resolver);
    if let Some(base) = &spec.base_dir {
        let mut base_resolver = FileModuleResolver::new();
        base_resolver.set_base_path(base);
        base_resolver.set_extension("rhai");
        collection.push(base_resolver);
    }
    for entry in spec
        .env
        .get(ENV_MODULE_PATH)
        .map(|raw| raw.split(':'))
        .into_iter()
        .flatten()
    {
        if entry.is_empty() {
            continue;
        }
        let mut resolver = FileModuleResolver::new();
        resolver.set_base_path(entry);
        resolver.set_extension("rhai");
        collection.push(resolver);
    }
    engine.set_module_resolver(collection);

    // Bridge API.
    let emit_link = link.clone();
    engine.register_fn("emit", move |channel: &str, message: &str| {
        emit_link.emit(channel, message);
    });

    let handler_pump = pump.clone();
    engine.register_fn("on_message", move |channel: &str, handler: FnPtr| {
        handler_pump.set_handler(channel, handler);
    });

    let exit_pump = pump.clone();
    engine.register_fn("exit", move || {
        exit_pump.request_exit();
    });

    let args = spec.args.clone();
    engine.register_fn("args", move || -> Array {
        args.iter().cloned().map(Dynamic::from).collect()
    });

    let env = spec.env.clone();
    engine.register_fn("env", move |key: &str| -> String {
        env.get(key).cloned().unwrap_or_default()
    });

    // Envelope convention helpers, so scripts interoperate with an
    // EventGateway host without hand-rolling JSON.
    let ready_link = link.clone();
    engine.register_fn("ready", move || {
        match Envelope::new(EVENT_READY, &[]).encode() {
            Ok(raw) => ready_link.emit(CHANNEL_APP, &raw),
            Err(e) => log::error!("[script] failed to encode ready event: {}", e),
        }
    });

    let event_link = link.clone();
    engine.register_fn("emit_event", move |name: &str, payload: &str| {
        let envelope = Envelope::new(name, &[serde_json::Value::String(payload.to_string())]);
        match envelope.encode() {
            Ok(raw) => event_link.emit(CHANNEL_EVENTS, &raw),
            Err(e) => log::error!("[script] failed to encode '{}' event: {}", name, e),
        }
    });

    engine.register_fn("event_name", |raw: &str| -> String {
        Envelope::decode(raw)
            .map(|envelope| envelope.event_name)
            .unwrap_or_default()
    });

    engine.register_fn("event_payload", |raw: &str| -> String {
        let args = match Envelope::decode(raw) {
            Ok(envelope) => envelope.args(),
            Err(_) => return String::new(),
        };
        match args.first() {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    });

    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{spawn_engine, Bridge, Lifecycle};
    use crate::event::EventGateway;
    use crate::host::EngineHost;
    use crate::registry::{ChannelListener, ChannelRegistry};
    use crossbeam_channel::{Receiver, Sender};
    use std::path::Path;

    const RECV_TIMEOUT: Duration = Duration::from_secs(5);

    /// Listener that forwards every delivery into a channel the test can
    /// block on.
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

    fn write_script(dir: &Path, name: &str, source: &str) -> LaunchSpec {
        let path = dir.join(name);
        fs::write(&path, source).unwrap();

        LaunchSpec {
            args: vec!["gangway".to_string(), path.display().to_string()],
            env: HashMap::new(),
            script: Some(path),
            base_dir: Some(dir.to_path_buf()),
        }
    }

    fn recv(rx: &Receiver<(String, String)>) -> (String, String) {
        rx.recv_timeout(RECV_TIMEOUT).expect("no message from script")
    }

    #[test]
    fn test_script_with_no_handlers_terminates() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_script(dir.path(), "main.rhai", r#"emit("done", "1");"#);

        let registry = ChannelRegistry::new();
        let (listener, rx) = Forwarder::new();
        registry.set_listener(&listener);

        let host = EngineHost::new(Box::new(RhaiEngine::new()), registry);
        host.run(&spec).unwrap();

        assert_eq!(recv(&rx), ("done".to_string(), "1".to_string()));
    }

    #[test]
    fn test_compile_error_is_script_error() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_script(dir.path(), "main.rhai", "let x = ;");

        let host = EngineHost::new(Box::new(RhaiEngine::new()), ChannelRegistry::new());
        assert!(matches!(host.run(&spec), Err(EngineError::Script(_))));
    }

    #[test]
    fn test_args_and_env_reflect_launch_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let mut spec = write_script(
            dir.path(),
            "main.rhai",
            r#"
            emit("argc", args().len().to_string());
            emit("greeting", env("GREETING"));
            emit("missing", env("NO_SUCH_KEY"));
            "#,
        );
        spec.env
            .insert("GREETING".to_string(), "hello".to_string());

        let registry = ChannelRegistry::new();
        let (listener, rx) = Forwarder::new();
        registry.set_listener(&listener);

        let host = EngineHost::new(Box::new(RhaiEngine::new()), registry);
        host.run(&spec).unwrap();

        assert_eq!(recv(&rx), ("argc".to_string(), "2".to_string()));
        assert_eq!(recv(&rx), ("greeting".to_string(), "hello".to_string()));
        assert_eq!(recv(&rx), ("missing".to_string(), String::new()));
    }

    #[test]
    fn test_imports_resolve_against_project_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("util.rhai"), "fn double(x) { x * 2 }\n").unwrap();
        let spec = write_script(
            dir.path(),
            "main.rhai",
            r#"
            import "util" as util;
            emit("doubled", util::double(21).to_string());
            "#,
        );

        let registry = ChannelRegistry::new();
        let (listener, rx) = Forwarder::new();
        registry.set_listener(&listener);

        let host = EngineHost::new(Box::new(RhaiEngine::new()), registry);
        host.run(&spec).unwrap();

        assert_eq!(recv(&rx), ("doubled".to_string(), "42".to_string()));
    }

    #[test]
    fn test_echo_handler_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_script(
            dir.path(),
            "main.rhai",
            r#"
            on_message("cmd", |channel, message| {
                emit("echo", message);
                if message == "quit" {
                    exit();
                }
            });
            emit("ready", "1");
            "#,
        );

        let bridge = Arc::new(Bridge::new(Box::new(RhaiEngine::new())));
        let (listener, rx) = Forwarder::new();
        bridge.set_listener(&listener);

        let engine_thread = spawn_engine(bridge.clone(), spec).unwrap();

        assert_eq!(recv(&rx), ("ready".to_string(), "1".to_string()));

        bridge.send("cmd", "hello");
        assert_eq!(recv(&rx), ("echo".to_string(), "hello".to_string()));

        bridge.send("cmd", "quit");
        assert_eq!(recv(&rx), ("echo".to_string(), "quit".to_string()));

        engine_thread.join().unwrap();
        assert_eq!(bridge.state(), Lifecycle::Terminated);

        // The engine is gone; send is now a documented no-op.
        bridge.send("cmd", "after-exit");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_event_gateway_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let spec = write_script(
            dir.path(),
            "main.rhai",
            r#"
            on_message("APP_CHANNEL", |channel, message| {
                if event_name(message) == "terminate" {
                    emit_event("bye", "done");
                    exit();
                }
            });
            ready();
            "#,
        );

        let bridge = Arc::new(Bridge::new(Box::new(RhaiEngine::new())));
        let gateway = EventGateway::new(bridge.clone());

        let (event_tx, event_rx) = unbounded();
        gateway.set_event_handler(move |event, event_args| {
            let _ = event_tx.send((event.to_string(), event_args));
        });
        let (ready_tx, ready_rx) = unbounded();
        gateway.when_ready(move || {
            let _ = ready_tx.send(());
        });

        let engine_thread = spawn_engine(bridge.clone(), spec).unwrap();

        ready_rx.recv_timeout(RECV_TIMEOUT).expect("no ready handshake");
        assert!(gateway.is_ready());

        gateway.request_terminate();
        let (event, event_args) = event_rx
            .recv_timeout(RECV_TIMEOUT)
            .expect("no bye event");
        assert_eq!(event, "bye");
        assert_eq!(event_args, vec![serde_json::Value::String("done".to_string())]);

        engine_thread.join().unwrap();
        assert_eq!(bridge.state(), Lifecycle::Terminated);
    }
}
