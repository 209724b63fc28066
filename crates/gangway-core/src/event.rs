//! Structured events layered on raw channels.
//!
//! The bridge itself moves opaque strings. Most hosts and scripts settle
//! on one convention on top: a JSON envelope carrying an event name and a
//! JSON-encoded argument array, exchanged on two well-known channels.
//! [`EventGateway`] implements that convention for the host side,
//! including the `ready` handshake the script uses to announce that its
//! handlers are registered.

use crate::bridge::Bridge;
use crate::registry::ChannelListener;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::{Arc, Mutex, RwLock};

/// Channel reserved for engine/host control events (`ready`, `pause`,
/// `resume`, `terminate`).
pub const CHANNEL_APP: &str = "APP_CHANNEL";

/// Channel carrying application events.
pub const CHANNEL_EVENTS: &str = "EVENT_CHANNEL";

/// Event the script emits on [`CHANNEL_APP`] once its handlers are up.
pub const EVENT_READY: &str = "ready";

/// App event sent when the host is about to lose the foreground.
pub const EVENT_PAUSE: &str = "pause";

/// App event sent when the host returns to the foreground.
pub const EVENT_RESUME: &str = "resume";

/// App event asking the script to shut itself down.
pub const EVENT_TERMINATE: &str = "terminate";

/// The JSON envelope carried on the event channels.
///
/// `event_message` is itself a JSON array of event arguments; a payload
/// that fails to serialize degrades to an empty array rather than being
/// dropped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub event_name: String,
    #[serde(default)]
    pub event_message: String,
}

impl Envelope {
    /// Build an envelope for `event` with the given arguments.
    pub fn new(event: &str, args: &[Value]) -> Self {
        let event_message =
            serde_json::to_string(args).unwrap_or_else(|_| "[]".to_string());
        Self {
            event_name: event.to_string(),
            event_message,
        }
    }

    /// Decode an envelope from a raw channel message.
    pub fn decode(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Encode the envelope into a raw channel message.
    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// The decoded argument array, empty if absent or malformed.
    pub fn args(&self) -> Vec<Value> {
        serde_json::from_str(&self.event_message).unwrap_or_default()
    }
}

/// Application callback for inbound events on [`CHANNEL_EVENTS`].
pub type EventHandler = Box<dyn Fn(&str, Vec<Value>) + Send + Sync>;

struct ReadyState {
    ready: bool,
    callbacks: Vec<Box<dyn FnOnce() + Send>>,
}

/// Host-side endpoint of the structured-event convention.
///
/// The gateway registers itself as the bridge's listener. Keep the `Arc`
/// returned by [`new`](EventGateway::new) alive: the bridge only holds it
/// weakly, and delivery stops when the last strong reference drops.
///
/// Inbound `on_message` callbacks run on the engine's emitting thread;
/// the event handler and `when_ready` callbacks inherit that context.
pub struct EventGateway {
    bridge: Arc<Bridge>,
    ready: Mutex<ReadyState>,
    handler: RwLock<Option<EventHandler>>,
}

impl EventGateway {
    /// Create a gateway and register it as `bridge`'s listener.
    pub fn new(bridge: Arc<Bridge>) -> Arc<Self> {
        let gateway = Arc::new(Self {
            bridge,
            ready: Mutex::new(ReadyState {
                ready: false,
                callbacks: Vec::new(),
            }),
            handler: RwLock::new(None),
        });
        gateway.bridge.set_listener(&gateway);
        gateway
    }

    /// Set the callback for application events, replacing any previous one.
    pub fn set_event_handler<F>(&self, handler: F)
    where
        F: Fn(&str, Vec<Value>) + Send + Sync + 'static,
    {
        *self.handler.write().expect("handler lock poisoned") = Some(Box::new(handler));
    }

    /// Whether the script has completed the `ready` handshake.
    pub fn is_ready(&self) -> bool {
        self.ready.lock().expect("ready lock poisoned").ready
    }

    /// Run `callback` once the script is ready.
    ///
    /// Runs immediately on the calling thread when already ready,
    /// otherwise later on the thread that delivers the `ready` event.
    pub fn when_ready<F>(&self, callback: F)
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.ready.lock().expect("ready lock poisoned");
            if !state.ready {
                state.callbacks.push(Box::new(callback));
                return;
            }
        }
        callback();
    }

    /// Send an application event to the script on [`CHANNEL_EVENTS`].
    ///
    /// Best-effort, like the underlying [`Bridge::send`].
    pub fn send_event(&self, event: &str, args: &[Value]) {
        self.send_on(CHANNEL_EVENTS, event, args);
    }

    /// Tell the script the host is about to lose the foreground.
    pub fn notify_pause(&self) {
        self.send_on(CHANNEL_APP, EVENT_PAUSE, &[]);
    }

    /// Tell the script the host returned to the foreground.
    pub fn notify_resume(&self) {
        self.send_on(CHANNEL_APP, EVENT_RESUME, &[]);
    }

    /// Ask the script to shut itself down.
    ///
    /// There is no abort primitive in the bridge; termination is a
    /// convention the script honors by calling `exit()`.
    pub fn request_terminate(&self) {
        self.send_on(CHANNEL_APP, EVENT_TERMINATE, &[]);
    }

    fn send_on(&self, channel: &str, event: &str, args: &[Value]) {
        match Envelope::new(event, args).encode() {
            Ok(raw) => self.bridge.send(channel, &raw),
            Err(e) => log::error!("failed to encode '{}' event: {}", event, e),
        }
    }

    fn mark_ready(&self) {
        let callbacks = {
            let mut state = self.ready.lock().expect("ready lock poisoned");
            state.ready = true;
            std::mem::take(&mut state.callbacks)
        };
        log::debug!("script signaled ready");
        for callback in callbacks {
            callback();
        }
    }
}

impl ChannelListener for EventGateway {
    fn on_message(&self, channel: &str, message: &str) {
        let envelope = match Envelope::decode(message) {
            Ok(envelope) => envelope,
            Err(e) => {
                log::warn!("undecodable envelope on '{}': {}", channel, e);
                return;
            }
        };

        match channel {
            CHANNEL_APP if envelope.event_name == EVENT_READY => self.mark_ready(),
            CHANNEL_APP => {
                log::debug!("ignoring app event '{}'", envelope.event_name);
            }
            CHANNEL_EVENTS => {
                let handler = self.handler.read().expect("handler lock poisoned");
                match handler.as_ref() {
                    Some(handler) => handler(&envelope.event_name, envelope.args()),
                    None => log::debug!(
                        "no event handler; event '{}' dropped",
                        envelope.event_name
                    ),
                }
            }
            other => log::debug!("ignoring message on unrecognized channel '{}'", other),
        }
    }
}
