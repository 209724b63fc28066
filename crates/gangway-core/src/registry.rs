//! Channel registry - routes inbound messages to the registered listener.
//!
//! The registry is the host-side end of the message bus. Messages the
//! engine emits on any channel land here and are handed to the single
//! registered [`ChannelListener`], synchronously, on whatever thread the
//! engine emitted from. The registry introduces no queue and no thread
//! hop: ordering and timing are exactly as produced by the engine side.

use std::sync::{Arc, RwLock, Weak};

/// Host-side observer of inbound channel messages.
///
/// `on_message` runs on the engine's emitting thread. Implementations that
/// need a particular thread must re-marshal themselves; the bridge does
/// not do it for them.
pub trait ChannelListener: Send + Sync {
    /// Called once per inbound message, in emission order.
    fn on_message(&self, channel: &str, message: &str);
}

/// Routes messages emitted by the engine to the registered listener.
///
/// At most one listener is supported. The registry holds it weakly, so
/// listener lifetime is independent of the bridge: a dropped listener
/// means subsequent messages are silently discarded, never a fault.
#[derive(Clone, Default)]
pub struct ChannelRegistry {
    listener: Arc<RwLock<Option<Weak<dyn ChannelListener>>>>,
}

impl ChannelRegistry {
    /// Create a registry with no listener attached.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the listener, replacing any previous one.
    ///
    /// Only a weak reference is kept; the caller retains ownership.
    pub fn set_listener<L>(&self, listener: &Arc<L>)
    where
        L: ChannelListener + 'static,
    {
        let arc: Arc<dyn ChannelListener> = listener.clone();
        let weak: Weak<dyn ChannelListener> = Arc::downgrade(&arc);
        *self.listener.write().expect("listener lock poisoned") = Some(weak);
    }

    /// Deliver a message to the current listener.
    ///
    /// Delivery is synchronous on the calling thread. If no listener is
    /// registered, or the listener has been dropped, the message is lost.
    pub fn notify(&self, channel: &str, message: &str) {
        // Upgrade outside the callback so a listener that re-registers
        // from within on_message cannot deadlock against the lock.
        let listener = self
            .listener
            .read()
            .expect("listener lock poisoned")
            .as_ref()
            .and_then(Weak::upgrade);

        match listener {
            Some(listener) => listener.on_message(channel, message),
            None => log::debug!("no listener for channel '{}'; message dropped", channel),
        }
    }
}
