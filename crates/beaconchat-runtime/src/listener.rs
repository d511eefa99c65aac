//! Message listeners
//!
//! Listeners are invoked from the coordinator loop, one message at a time.
//! A panicking listener is caught and logged so the loop keeps running.

use std::panic::{catch_unwind, AssertUnwindSafe};

use beaconchat_core::{InboundMessage, PrivateMessage, PublicMessage};
use tokio::sync::mpsc;
use tracing::{error, warn};

/// Receiver of classified inbound messages
pub trait MessageListener: Send {
    /// A public message or presence ping arrived
    fn on_public(&mut self, message: PublicMessage);

    /// A private message arrived, for any recipient
    fn on_private(&mut self, message: PrivateMessage);
}

/// Listener built from a pair of closures
pub struct CallbackListener<P, Q> {
    on_public: P,
    on_private: Q,
}

impl<P, Q> CallbackListener<P, Q>
where
    P: FnMut(PublicMessage) + Send,
    Q: FnMut(PrivateMessage) + Send,
{
    pub fn new(on_public: P, on_private: Q) -> Self {
        Self {
            on_public,
            on_private,
        }
    }
}

impl<P, Q> MessageListener for CallbackListener<P, Q>
where
    P: FnMut(PublicMessage) + Send,
    Q: FnMut(PrivateMessage) + Send,
{
    fn on_public(&mut self, message: PublicMessage) {
        (self.on_public)(message)
    }

    fn on_private(&mut self, message: PrivateMessage) {
        (self.on_private)(message)
    }
}

/// Listener that forwards every message into a bounded channel
///
/// Messages are dropped with a warning when the channel is full, so a slow
/// consumer cannot stall reception.
pub struct ChannelListener {
    sender: mpsc::Sender<InboundMessage>,
}

impl ChannelListener {
    /// Create a listener and the receiver its messages arrive on
    pub fn new(buffer: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
        let (sender, receiver) = mpsc::channel(buffer.max(1));
        (Self { sender }, receiver)
    }

    fn forward(&self, message: InboundMessage) {
        match self.sender.try_send(message) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(message)) => {
                warn!("Listener channel full, dropping message from {}", message.alias());
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Listener channel closed");
            }
        }
    }
}

impl MessageListener for ChannelListener {
    fn on_public(&mut self, message: PublicMessage) {
        self.forward(InboundMessage::Public(message));
    }

    fn on_private(&mut self, message: PrivateMessage) {
        self.forward(InboundMessage::Private(message));
    }
}

/// Hand `message` to the matching listener method, containing panics
///
/// Returns false if the listener panicked.
pub fn dispatch(listener: &mut dyn MessageListener, message: InboundMessage) -> bool {
    let kind = message.kind();
    let result = catch_unwind(AssertUnwindSafe(|| match message {
        InboundMessage::Public(message) => listener.on_public(message),
        InboundMessage::Private(message) => listener.on_private(message),
    }));

    if let Err(panic) = result {
        let reason = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        error!("{} listener panicked: {}", kind, reason);
        return false;
    }
    true
}
