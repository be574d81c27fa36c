//! Events emitted by the session for the UI layer to consume.

use std::time::Duration;

use crate::connection::ConnectionState;
use crate::merger::FeedNotification;

/// Events that the SDK emits to the consumer (CLI, GUI, bot, etc.)
#[derive(Debug, Clone)]
pub enum Event {
    /// The connection moved between lifecycle states.
    StateChanged {
        from: ConnectionState,
        to: ConnectionState,
    },

    /// The live stream is open.
    Connected,

    /// A reconnect attempt is scheduled after `delay`.
    ReconnectScheduled {
        attempt: u32,
        delay: Duration,
    },

    /// The feed was reset or grew.
    Feed(FeedNotification),

    /// The server rejected the credential. The session has been cleared and
    /// will not reconnect on its own.
    AuthFailed {
        reason: String,
    },

    /// The session ended on purpose (explicit disconnect or lost credential).
    Disconnected {
        reason: String,
    },
}
