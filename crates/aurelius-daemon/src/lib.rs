//! This crate (Aurelius project module) implements the speaker side of the BGP protocol: the per-peer session state machine with its
//! hold, keep-alive and connect-retry timers, and the [`server::BGPServer`] that accepts inbound connections, dials configured
//! neighbors, resolves connection collisions and merges learned routes into the server-wide Loc-RIB.
//!
//! One tokio task is spawned per connection (plus one reconnect task per active neighbor); sessions communicate with each other only
//! through the server's session registry.

pub mod server;
pub mod session;

#[cfg(test)]
pub mod test;

use aurelius_bgp::{
    error::DecodeError,
    rfc4271::NotificationMessage,
};
use aurelius_rt::rib::RibError;
use std::io;
use thiserror::Error;

/// Everything that can end a BGP session. The server loop converts these into the NOTIFICATION message to emit (where the protocol asks
/// for one) before the session is torn down; transport failures tear down silently.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unable to decode message => {0}")]
    Decode(#[from] DecodeError),

    #[error("Session closed with notification => {0}")]
    Notification(NotificationMessage),

    #[error("Hold timer expired")]
    HoldTimerExpired,

    #[error("Session lost collision resolution => {0}")]
    Collision(NotificationMessage),

    #[error("Transport failure => {0}")]
    Transport(#[from] io::Error),

    #[error("RIB failure => {0}")]
    Rib(#[from] RibError),

    #[error("Invalid peer configuration => {0}")]
    Configuration(String),
}

impl SessionError {
    /// The NOTIFICATION message to send to the peer for this error, when the protocol prescribes one.
    pub(crate) fn to_notification(&self) -> Option<NotificationMessage> {
        match self {
            SessionError::Decode(error) => Some(notification_for_decode_error(error)),
            SessionError::Notification(notification) => Some(notification.clone()),
            SessionError::HoldTimerExpired => Some(NotificationMessage::new(NotificationMessage::HOLD_TIMER_EXPIRED, 0)),
            SessionError::Collision(notification) => Some(notification.clone()),
            SessionError::Transport(_) | SessionError::Rib(_) | SessionError::Configuration(_) => None,
        }
    }
}

fn notification_for_decode_error(error: &DecodeError) -> NotificationMessage {
    match error {
        // Connection not synchronized / bad message length, per RFC 4271 section 6.1.
        DecodeError::InvalidMarker => NotificationMessage::new(NotificationMessage::MESSAGE_HEADER_ERROR, 1),
        DecodeError::Truncated | DecodeError::LengthMismatch { .. } => {
            NotificationMessage::new(NotificationMessage::MESSAGE_HEADER_ERROR, 2)
        }
    }
}
