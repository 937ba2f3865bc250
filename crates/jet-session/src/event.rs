//! Shell events
//!
//! Status and error notifications pushed from the session worker to the
//! external shell. The sink is injected, so the core never depends on a
//! particular UI or bridge.

use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, error, info};

/// Status payload of `onVPNStatusChanged`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub is_connected: bool,
    pub is_connecting: bool,
    pub status: String,
}

impl StatusUpdate {
    pub fn connecting() -> Self {
        Self {
            is_connected: false,
            is_connecting: true,
            status: "Connecting...".to_string(),
        }
    }

    pub fn connected() -> Self {
        Self {
            is_connected: true,
            is_connecting: false,
            status: "Connected".to_string(),
        }
    }

    pub fn disconnected() -> Self {
        Self {
            is_connected: false,
            is_connecting: false,
            status: "Disconnected".to_string(),
        }
    }
}

/// Class of a reported failure.
///
/// `Permission` tells the shell to run its consent flow before retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Config,
    Permission,
    Establish,
    Negotiation,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config => write!(f, "config"),
            Self::Permission => write!(f, "permission"),
            Self::Establish => write!(f, "establish"),
            Self::Negotiation => write!(f, "negotiation"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Events delivered to the shell, in emission order.
///
/// Serializes as a method-channel call: `{"method": .., "arguments": {..}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum ShellEvent {
    #[serde(rename = "onVPNStatusChanged")]
    StatusChanged(StatusUpdate),

    #[serde(rename = "onVPNError")]
    Error { kind: ErrorKind, message: String },

    /// Persistent "connected" indicator (a foreground notification on mobile)
    #[serde(rename = "onVPNIndicator")]
    Indicator { visible: bool, message: String },
}

/// Receiver of shell events
pub trait EventSink: Send + Sync {
    fn emit(&self, event: ShellEvent);
}

impl EventSink for Sender<ShellEvent> {
    fn emit(&self, event: ShellEvent) {
        if self.send(event).is_err() {
            debug!("Event receiver dropped");
        }
    }
}

/// Sink that only logs events
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: ShellEvent) {
        match event {
            ShellEvent::StatusChanged(update) => info!("VPN status: {}", update.status),
            ShellEvent::Error { kind, message } => error!("VPN error ({}): {}", kind, message),
            ShellEvent::Indicator { visible, message } => {
                debug!("Indicator {}: {}", if visible { "shown" } else { "cleared" }, message)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::unbounded;

    #[test]
    fn test_status_presets() {
        let connected = StatusUpdate::connected();
        assert!(connected.is_connected);
        assert!(!connected.is_connecting);

        let connecting = StatusUpdate::connecting();
        assert!(!connecting.is_connected);
        assert!(connecting.is_connecting);

        assert_eq!(StatusUpdate::disconnected().status, "Disconnected");
    }

    #[test]
    fn test_method_channel_shape() {
        let event = ShellEvent::StatusChanged(StatusUpdate::connected());
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["method"], "onVPNStatusChanged");
        assert_eq!(json["arguments"]["isConnected"], true);
        assert_eq!(json["arguments"]["isConnecting"], false);
        assert_eq!(json["arguments"]["status"], "Connected");

        let event = ShellEvent::Error {
            kind: ErrorKind::Permission,
            message: "VPN permission denied".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["method"], "onVPNError");
        assert_eq!(json["arguments"]["kind"], "permission");
    }

    #[test]
    fn test_channel_sink() {
        let (tx, rx) = unbounded();
        tx.emit(ShellEvent::StatusChanged(StatusUpdate::disconnected()));

        assert_eq!(
            rx.try_recv().unwrap(),
            ShellEvent::StatusChanged(StatusUpdate::disconnected())
        );

        // Dropped receiver is not an error
        drop(rx);
        tx.emit(ShellEvent::StatusChanged(StatusUpdate::connected()));
    }
}
