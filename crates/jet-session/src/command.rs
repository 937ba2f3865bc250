//! Command surface
//!
//! The small request/reply interface an external shell drives. Requests use
//! the method-channel shape `{"method": .., "arguments": {..}}`; nothing is
//! thrown across this boundary, every failure becomes a reply value.

use crate::assets::ConfigSource;
use crate::manager::{SessionManager, SessionStatus};
use crate::store::StateStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Method names the surface understands
const KNOWN_METHODS: &[&str] = &[
    "connectVPN",
    "disconnectVPN",
    "getVPNStatus",
    "getAvailableConfigs",
];

/// Requests accepted from the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "method", content = "arguments")]
pub enum CommandRequest {
    #[serde(rename = "connectVPN", rename_all = "camelCase")]
    Connect { config_content: String },

    #[serde(rename = "disconnectVPN")]
    Disconnect,

    #[serde(rename = "getVPNStatus")]
    GetStatus,

    #[serde(rename = "getAvailableConfigs")]
    ListConfigs,
}

/// Replies sent back to the shell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandReply {
    Bool(bool),
    Configs(Vec<String>),
    NotImplemented { not_implemented: String },
}

/// Dispatches shell commands to the session manager
pub struct CommandSurface {
    manager: SessionManager,
    store: Arc<dyn StateStore>,
    configs: Box<dyn ConfigSource>,
}

impl CommandSurface {
    /// `store` must be the same store the manager persists to
    pub fn new(
        manager: SessionManager,
        store: Arc<dyn StateStore>,
        configs: impl ConfigSource + 'static,
    ) -> Self {
        Self {
            manager,
            store,
            configs: Box::new(configs),
        }
    }

    /// Handle a typed request
    pub fn handle(&self, request: CommandRequest) -> CommandReply {
        match request {
            CommandRequest::Connect { config_content } => {
                CommandReply::Bool(self.connect(&config_content))
            }
            CommandRequest::Disconnect => CommandReply::Bool(self.disconnect()),
            CommandRequest::GetStatus => CommandReply::Bool(self.is_connected()),
            CommandRequest::ListConfigs => CommandReply::Configs(self.available_configs()),
        }
    }

    /// Handle a JSON-encoded request and return the JSON reply.
    ///
    /// Unknown methods reply `{"not_implemented": <method>}`; a known method
    /// with missing or malformed arguments replies `false`.
    pub fn handle_json(&self, request: &str) -> String {
        let reply = match serde_json::from_str::<CommandRequest>(request) {
            Ok(request) => self.handle(request),
            Err(e) => {
                let method = method_name(request);
                if KNOWN_METHODS.contains(&method.as_str()) {
                    warn!("Bad arguments for {}: {}", method, e);
                    CommandReply::Bool(false)
                } else {
                    debug!("Undecodable command ({}): {}", e, request);
                    CommandReply::NotImplemented {
                        not_implemented: method,
                    }
                }
            }
        };

        serde_json::to_string(&reply).unwrap_or_else(|_| "false".to_string())
    }

    /// Start a connection. `false` only when the request was refused outright.
    pub fn connect(&self, config_content: &str) -> bool {
        match self.manager.connect(config_content) {
            Ok(_) => true,
            Err(e) => {
                warn!("Connect refused: {}", e);
                false
            }
        }
    }

    pub fn disconnect(&self) -> bool {
        match self.manager.disconnect() {
            Ok(_) => true,
            Err(e) => {
                warn!("Disconnect refused: {}", e);
                false
            }
        }
    }

    /// Last persisted connection flag
    pub fn is_connected(&self) -> bool {
        self.store.load().unwrap_or_else(|e| {
            warn!("Failed to read connection state: {}", e);
            false
        })
    }

    /// Configuration identifiers offered to the user
    pub fn available_configs(&self) -> Vec<String> {
        self.configs.list().unwrap_or_else(|e| {
            warn!("Failed to list configs: {}", e);
            Vec::new()
        })
    }

    /// Full text of a named configuration
    pub fn read_config(&self, id: &str) -> Option<String> {
        match self.configs.read(id) {
            Ok(content) => Some(content),
            Err(e) => {
                warn!("Failed to read config {}: {}", id, e);
                None
            }
        }
    }

    /// In-memory session status
    pub fn status(&self) -> SessionStatus {
        self.manager.status()
    }

    /// Stop the session manager, releasing any live tunnel
    pub fn shutdown(&mut self) {
        self.manager.shutdown();
    }
}

fn method_name(request: &str) -> String {
    serde_json::from_str::<serde_json::Value>(request)
        .ok()
        .and_then(|v| v.get("method").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::DirectoryConfigSource;
    use crate::store::MemoryStateStore;
    use crate::tunnel::{DelayNegotiator, VirtualBackend};
    use std::time::Duration;

    fn surface(store: Arc<MemoryStateStore>, dir: &std::path::Path) -> CommandSurface {
        let manager = SessionManager::builder(
            VirtualBackend::new(),
            DelayNegotiator::new(Duration::from_millis(1)),
        )
        .store(store.clone())
        .start()
        .unwrap();

        CommandSurface::new(manager, store, DirectoryConfigSource::new(dir))
    }

    #[test]
    fn test_request_shape() {
        let request: CommandRequest = serde_json::from_str(
            r#"{"method":"connectVPN","arguments":{"configContent":"remote a 1"}}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            CommandRequest::Connect {
                config_content: "remote a 1".into()
            }
        );

        let request: CommandRequest =
            serde_json::from_str(r#"{"method":"getVPNStatus"}"#).unwrap();
        assert_eq!(request, CommandRequest::GetStatus);
    }

    #[test]
    fn test_status_reads_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStateStore::new());
        let surface = surface(store.clone(), dir.path());

        assert_eq!(surface.handle(CommandRequest::GetStatus), CommandReply::Bool(false));

        // The surface reports the persisted flag, not the in-memory phase
        store.save(true).unwrap();
        assert_eq!(surface.handle(CommandRequest::GetStatus), CommandReply::Bool(true));
    }

    #[test]
    fn test_connect_replies() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(Arc::new(MemoryStateStore::new()), dir.path());

        assert_eq!(surface.handle_json(
            r#"{"method":"connectVPN","arguments":{"configContent":"auth-user-pass\n"}}"#
        ), "false");
        assert_eq!(surface.handle_json(
            r#"{"method":"connectVPN","arguments":{"configContent":"remote a.example.com\n"}}"#
        ), "true");
        assert_eq!(surface.handle_json(r#"{"method":"disconnectVPN"}"#), "true");
    }

    #[test]
    fn test_list_configs() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.ovpn"), "remote b").unwrap();
        std::fs::write(dir.path().join("a.ovpn"), "remote a").unwrap();
        let surface = surface(Arc::new(MemoryStateStore::new()), dir.path());

        assert_eq!(
            surface.handle_json(r#"{"method":"getAvailableConfigs"}"#),
            r#"["a.ovpn","b.ovpn"]"#
        );
        assert_eq!(surface.read_config("a.ovpn").as_deref(), Some("remote a"));
        assert_eq!(surface.read_config("zzz.ovpn"), None);
    }

    #[test]
    fn test_unknown_method() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(Arc::new(MemoryStateStore::new()), dir.path());

        assert_eq!(
            surface.handle_json(r#"{"method":"rebootDevice"}"#),
            r#"{"not_implemented":"rebootDevice"}"#
        );
        assert_eq!(
            surface.handle_json("garbage"),
            r#"{"not_implemented":""}"#
        );
    }

    #[test]
    fn test_known_method_with_bad_arguments() {
        let dir = tempfile::tempdir().unwrap();
        let surface = surface(Arc::new(MemoryStateStore::new()), dir.path());

        assert_eq!(surface.handle_json(r#"{"method":"connectVPN"}"#), "false");
        assert_eq!(
            surface.handle_json(r#"{"method":"connectVPN","arguments":{"configContent":7}}"#),
            "false"
        );
        assert_eq!(surface.status().phase, crate::manager::Phase::Disconnected);
    }
}
