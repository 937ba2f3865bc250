//! Jet Session - VPN session lifecycle manager
//!
//! Turns a textual tunnel configuration into a live VPN session and keeps
//! one authoritative connection state under concurrent start/stop requests.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     External Shell (UI)                      │
//! └───────┬──────────────────────────────────────────▲───────────┘
//!         │ CommandSurface                           │ EventSink
//!         ▼                                          │
//! ┌──────────────────┐  jobs (FIFO)  ┌───────────────┴──────────┐
//! │  SessionManager  │──────────────▶│      Session worker      │
//! │  parse, admit,   │               │  establish ─▶ negotiate  │
//! │  status snapshot │◀──────────────│  release, persist, emit  │
//! └──────────────────┘    status     └──────┬───────────┬───────┘
//!                                           │           │
//!                                           ▼           ▼
//!                                   TunnelBackend   StateStore
//! ```
//!
//! # Guarantees
//!
//! - At most one live tunnel handle, released on every exit from
//!   Connecting/Connected
//! - Commands run strictly in submission order on a single worker
//! - Every failed attempt records `last_error` and emits exactly one error
//! - The persisted flag equals `phase == Connected` after each settled
//!   transition

mod assets;
mod command;
mod config;
mod event;
mod manager;
mod store;
mod tunnel;
mod worker;

pub use assets::{AssetError, ConfigSource, DirectoryConfigSource, CONFIG_EXTENSION};
pub use command::{CommandReply, CommandRequest, CommandSurface};
pub use config::{ConfigError, SessionConfig, DEFAULT_PORT};
pub use event::{ErrorKind, EventSink, LogSink, ShellEvent, StatusUpdate};
pub use manager::{Admission, Phase, SessionBuilder, SessionError, SessionManager, SessionStatus};
pub use store::{FileStateStore, MemoryStateStore, StateStore, StoreError, CONNECTED_KEY};
pub use tunnel::{
    DelayNegotiator, InterfaceSettings, Negotiator, Route, TunnelBackend, TunnelDevice,
    TunnelError, TunnelHandle, VirtualBackend, DEFAULT_MTU,
};
