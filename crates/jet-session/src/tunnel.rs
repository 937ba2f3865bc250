//! Tunnel Interface
//!
//! Abstraction over the privileged virtual network device and the remote
//! negotiation step.
//!
//! # Lifecycle
//!
//! ```text
//! establish(settings) ──▶ TunnelHandle ──▶ negotiate(config, device)
//!                              │
//!                              └──▶ release() (idempotent, also on Drop)
//! ```
//!
//! The platform owns the real device (a mobile VPN service, a TUN driver),
//! so both the device allocator and the negotiator are traits. The crate
//! ships an in-process [`VirtualBackend`] and a [`DelayNegotiator`] that
//! stands in for the protocol handshake.

use crate::config::SessionConfig;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Interface MTU
pub const DEFAULT_MTU: u16 = 1500;

/// Smallest MTU an IPv4 interface may use
const MIN_MTU: u16 = 576;

/// A route pushed into the tunnel interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Network address
    pub addr: IpAddr,
    /// Prefix length
    pub prefix: u8,
}

impl Route {
    /// Create a new route
    pub fn new(addr: IpAddr, prefix: u8) -> Self {
        Self { addr, prefix }
    }

    /// Catch-all IPv4 route (0.0.0.0/0)
    pub fn default_v4() -> Self {
        Self::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

/// Settings applied to every allocated tunnel interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfaceSettings {
    /// Maximum transmission unit
    pub mtu: u16,
    /// Local tunnel address
    pub address: Ipv4Addr,
    /// Prefix length of the local tunnel address
    pub prefix_len: u8,
    /// DNS resolvers used inside the tunnel
    pub dns: Vec<IpAddr>,
    /// Routes sent through the tunnel
    pub routes: Vec<Route>,
}

impl Default for InterfaceSettings {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            address: Ipv4Addr::new(10, 8, 0, 2),
            prefix_len: 24,
            dns: vec![
                IpAddr::V4(Ipv4Addr::new(8, 8, 8, 8)),
                IpAddr::V4(Ipv4Addr::new(8, 8, 4, 4)),
            ],
            routes: vec![Route::default_v4()],
        }
    }
}

impl InterfaceSettings {
    /// Validate settings before they reach a backend
    pub fn validate(&self) -> Result<(), TunnelError> {
        if self.mtu < MIN_MTU {
            return Err(TunnelError::InvalidSettings(format!(
                "MTU {} is below the minimum of {}",
                self.mtu, MIN_MTU
            )));
        }
        if self.prefix_len > 32 {
            return Err(TunnelError::InvalidSettings(format!(
                "Address prefix /{} is out of range",
                self.prefix_len
            )));
        }
        if self.dns.is_empty() {
            return Err(TunnelError::InvalidSettings("No DNS servers configured".into()));
        }
        if let Some(route) = self.routes.iter().find(|r| r.prefix > max_prefix(&r.addr)) {
            return Err(TunnelError::InvalidSettings(format!("Invalid route {}", route)));
        }
        Ok(())
    }
}

fn max_prefix(addr: &IpAddr) -> u8 {
    match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    }
}

/// An allocated virtual network device
pub trait TunnelDevice: Send {
    /// Interface name
    fn name(&self) -> &str;

    /// Close the device. Closing twice must not fail.
    fn close(&mut self) -> Result<(), TunnelError>;
}

/// Allocator for privileged tunnel devices
pub trait TunnelBackend: Send {
    /// Allocate and configure a device.
    ///
    /// Returns [`TunnelError::PermissionDenied`] when the host has not been
    /// granted the right to create VPN interfaces.
    fn establish(
        &mut self,
        settings: &InterfaceSettings,
    ) -> Result<Box<dyn TunnelDevice>, TunnelError>;
}

/// Remote handshake and authentication over an established device
pub trait Negotiator: Send {
    /// Negotiate a session with the remote endpoint.
    ///
    /// Must be safe to call again on a fresh device after a failure.
    fn negotiate(
        &mut self,
        config: &SessionConfig,
        device: &mut dyn TunnelDevice,
    ) -> Result<(), TunnelError>;
}

/// Exclusively owned tunnel device.
///
/// The device is closed exactly once, by [`TunnelHandle::release`] or on drop.
pub struct TunnelHandle {
    device: Option<Box<dyn TunnelDevice>>,
    name: String,
}

impl TunnelHandle {
    /// Take ownership of an allocated device
    pub fn new(device: Box<dyn TunnelDevice>) -> Self {
        let name = device.name().to_string();
        Self {
            device: Some(device),
            name,
        }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the device is still open
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Borrow the open device
    pub fn device_mut(&mut self) -> Result<&mut dyn TunnelDevice, TunnelError> {
        match self.device.as_mut() {
            Some(device) => Ok(&mut **device),
            None => Err(TunnelError::Closed),
        }
    }

    /// Close the device. A no-op once released.
    pub fn release(&mut self) {
        let Some(mut device) = self.device.take() else {
            return;
        };

        match device.close() {
            Ok(()) => info!("Released tunnel interface {}", self.name),
            Err(e) => warn!("Error closing tunnel interface {}: {}", self.name, e),
        }
    }
}

impl Drop for TunnelHandle {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for TunnelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelHandle")
            .field("name", &self.name)
            .field("open", &self.is_open())
            .finish()
    }
}

/// In-process device allocator.
///
/// Clones share the same counters and permission gate, so a host can keep a
/// copy to grant permission or inspect allocations after handing one to the
/// session manager.
#[derive(Clone, Default)]
pub struct VirtualBackend {
    live: Arc<AtomicUsize>,
    allocations: Arc<AtomicU64>,
    denied: Arc<AtomicBool>,
}

impl VirtualBackend {
    /// Create a backend with permission granted
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices currently open
    pub fn live_devices(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Number of devices ever allocated
    pub fn allocations(&self) -> u64 {
        self.allocations.load(Ordering::SeqCst)
    }

    /// Refuse further allocations as if consent was withdrawn
    pub fn deny_permission(&self) {
        self.denied.store(true, Ordering::SeqCst);
    }

    /// Allow allocations again
    pub fn grant_permission(&self) {
        self.denied.store(false, Ordering::SeqCst);
    }
}

impl TunnelBackend for VirtualBackend {
    fn establish(
        &mut self,
        settings: &InterfaceSettings,
    ) -> Result<Box<dyn TunnelDevice>, TunnelError> {
        if self.denied.load(Ordering::SeqCst) {
            return Err(TunnelError::PermissionDenied);
        }
        settings.validate()?;

        let index = self.allocations.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);

        let name = format!("jet{}", index);
        debug!(
            "Allocated {} (mtu {}, addr {}/{}, dns {:?}, routes {})",
            name,
            settings.mtu,
            settings.address,
            settings.prefix_len,
            settings.dns,
            settings.routes.len()
        );

        Ok(Box::new(VirtualDevice {
            name,
            live: self.live.clone(),
            open: true,
        }))
    }
}

struct VirtualDevice {
    name: String,
    live: Arc<AtomicUsize>,
    open: bool,
}

impl TunnelDevice for VirtualDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<(), TunnelError> {
        if self.open {
            self.open = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl Drop for VirtualDevice {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

/// Negotiator that waits a fixed time and succeeds.
///
/// Replace with a real protocol implementation; this only models the
/// wall-clock cost of a handshake.
#[derive(Debug, Clone)]
pub struct DelayNegotiator {
    delay: Duration,
}

impl DelayNegotiator {
    /// Create with the given handshake time
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl Default for DelayNegotiator {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl Negotiator for DelayNegotiator {
    fn negotiate(
        &mut self,
        config: &SessionConfig,
        device: &mut dyn TunnelDevice,
    ) -> Result<(), TunnelError> {
        debug!(
            "Negotiating with {} over {} ({:?})",
            config.endpoint(),
            device.name(),
            self.delay
        );
        thread::sleep(self.delay);
        Ok(())
    }
}

/// Tunnel errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TunnelError {
    #[error("VPN permission denied")]
    PermissionDenied,

    #[error("Failed to establish tunnel interface: {0}")]
    EstablishFailed(String),

    #[error("Invalid interface settings: {0}")]
    InvalidSettings(String),

    #[error("Handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("Handshake timeout")]
    HandshakeTimeout,

    #[error("Tunnel interface closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = InterfaceSettings::default();

        assert_eq!(settings.mtu, 1500);
        assert_eq!(settings.address, Ipv4Addr::new(10, 8, 0, 2));
        assert_eq!(settings.dns.len(), 2);
        assert_eq!(settings.routes, vec![Route::default_v4()]);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = InterfaceSettings::default();
        settings.mtu = 100;
        assert!(matches!(settings.validate(), Err(TunnelError::InvalidSettings(_))));

        let mut settings = InterfaceSettings::default();
        settings.dns.clear();
        assert!(settings.validate().is_err());

        let mut settings = InterfaceSettings::default();
        settings.routes.push(Route::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 40));
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_virtual_backend_lifecycle() {
        let mut backend = VirtualBackend::new();
        let observer = backend.clone();

        let device = backend.establish(&InterfaceSettings::default()).unwrap();
        let mut handle = TunnelHandle::new(device);

        assert_eq!(handle.name(), "jet0");
        assert_eq!(observer.live_devices(), 1);

        handle.release();
        assert!(!handle.is_open());
        assert_eq!(observer.live_devices(), 0);

        // Second release is a no-op
        handle.release();
        assert_eq!(observer.live_devices(), 0);
        assert!(matches!(handle.device_mut(), Err(TunnelError::Closed)));
    }

    #[test]
    fn test_handle_releases_on_drop() {
        let mut backend = VirtualBackend::new();

        {
            let device = backend.establish(&InterfaceSettings::default()).unwrap();
            let _handle = TunnelHandle::new(device);
            assert_eq!(backend.live_devices(), 1);
        }

        assert_eq!(backend.live_devices(), 0);
        assert_eq!(backend.allocations(), 1);
    }

    #[test]
    fn test_permission_denied() {
        let mut backend = VirtualBackend::new();
        backend.deny_permission();

        let result = backend.establish(&InterfaceSettings::default());
        assert!(matches!(result, Err(TunnelError::PermissionDenied)));
        assert_eq!(backend.allocations(), 0);

        backend.grant_permission();
        assert!(backend.establish(&InterfaceSettings::default()).is_ok());
    }

    #[test]
    fn test_delay_negotiator() {
        let mut backend = VirtualBackend::new();
        let device = backend.establish(&InterfaceSettings::default()).unwrap();
        let mut handle = TunnelHandle::new(device);
        let config = SessionConfig::parse("remote vpn.example.com 443").unwrap();

        let mut negotiator = DelayNegotiator::new(Duration::from_millis(1));
        let device = handle.device_mut().unwrap();
        assert!(negotiator.negotiate(&config, device).is_ok());
    }
}
