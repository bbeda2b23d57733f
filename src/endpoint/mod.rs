//! Management endpoint abstraction.
//!
//! A [`ManagementClient`] opens a [`ManagementSession`] against the
//! virtualization management endpoint; the session confirms it is talking
//! to a healthy management cluster and opens [`GuestChannel`]s to VMs.

pub mod dry_run;
pub mod local;

use anyhow::Result;

pub use dry_run::DryRunClient;
pub use local::LocalClient;

use crate::guest::GuestChannel;

/// Identity of the VM and guest account a channel is bound to.
#[derive(Debug, Clone, Copy)]
pub struct GuestTarget<'a> {
    pub vm_name: &'a str,
    pub datacenter: Option<&'a str>,
    pub username: &'a str,
    pub password: &'a str,
}

/// Credentials for the management endpoint.
#[derive(Debug, Clone, Copy)]
pub struct EndpointCredentials<'a> {
    /// Endpoint SDK URL (e.g., `https://vc.example.com/sdk`).
    pub url: &'a str,
    pub username: &'a str,
    pub password: &'a str,
    /// Skip TLS certificate verification.
    pub insecure: bool,
}

/// Factory for management sessions.
pub trait ManagementClient: Send + Sync {
    /// Returns the name of this transport.
    fn name(&self) -> &'static str;

    /// Opens a session to the management endpoint.
    fn connect(&self, credentials: &EndpointCredentials<'_>) -> Result<Box<dyn ManagementSession>>;
}

/// A live session to the management endpoint.
pub trait ManagementSession: Send + Sync {
    /// Returns true if the endpoint is the expected kind of management
    /// cluster and the session is valid.
    fn is_healthy_cluster(&self) -> Result<bool>;

    /// Opens a guest agent channel for `target`.
    fn open_guest(&self, target: &GuestTarget<'_>) -> Result<Box<dyn GuestChannel>>;
}
