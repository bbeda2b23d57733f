//! Management client that logs instead of connecting.

use anyhow::Result;
use tracing::info;

use super::{EndpointCredentials, GuestTarget, ManagementClient, ManagementSession};
use crate::guest::{DryRunGuest, GuestChannel};

/// Dry-run management client; every session is healthy.
#[derive(Debug, Default, Clone)]
pub struct DryRunClient {
    guest_family: Option<String>,
}

impl DryRunClient {
    pub fn new(guest_family: Option<String>) -> Self {
        Self { guest_family }
    }
}

impl ManagementClient for DryRunClient {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    fn connect(&self, credentials: &EndpointCredentials<'_>) -> Result<Box<dyn ManagementSession>> {
        info!("dry run: connect to {} as {}", credentials.url, credentials.username);
        Ok(Box::new(DryRunSession {
            guest_family: self.guest_family.clone(),
        }))
    }
}

struct DryRunSession {
    guest_family: Option<String>,
}

impl ManagementSession for DryRunSession {
    fn is_healthy_cluster(&self) -> Result<bool> {
        Ok(true)
    }

    fn open_guest(&self, target: &GuestTarget<'_>) -> Result<Box<dyn GuestChannel>> {
        info!(
            "dry run: open guest {} (datacenter: {}) as {}",
            target.vm_name,
            target.datacenter.unwrap_or("default"),
            target.username
        );
        Ok(Box::new(DryRunGuest::new(target.vm_name, self.guest_family.clone())))
    }
}
