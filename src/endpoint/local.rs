//! Loopback management client backed by [`LocalGuest`].

use std::sync::Arc;

use anyhow::Result;
use camino::Utf8PathBuf;

use super::{EndpointCredentials, GuestTarget, ManagementClient, ManagementSession};
use crate::cancel::CancellationToken;
use crate::executor::CommandExecutor;
use crate::guest::{GuestChannel, LocalGuest};

/// Management client whose guests live under a host directory.
pub struct LocalClient {
    root: Utf8PathBuf,
    guest_family: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
}

impl LocalClient {
    pub fn new(
        root: Utf8PathBuf,
        guest_family: Option<String>,
        executor: Arc<dyn CommandExecutor>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            root,
            guest_family,
            executor,
            cancel,
        }
    }
}

impl ManagementClient for LocalClient {
    fn name(&self) -> &'static str {
        "local"
    }

    fn connect(&self, credentials: &EndpointCredentials<'_>) -> Result<Box<dyn ManagementSession>> {
        tracing::debug!("local transport: ignoring endpoint {}", credentials.url);
        Ok(Box::new(LocalSession {
            root: self.root.clone(),
            guest_family: self.guest_family.clone(),
            executor: Arc::clone(&self.executor),
            cancel: self.cancel.clone(),
        }))
    }
}

struct LocalSession {
    root: Utf8PathBuf,
    guest_family: Option<String>,
    executor: Arc<dyn CommandExecutor>,
    cancel: CancellationToken,
}

impl ManagementSession for LocalSession {
    fn is_healthy_cluster(&self) -> Result<bool> {
        Ok(true)
    }

    fn open_guest(&self, target: &GuestTarget<'_>) -> Result<Box<dyn GuestChannel>> {
        tracing::debug!("local transport: guest {} rooted at {}", target.vm_name, self.root);
        Ok(Box::new(LocalGuest::new(
            self.root.clone(),
            self.guest_family.clone(),
            Arc::clone(&self.executor),
            self.cancel.clone(),
        )))
    }
}
