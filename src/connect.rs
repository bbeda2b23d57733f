//! Management endpoint and guest agent readiness.

use anyhow::{Result, bail};

use crate::cancel::CancellationToken;
use crate::config::ProvisioningConfig;
use crate::endpoint::{EndpointCredentials, GuestTarget, ManagementClient, ManagementSession};
use crate::error::ProvisionError;
use crate::guest::GuestChannel;
use crate::output::OutputSink;
use crate::retry::{ProbeMessages, RetryPolicy, Sleeper, retry_until_ready};

/// Connects to the management endpoint and waits until it reports a
/// healthy cluster.
///
/// Each attempt opens a fresh session; an unhealthy session is discarded.
pub fn wait_for_endpoint(
    client: &dyn ManagementClient,
    credentials: &EndpointCredentials<'_>,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    sink: &dyn OutputSink,
) -> Result<Box<dyn ManagementSession>, ProvisionError> {
    retry_until_ready(
        policy,
        ProbeMessages {
            target: "management endpoint",
            waiting: "testing client connectivity to the management endpoint...",
            ready: "client connection to the management endpoint successful",
        },
        cancel,
        sleeper,
        sink,
        |_| -> Result<Box<dyn ManagementSession>> {
            let session = client.connect(credentials)?;
            if !session.is_healthy_cluster()? {
                bail!("{} is not a healthy management cluster", credentials.url);
            }
            Ok(session)
        },
    )
}

/// Waits until the guest agent accepts the guest credentials.
pub fn wait_for_guest(
    guest: &dyn GuestChannel,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    sink: &dyn OutputSink,
) -> Result<(), ProvisionError> {
    retry_until_ready(
        policy,
        ProbeMessages {
            target: "guest agent",
            waiting: "connecting to guest...",
            ready: "connection successful, guest agent healthy",
        },
        cancel,
        sleeper,
        sink,
        |_| guest.test_credentials(),
    )
}

/// Runs both readiness loops for `config` and returns the live session and
/// guest channel.
pub fn establish(
    config: &ProvisioningConfig,
    client: &dyn ManagementClient,
    cancel: &CancellationToken,
    sleeper: &dyn Sleeper,
    sink: &dyn OutputSink,
) -> Result<(Box<dyn ManagementSession>, Box<dyn GuestChannel>), ProvisionError> {
    let url = config.sdk_url();
    let credentials = EndpointCredentials {
        url: &url,
        username: config.username(),
        password: config.password(),
        insecure: config.connection.insecure,
    };
    tracing::info!(transport = client.name(), "connecting to {}", url);
    let session = wait_for_endpoint(
        client,
        &credentials,
        &config.endpoint_retry(),
        cancel,
        sleeper,
        sink,
    )?;

    let target = GuestTarget {
        vm_name: &config.target.vm_name,
        datacenter: config.connection.datacenter.as_deref(),
        username: config.guest_username(),
        password: config.guest_password(),
    };
    let guest = session.open_guest(&target).map_err(|e| ProvisionError::Connectivity {
        target: format!("vm {}", config.target.vm_name),
        attempts: 1,
        message: format!("{:#}", e),
    })?;

    wait_for_guest(guest.as_ref(), &config.guest_retry(), cancel, sleeper, sink)?;
    Ok((session, guest))
}
