//! The lifecycle controller for one machine.

use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::boot;
use crate::config::{DOCKER_PORT, DriverConfig};
use crate::keys::{self, KeyPairGenerator, RsaKeyGenerator};
use crate::machine::{Attached, ProvisionedMachine, is_assigned};
use crate::state::MachineState;
use crate::types::{ServerSpec, ServerStatus};
use crate::validate::{self, Validated};
use crate::vultr::VultrProvider;
use crate::{DRIVER_NAME, Error, ProviderClient, ProvisionError, Result};

const PRIVATE_KEY_FILE: &str = "id_rsa";

/// How `create` waits for the server's address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    /// `None` waits until cancelled.
    pub max_attempts: Option<u32>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            max_attempts: None,
        }
    }
}

/// Drives a single Vultr machine through its lifecycle.
///
/// Operations are sequential; the driver assumes it is the only writer of
/// its instance. State is always read fresh from the provider.
pub struct Driver {
    config: DriverConfig,
    machine: ProvisionedMachine,
    validated: Option<Validated>,
    poll: PollPolicy,
    cancel: CancellationToken,
    client: OnceLock<Arc<dyn ProviderClient>>,
    keygen: Arc<dyn KeyPairGenerator>,
}

impl Driver {
    /// A driver that talks to the Vultr API, connecting on first use.
    pub fn new(config: DriverConfig) -> Self {
        Self {
            config,
            machine: ProvisionedMachine::default(),
            validated: None,
            poll: PollPolicy::default(),
            cancel: CancellationToken::new(),
            client: OnceLock::new(),
            keygen: Arc::new(RsaKeyGenerator::default()),
        }
    }

    /// A driver using `client` instead of the Vultr API.
    pub fn with_client(config: DriverConfig, client: Arc<dyn ProviderClient>) -> Self {
        let driver = Self::new(config);
        // Freshly built, so the cell is empty.
        let _ = driver.client.set(client);
        driver
    }

    /// Resume managing a machine created earlier.
    pub fn restore(mut self, machine: ProvisionedMachine) -> Self {
        self.machine = machine;
        self
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    pub fn with_key_generator(mut self, keygen: Arc<dyn KeyPairGenerator>) -> Self {
        self.keygen = keygen;
        self
    }

    /// Cancelling this token aborts a `create` that is waiting for an address.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn driver_name(&self) -> &'static str {
        DRIVER_NAME
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn machine(&self) -> &ProvisionedMachine {
        &self.machine
    }

    fn client(&self) -> Arc<dyn ProviderClient> {
        self.client
            .get_or_init(|| {
                Arc::new(VultrProvider::new(
                    &self.config.api_key,
                    self.config.api_endpoint.as_deref(),
                ))
            })
            .clone()
    }

    fn instance_id(&self) -> Result<&str> {
        self.machine.instance_id.as_deref().ok_or_else(|| {
            Error::Config(format!(
                "machine {} has no instance id; it was never created",
                self.config.machine_name
            ))
        })
    }

    // ── SSH ──────────────────────────────────────────────────────────

    /// Path of the generated private key. `None` when a provider key is
    /// reused and nothing is written locally.
    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        self.config
            .ssh_key_id
            .is_none()
            .then(|| self.config.resolve_store_path(PRIVATE_KEY_FILE))
    }

    pub fn public_key_path(&self) -> Option<PathBuf> {
        self.ssh_key_path().map(|p| keys::public_key_path(&p))
    }

    /// The user to SSH in as; RancherOS provisioning overrides the config.
    pub fn get_ssh_username(&self) -> &str {
        self.machine
            .ssh_user
            .as_deref()
            .unwrap_or(&self.config.ssh_user)
    }

    pub fn get_ssh_port(&self) -> u16 {
        self.config.ssh_port
    }

    pub fn get_ssh_hostname(&self) -> Result<&str> {
        self.get_ip()
    }

    pub fn get_ip(&self) -> Result<&str> {
        if !self.machine.has_address() {
            return Err(Error::AddressNotSet);
        }
        Ok(&self.machine.public_ip)
    }

    // ── Create ───────────────────────────────────────────────────────

    /// Validate the configuration against the provider. Read-only.
    pub async fn pre_create_check(&mut self) -> Result<()> {
        let client = self.client();
        self.validated = Some(validate::validate(client.as_ref(), &self.config).await?);
        Ok(())
    }

    /// Create the server and wait for its public address.
    ///
    /// Validates first if [`Self::pre_create_check`] has not run. Side
    /// resources are recorded on the machine as soon as they exist, so
    /// `remove` can clean up after a failure at any later step.
    pub async fn create(&mut self) -> Result<()> {
        let client = self.client();
        let validated = match self.validated.take() {
            Some(v) => v,
            None => validate::validate(client.as_ref(), &self.config).await?,
        };
        self.validated = Some(validated.clone());

        let public_key = match &validated.existing_key {
            Some(key) => {
                self.machine.ssh_key = Some(Attached::external(key.id.clone()));
                key.public_key.clone()
            }
            None => self.register_new_key(client.as_ref()).await?,
        };

        info!(machine = %self.config.machine_name, "creating Vultr VPS");
        let boot = boot::build(client.as_ref(), &self.config, &public_key).await?;
        self.machine.script = boot.script.clone();
        if let Some(user) = boot.ssh_user {
            self.machine.ssh_user = Some(user);
        }

        let spec = ServerSpec {
            name: self.config.machine_name.clone(),
            region_id: self.config.region_id,
            plan_id: self.config.plan_id,
            os_id: validated.os_id,
            ssh_key_id: self.machine.ssh_key.as_ref().map(|k| k.id.clone()),
            script_id: boot.script.map(|s| s.id),
            snapshot_id: self.config.snapshot_id.clone(),
            user_data: boot.user_data,
            ipv6: self.config.ipv6,
            private_networking: self.config.private_networking,
            backups: self.config.backups,
            tag: self.config.tag.clone(),
            firewall_group_id: self.config.firewall_group_id.clone(),
            reserved_ip: self.config.reserved_ip.clone(),
        };

        let id = client
            .create_server(&spec)
            .await
            .map_err(ProvisionError::from)?;
        self.machine.instance_id = Some(id.clone());
        self.machine.created_at = Some(Utc::now());
        info!(
            server_id = %id,
            region = spec.region_id,
            plan = spec.plan_id,
            os = spec.os_id,
            "server created, waiting for IP address"
        );

        let status = self.wait_for_address(client.as_ref(), &id).await?;
        self.machine.public_ip = status.main_ip;
        self.machine.private_ip = if is_assigned(&status.internal_ip) {
            status.internal_ip
        } else {
            String::new()
        };

        info!(
            server_id = %id,
            ip = %self.machine.public_ip,
            private_ip = %self.machine.private_ip,
            "server ready"
        );
        Ok(())
    }

    async fn register_new_key(&mut self, client: &dyn ProviderClient) -> Result<String> {
        let path = self.config.resolve_store_path(PRIVATE_KEY_FILE);
        debug!(path = %path.display(), "generating SSH key");
        let public_key = self.keygen.generate(&path)?;

        let key_id = client
            .create_ssh_key(&self.config.machine_name, &public_key)
            .await
            .map_err(ProvisionError::from)?;
        info!(key_id = %key_id, "registered SSH key");
        self.machine.ssh_key = Some(Attached::created(key_id));
        Ok(public_key)
    }

    /// Poll until the server reports a real main address.
    ///
    /// Cancellation interrupts both the wait between polls and a status
    /// query still in flight. The create call itself is never interrupted:
    /// its id is what lets `remove` clean up.
    async fn wait_for_address(&self, client: &dyn ProviderClient, id: &str) -> Result<ServerStatus> {
        let mut attempts = 0u32;
        loop {
            let status = tokio::select! {
                biased;
                r = client.get_server(id) => r.map_err(ProvisionError::from)?,
                _ = self.cancel.cancelled() => {
                    warn!(server_id = %id, "cancelled during status query");
                    return Err(ProvisionError::Cancelled.into());
                }
            };
            attempts += 1;
            if is_assigned(&status.main_ip) {
                return Ok(status);
            }

            if let Some(max) = self.poll.max_attempts
                && attempts >= max
            {
                return Err(ProvisionError::AddressTimeout { attempts }.into());
            }

            debug!(server_id = %id, attempts, "no IP address yet");
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!(server_id = %id, "cancelled while waiting for IP address");
                    return Err(ProvisionError::Cancelled.into());
                }
                _ = tokio::time::sleep(self.poll.interval) => {}
            }
        }
    }

    // ── State ────────────────────────────────────────────────────────

    /// Query the provider for the current state.
    pub async fn get_state(&self) -> Result<MachineState> {
        let id = self.instance_id()?;
        let status = self.client().get_server(id).await?;
        Ok(MachineState::from(&status))
    }

    /// Like [`Self::get_state`], but reports a failed query as
    /// [`MachineState::Error`].
    pub async fn status(&self) -> MachineState {
        match self.get_state().await {
            Ok(state) => state,
            Err(e) => {
                warn!(machine = %self.config.machine_name, error = %e, "state query failed");
                MachineState::Error
            }
        }
    }

    /// `tcp://<ip>:2376`, only while the machine is running.
    pub async fn get_url(&self) -> Result<String> {
        if self.get_state().await? != MachineState::Running {
            return Err(Error::NotRunning);
        }
        let ip = self.get_ip()?;
        Ok(format!("tcp://{ip}:{DOCKER_PORT}"))
    }

    // ── Power ────────────────────────────────────────────────────────

    pub async fn start(&self) -> Result<()> {
        let state = self.get_state().await?;
        let id = self.instance_id()?;
        if matches!(state, MachineState::Running | MachineState::Starting) {
            info!(server_id = %id, %state, "host is already running or starting");
            return Ok(());
        }
        self.client().start_server(id).await?;
        info!(server_id = %id, "server started");
        Ok(())
    }

    pub async fn stop(&self) -> Result<()> {
        self.halt("stopped").await
    }

    /// Same as [`Self::stop`]; the provider has no harder power-off.
    pub async fn kill(&self) -> Result<()> {
        self.halt("killed").await
    }

    async fn halt(&self, verb: &str) -> Result<()> {
        let state = self.get_state().await?;
        let id = self.instance_id()?;
        if state == MachineState::Stopped {
            info!(server_id = %id, "host is already stopped");
            return Ok(());
        }
        self.client().halt_server(id).await?;
        info!(server_id = %id, "server {verb}");
        Ok(())
    }

    pub async fn restart(&self) -> Result<()> {
        let state = self.get_state().await?;
        let id = self.instance_id()?;
        if state == MachineState::Stopped {
            info!(server_id = %id, "host is stopped, use the start command");
            return Ok(());
        }
        self.client().reboot_server(id).await?;
        info!(server_id = %id, "server rebooted");
        Ok(())
    }

    // ── Remove ───────────────────────────────────────────────────────

    /// Delete the server, then any script and SSH key this driver created.
    ///
    /// Resources that are already gone are skipped, so calling this twice
    /// is safe. Caller-supplied scripts and keys are never touched.
    pub async fn remove(&self) -> Result<()> {
        let client = self.client();

        match self.machine.instance_id.as_deref() {
            Some(id) => match client.delete_server(id).await {
                Ok(()) => info!(server_id = %id, "server deleted"),
                Err(e) if e.is_not_found() => {
                    info!(server_id = %id, error = %e, "server not found, skipping")
                }
                Err(e) => return Err(Error::Teardown(e)),
            },
            None => info!(machine = %self.config.machine_name, "no instance id recorded, nothing to delete"),
        }

        if let Some(script_id) = self.machine.owned_script() {
            match client.delete_startup_script(script_id).await {
                Ok(()) => info!(script_id, "startup script deleted"),
                Err(e) if e.is_not_found() => {
                    info!(script_id, error = %e, "startup script not found, skipping")
                }
                Err(e) => return Err(Error::Teardown(e)),
            }
        }

        if let Some(key_id) = self.machine.owned_ssh_key() {
            match client.delete_ssh_key(key_id).await {
                Ok(()) => info!(key_id = %key_id, "SSH key deleted"),
                Err(e) if e.is_not_found() => {
                    info!(key_id = %key_id, error = %e, "SSH key not found, skipping")
                }
                Err(e) => return Err(Error::Teardown(e)),
            }
        }

        Ok(())
    }
}
