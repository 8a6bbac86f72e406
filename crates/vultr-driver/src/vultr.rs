use async_trait::async_trait;
use tracing::{debug, info};

use crate::types::{AccountSummary, ScriptKind, ServerSpec, ServerStatus, SshKeyRecord};
use crate::{ProviderClient, ProviderError, ProviderErrorKind, ProviderResult};

/// Retries the HTTP client performs on transient failures.
pub const CLIENT_MAX_RETRIES: u32 = 4;

/// Vultr v1 API provider.
///
/// Delegates to `vultr_api::VultrClient` for all HTTP calls and classifies
/// its errors into [`ProviderErrorKind`]s.
pub struct VultrProvider {
    client: vultr_api::VultrClient,
}

impl VultrProvider {
    /// Build a client for `api_key`. An empty `endpoint` selects the public API.
    pub fn new(api_key: &str, endpoint: Option<&str>) -> Self {
        let client = vultr_api::VultrClient::new(
            api_key,
            vultr_api::Options {
                endpoint: endpoint.map(str::to_string),
                max_retries: CLIENT_MAX_RETRIES,
                ..vultr_api::Options::default()
            },
        );
        debug!(endpoint = client.endpoint(), "vultr: client ready");
        Self { client }
    }

    fn parse_id(raw: &str) -> ProviderResult<u32> {
        raw.parse::<u32>().map_err(|_| {
            ProviderError::new(ProviderErrorKind::Api, format!("invalid numeric id: {raw}"))
        })
    }
}

impl From<vultr_api::Error> for ProviderError {
    fn from(e: vultr_api::Error) -> Self {
        let kind = if e.is_not_found() {
            ProviderErrorKind::NotFound
        } else if e.is_unauthorized() {
            ProviderErrorKind::Unauthorized
        } else {
            match e {
                vultr_api::Error::Request(_) => ProviderErrorKind::Transport,
                _ => ProviderErrorKind::Api,
            }
        };
        ProviderError::new(kind, e.to_string())
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.clone().filter(|v| !v.is_empty())
}

#[async_trait]
impl ProviderClient for VultrProvider {
    async fn create_server(&self, spec: &ServerSpec) -> ProviderResult<String> {
        let options = vultr_api::ServerOptions {
            label: Some(spec.name.clone()),
            hostname: Some(spec.name.clone()),
            ssh_key_id: non_empty(&spec.ssh_key_id),
            script_id: spec.script_id,
            snapshot_id: non_empty(&spec.snapshot_id),
            user_data: Some(spec.user_data.clone()).filter(|u| !u.is_empty()),
            ipv6: spec.ipv6,
            private_networking: spec.private_networking,
            auto_backups: spec.backups,
            notify_activate: false,
            tag: non_empty(&spec.tag),
            firewall_group_id: non_empty(&spec.firewall_group_id),
            reserved_ip: non_empty(&spec.reserved_ip),
        };

        let id = self
            .client
            .create_server(&spec.name, spec.region_id, spec.plan_id, spec.os_id, &options)
            .await?;

        info!(server_id = %id, "vultr: server created");
        Ok(id)
    }

    async fn get_server(&self, id: &str) -> ProviderResult<ServerStatus> {
        let server = self.client.get_server(id).await?;
        Ok(ServerStatus {
            status: server.status,
            server_state: server.server_state,
            power_status: server.power_status,
            main_ip: server.main_ip,
            internal_ip: server.internal_ip,
        })
    }

    async fn start_server(&self, id: &str) -> ProviderResult<()> {
        self.client.start_server(id).await?;
        info!(server_id = %id, "vultr: server started");
        Ok(())
    }

    async fn halt_server(&self, id: &str) -> ProviderResult<()> {
        self.client.halt_server(id).await?;
        info!(server_id = %id, "vultr: server halted");
        Ok(())
    }

    async fn reboot_server(&self, id: &str) -> ProviderResult<()> {
        self.client.reboot_server(id).await?;
        info!(server_id = %id, "vultr: server rebooted");
        Ok(())
    }

    async fn delete_server(&self, id: &str) -> ProviderResult<()> {
        self.client.delete_server(id).await?;
        info!(server_id = %id, "vultr: server destroyed");
        Ok(())
    }

    async fn create_ssh_key(&self, name: &str, public_key: &str) -> ProviderResult<String> {
        let id = self.client.create_ssh_key(name, public_key).await?;
        info!(key_id = %id, "vultr: ssh key registered");
        Ok(id)
    }

    async fn list_ssh_keys(&self) -> ProviderResult<Vec<SshKeyRecord>> {
        let keys = self.client.list_ssh_keys().await?;
        Ok(keys
            .into_iter()
            .map(|k| SshKeyRecord {
                id: k.id,
                name: k.name,
                public_key: k.public_key,
            })
            .collect())
    }

    async fn delete_ssh_key(&self, id: &str) -> ProviderResult<()> {
        self.client.delete_ssh_key(id).await?;
        info!(key_id = %id, "vultr: ssh key deleted");
        Ok(())
    }

    async fn create_startup_script(
        &self,
        name: &str,
        content: &str,
        kind: ScriptKind,
    ) -> ProviderResult<u32> {
        let kind = match kind {
            ScriptKind::Boot => vultr_api::ScriptType::Boot,
            ScriptKind::Pxe => vultr_api::ScriptType::Pxe,
        };
        let raw = self.client.create_startup_script(name, content, kind).await?;
        let id = Self::parse_id(&raw)?;
        info!(script_id = id, kind = kind.as_str(), "vultr: startup script created");
        Ok(id)
    }

    async fn delete_startup_script(&self, id: u32) -> ProviderResult<()> {
        self.client.delete_startup_script(&id.to_string()).await?;
        info!(script_id = id, "vultr: startup script deleted");
        Ok(())
    }

    async fn list_regions(&self) -> ProviderResult<Vec<u32>> {
        let regions = self.client.list_regions().await?;
        Ok(regions.iter().filter_map(vultr_api::Region::dcid).collect())
    }

    async fn available_plans(&self, region_id: u32) -> ProviderResult<Vec<u32>> {
        Ok(self.client.available_plans(region_id).await?)
    }

    async fn account_info(&self) -> ProviderResult<AccountSummary> {
        let info = self.client.account_info().await?;
        Ok(AccountSummary {
            balance: info.balance,
            pending_charges: info.pending_charges,
        })
    }
}
