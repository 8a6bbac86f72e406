//! Pre-create checks: local option consistency first, then read-only
//! lookups against the provider. Nothing is mutated.

use tracing::info;

use crate::config::{CUSTOM_OS_ID, DriverConfig, OPT_BOOT_SCRIPT, OPT_PXE_SCRIPT, OPT_USERDATA};
use crate::types::SshKeyRecord;
use crate::{Error, ProviderClient, Result, ValidationError};

/// Facts established by a successful validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Validated {
    /// Image id to send on create, after the snapshot substitution.
    pub os_id: u32,
    /// The provider key named by `ssh_key_id`, when one was given.
    pub existing_key: Option<SshKeyRecord>,
}

/// Option combinations that are wrong regardless of provider state.
///
/// Runs against the configured image id, before any snapshot substitution.
pub fn check_options(config: &DriverConfig) -> Result<()> {
    let custom_os = config.is_custom_os();

    if let Some(path) = &config.user_data_file {
        if custom_os {
            return Err(Error::Config(format!(
                "--{OPT_USERDATA} does currently not support 'Custom OS' (OS ID {CUSTOM_OS_ID})"
            )));
        }
        if !path.exists() {
            return Err(Error::Config(format!(
                "unable to find user data file at {}",
                path.display()
            )));
        }
    }

    if config.pxe_script_id.is_some() && config.boot_script_id.is_some() {
        return Err(Error::Config(format!(
            "--{OPT_PXE_SCRIPT} and --{OPT_BOOT_SCRIPT} are mutually exclusive"
        )));
    }

    if config.pxe_script_id.is_some() && !custom_os {
        return Err(Error::Config(format!(
            "--{OPT_PXE_SCRIPT} requires the 'Custom OS' (OS ID {CUSTOM_OS_ID})"
        )));
    }

    if config.boot_script_id.is_some() && custom_os {
        return Err(Error::Config(format!(
            "--{OPT_BOOT_SCRIPT} can't be used with the 'Custom OS' (OS ID {CUSTOM_OS_ID})"
        )));
    }

    Ok(())
}

/// Run every check in order, stopping at the first failure.
pub async fn validate(client: &dyn ProviderClient, config: &DriverConfig) -> Result<Validated> {
    check_options(config)?;
    info!(machine = %config.machine_name, "validating Vultr VPS parameters");

    let os_id = config.effective_os_id();
    if os_id != config.os_id {
        info!(os_id, "restoring from snapshot, using snapshot image id");
    }

    let existing_key = match &config.ssh_key_id {
        Some(id) => {
            let key = client
                .list_ssh_keys()
                .await?
                .into_iter()
                .find(|k| &k.id == id)
                .ok_or_else(|| ValidationError::SshKeyNotFound(id.clone()))?;
            info!(key_id = %key.id, name = %key.name, "using existing SSH public key");
            Some(key)
        }
        None => None,
    };

    let regions = client.list_regions().await?;
    if !regions.contains(&config.region_id) {
        return Err(ValidationError::InvalidRegion(config.region_id).into());
    }

    let available = client.available_plans(config.region_id).await?;
    if !available.contains(&config.plan_id) {
        return Err(ValidationError::InvalidPlan {
            plan: config.plan_id,
            region: config.region_id,
            available,
        }
        .into());
    }

    client
        .account_info()
        .await
        .map_err(ValidationError::Auth)?;

    Ok(Validated {
        os_id,
        existing_key,
    })
}
