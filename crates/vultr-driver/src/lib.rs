//! Lifecycle driver for a single Vultr virtual machine.
//!
//! [`Driver`] takes a validated [`DriverConfig`] and walks one machine through
//! creation, address acquisition, power transitions and teardown. All provider
//! access goes through the narrow [`ProviderClient`] trait; [`vultr`] adapts
//! it onto `vultr_api::VultrClient`.

pub mod boot;
pub mod config;
pub mod driver;
pub mod keys;
pub mod machine;
pub mod state;
pub mod types;
pub mod validate;
pub mod vultr;

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use types::{AccountSummary, ScriptKind, ServerSpec, ServerStatus, SshKeyRecord};

pub use config::{DRIVER_OPTIONS, DriverConfig, DriverOption, OptionKind, OptionValues};
pub use driver::{Driver, PollPolicy};
pub use machine::{Attached, Ownership, ProvisionedMachine};
pub use state::MachineState;

/// Name the orchestrator knows this driver by.
pub const DRIVER_NAME: &str = "vultr";

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Config(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("boot document error: {0}")]
    Template(String),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("teardown failed: {0}")]
    Teardown(#[source] ProviderError),

    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("host is not running")]
    NotRunning,

    #[error("IP address is not set")]
    AddressNotSet,

    #[error("ssh key error: {0}")]
    Key(#[from] keys::KeyError),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pre-flight failures found by cross-checking the configuration against
/// live provider data.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("region ID {0} is invalid")]
    InvalidRegion(u32),

    #[error("plan ID {plan} not available in region {region}; available plans: {available:?}")]
    InvalidPlan {
        plan: u32,
        region: u32,
        available: Vec<u32>,
    },

    #[error("API credentials rejected: {0}")]
    Auth(#[source] ProviderError),

    #[error("SSH key with ID {0} doesn't exist")]
    SshKeyNotFound(String),
}

/// Failures while creating the server or waiting for it to come up.
#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error("{0}")]
    Client(#[from] ProviderError),

    #[error("unable to read user data file {}: {source}", path.display())]
    UserData {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cancelled while waiting for an IP address")]
    Cancelled,

    #[error("no IP address assigned after {attempts} attempts")]
    AddressTimeout { attempts: u32 },
}

// ── Provider capability ──────────────────────────────────────────────

/// Coarse classification of provider failures.
///
/// Teardown only ever tolerates [`ProviderErrorKind::NotFound`]; recognising
/// provider-specific error text is the adapter's job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    NotFound,
    Unauthorized,
    Transport,
    Api,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotFound => "not found",
            Self::Unauthorized => "unauthorized",
            Self::Transport => "transport",
            Self::Api => "api",
        })
    }
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn new(kind: ProviderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProviderErrorKind::NotFound, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

pub type ProviderResult<T> = std::result::Result<T, ProviderError>;

/// The narrow slice of the cloud API the driver needs.
///
/// Implementations own transport concerns (signing, pagination, retries).
#[async_trait]
pub trait ProviderClient: Send + Sync + 'static {
    /// Create a server. Returns the provider-assigned instance id.
    async fn create_server(&self, spec: &ServerSpec) -> ProviderResult<String>;

    /// Fetch the raw status fields and addresses of a server.
    async fn get_server(&self, id: &str) -> ProviderResult<ServerStatus>;

    async fn start_server(&self, id: &str) -> ProviderResult<()>;

    /// Forced power-off.
    async fn halt_server(&self, id: &str) -> ProviderResult<()>;

    async fn reboot_server(&self, id: &str) -> ProviderResult<()>;

    async fn delete_server(&self, id: &str) -> ProviderResult<()>;

    /// Register a public key. Returns the new key id.
    async fn create_ssh_key(&self, name: &str, public_key: &str) -> ProviderResult<String>;

    async fn list_ssh_keys(&self) -> ProviderResult<Vec<SshKeyRecord>>;

    async fn delete_ssh_key(&self, id: &str) -> ProviderResult<()>;

    /// Upload a startup script. Returns the new script id.
    async fn create_startup_script(
        &self,
        name: &str,
        content: &str,
        kind: ScriptKind,
    ) -> ProviderResult<u32>;

    async fn delete_startup_script(&self, id: u32) -> ProviderResult<()>;

    /// Ids of every region the account can deploy to.
    async fn list_regions(&self) -> ProviderResult<Vec<u32>>;

    /// Plan ids currently orderable in `region_id`.
    async fn available_plans(&self, region_id: u32) -> ProviderResult<Vec<u32>>;

    async fn account_info(&self) -> ProviderResult<AccountSummary>;
}
