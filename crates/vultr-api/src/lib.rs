//! Typed Rust client for the Vultr v1 API.
//!
//! Covers the subset needed to drive a single machine:
//! servers (create, get, start, halt, reboot, destroy), SSH keys,
//! startup scripts, regions, plan availability and account info.
//!
//! Transient failures (transport errors, 429 and 5xx responses) are retried
//! a bounded number of times with exponential backoff. Everything else is
//! surfaced as [`Error::Api`] for the caller to classify.

mod types;

use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;

pub use reqwest::StatusCode;
pub use types::*;

const DEFAULT_ENDPOINT: &str = "https://api.vultr.com";
const DEFAULT_MAX_RETRIES: u32 = 4;
const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(500);

/// Response body fragments the v1 API uses when an id does not resolve.
/// The API answers these with HTTP 412 rather than 404.
const NOT_FOUND_MARKERS: &[&str] = &[
    "Invalid server",
    "Check SUBID",
    "Check SCRIPTID",
    "Invalid SSH Key",
    "Check SSHKEYID",
];

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("vultr api request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("vultr api {endpoint} returned {status}: {body}")]
    Api {
        endpoint: &'static str,
        status: StatusCode,
        body: String,
    },

    #[error("vultr api {endpoint} returned an unexpected body: {source}")]
    Decode {
        endpoint: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl Error {
    /// The referenced server, script or key does not exist (any more).
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::Api { status, body, .. } => {
                *status == StatusCode::NOT_FOUND
                    || (*status == StatusCode::PRECONDITION_FAILED
                        && NOT_FOUND_MARKERS.iter().any(|m| body.contains(m)))
            }
            _ => false,
        }
    }

    /// The API key was rejected or lacks permission.
    pub fn is_unauthorized(&self) -> bool {
        matches!(
            self,
            Error::Api { status, .. }
                if *status == StatusCode::UNAUTHORIZED || *status == StatusCode::FORBIDDEN
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Which failures a request may be retried on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Safe to repeat: reads, and actions on an existing id.
    Transient,
    /// Creates. Only retried when the request was certainly not acted on,
    /// so a 500 after the server accepted it never creates a duplicate.
    RateLimit,
}

impl Retry {
    fn on_status(self, status: StatusCode) -> bool {
        match self {
            Retry::Transient => {
                status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            Retry::RateLimit => {
                status == StatusCode::TOO_MANY_REQUESTS
                    || status == StatusCode::SERVICE_UNAVAILABLE
            }
        }
    }

    fn on_error(self, e: &reqwest::Error) -> bool {
        match self {
            Retry::Transient => e.is_connect() || e.is_timeout(),
            Retry::RateLimit => e.is_connect(),
        }
    }
}

/// Client construction options.
#[derive(Debug, Clone)]
pub struct Options {
    /// Base URL; `None` or empty selects the public API.
    pub endpoint: Option<String>,
    /// How many times a transient failure is retried before giving up.
    pub max_retries: u32,
    /// Delay before the first retry; doubles on each further attempt.
    pub retry_delay: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            endpoint: None,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Client for the Vultr v1 REST API.
#[derive(Clone)]
pub struct VultrClient {
    api_key: String,
    endpoint: String,
    max_retries: u32,
    retry_delay: Duration,
    http: reqwest::Client,
}

impl VultrClient {
    pub fn new(api_key: impl Into<String>, options: Options) -> Self {
        let endpoint = options
            .endpoint
            .filter(|e| !e.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_ENDPOINT.into());

        Self {
            api_key: api_key.into(),
            endpoint: endpoint.trim_end_matches('/').to_string(),
            max_retries: options.max_retries,
            retry_delay: options.retry_delay,
            http: reqwest::Client::new(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1{path}", self.endpoint)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.http
            .get(self.url(path))
            .header("API-Key", &self.api_key)
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(self.url(path))
            .header("API-Key", &self.api_key)
    }

    /// Send a request, retrying failures `retry` allows.
    ///
    /// `build` is invoked once per attempt since a `RequestBuilder` is
    /// consumed on send.
    async fn send(
        &self,
        endpoint: &'static str,
        retry: Retry,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            let retries_left = attempt < self.max_retries;

            match build().send().await {
                Ok(resp) if resp.status().is_success() => return Ok(resp),
                Ok(resp) if retry.on_status(resp.status()) && retries_left => {
                    tracing::debug!(endpoint, status = %resp.status(), attempt, "vultr: retrying");
                }
                Ok(resp) => {
                    let status = resp.status();
                    let body = resp.text().await.unwrap_or_default();
                    return Err(Error::Api {
                        endpoint,
                        status,
                        body: body.trim().to_string(),
                    });
                }
                Err(e) if retries_left && retry.on_error(&e) => {
                    tracing::debug!(endpoint, error = %e, attempt, "vultr: retrying");
                }
                Err(e) => return Err(Error::Request(e)),
            }

            tokio::time::sleep(self.retry_delay * 2u32.saturating_pow(attempt)).await;
            attempt += 1;
        }
    }

    async fn json<T: DeserializeOwned>(
        &self,
        endpoint: &'static str,
        retry: Retry,
        build: impl Fn() -> RequestBuilder,
    ) -> Result<T> {
        let body = self.send(endpoint, retry, build).await?.text().await?;
        serde_json::from_str(&body).map_err(|source| Error::Decode { endpoint, source })
    }

    // ── Servers ──────────────────────────────────────────────────────

    /// Create a server. Returns the new `SUBID`.
    pub async fn create_server(
        &self,
        name: &str,
        region_id: u32,
        plan_id: u32,
        os_id: u32,
        options: &ServerOptions,
    ) -> Result<String> {
        let mut form: Vec<(&str, String)> = vec![
            ("DCID", region_id.to_string()),
            ("VPSPLANID", plan_id.to_string()),
            ("OSID", os_id.to_string()),
            ("label", options.label.clone().unwrap_or_else(|| name.into())),
        ];

        if let Some(hostname) = &options.hostname {
            form.push(("hostname", hostname.clone()));
        }
        if let Some(key) = &options.ssh_key_id {
            form.push(("SSHKEYID", key.clone()));
        }
        if let Some(script) = options.script_id {
            form.push(("SCRIPTID", script.to_string()));
        }
        if let Some(snapshot) = &options.snapshot_id {
            form.push(("SNAPSHOTID", snapshot.clone()));
        }
        if let Some(user_data) = &options.user_data {
            form.push(("userdata", STANDARD.encode(user_data)));
        }
        if options.ipv6 {
            form.push(("enable_ipv6", "yes".into()));
        }
        if options.private_networking {
            form.push(("enable_private_network", "yes".into()));
        }
        if options.auto_backups {
            form.push(("auto_backups", "yes".into()));
        }
        let notify = if options.notify_activate { "yes" } else { "no" };
        form.push(("notify_activate", notify.into()));
        if let Some(tag) = &options.tag {
            form.push(("tag", tag.clone()));
        }
        if let Some(group) = &options.firewall_group_id {
            form.push(("FIREWALLGROUPID", group.clone()));
        }
        if let Some(ip) = &options.reserved_ip {
            form.push(("reserved_ip_v4", ip.clone()));
        }

        let resp: CreateServerResponse = self
            .json("create server", Retry::RateLimit, || self.post("/server/create").form(&form))
            .await?;
        Ok(resp.id)
    }

    pub async fn get_server(&self, id: &str) -> Result<Server> {
        self.json("get server", Retry::Transient, || {
            self.get("/server/list").query(&[("SUBID", id)])
        })
        .await
    }

    async fn server_action(&self, endpoint: &'static str, path: &str, id: &str) -> Result<()> {
        self.send(endpoint, Retry::Transient, || self.post(path).form(&[("SUBID", id)]))
            .await?;
        Ok(())
    }

    pub async fn start_server(&self, id: &str) -> Result<()> {
        self.server_action("start server", "/server/start", id).await
    }

    pub async fn halt_server(&self, id: &str) -> Result<()> {
        self.server_action("halt server", "/server/halt", id).await
    }

    pub async fn reboot_server(&self, id: &str) -> Result<()> {
        self.server_action("reboot server", "/server/reboot", id).await
    }

    pub async fn delete_server(&self, id: &str) -> Result<()> {
        self.server_action("delete server", "/server/destroy", id).await
    }

    // ── SSH keys ─────────────────────────────────────────────────────

    pub async fn list_ssh_keys(&self) -> Result<Vec<SshKey>> {
        let raw: serde_json::Value = self
            .json("list ssh keys", Retry::Transient, || self.get("/sshkey/list"))
            .await?;
        keyed_values(raw).map_err(|source| Error::Decode {
            endpoint: "list ssh keys",
            source,
        })
    }

    /// Register a public key. Returns the new `SSHKEYID`.
    pub async fn create_ssh_key(&self, name: &str, public_key: &str) -> Result<String> {
        let resp: CreateSshKeyResponse = self
            .json("create ssh key", Retry::RateLimit, || {
                self.post("/sshkey/create")
                    .form(&[("name", name), ("ssh_key", public_key)])
            })
            .await?;
        Ok(resp.id)
    }

    pub async fn delete_ssh_key(&self, id: &str) -> Result<()> {
        self.send("delete ssh key", Retry::Transient, || {
            self.post("/sshkey/destroy").form(&[("SSHKEYID", id)])
        })
        .await?;
        Ok(())
    }

    // ── Startup scripts ──────────────────────────────────────────────

    /// Upload a startup script. Returns the new `SCRIPTID`.
    pub async fn create_startup_script(
        &self,
        name: &str,
        script: &str,
        kind: ScriptType,
    ) -> Result<String> {
        let resp: CreateScriptResponse = self
            .json("create startup script", Retry::RateLimit, || {
                self.post("/startupscript/create").form(&[
                    ("name", name),
                    ("script", script),
                    ("type", kind.as_str()),
                ])
            })
            .await?;
        Ok(resp.id)
    }

    pub async fn delete_startup_script(&self, id: &str) -> Result<()> {
        self.send("delete startup script", Retry::Transient, || {
            self.post("/startupscript/destroy").form(&[("SCRIPTID", id)])
        })
        .await?;
        Ok(())
    }

    // ── Regions / plans / account ────────────────────────────────────

    pub async fn list_regions(&self) -> Result<Vec<Region>> {
        let raw: serde_json::Value = self
            .json("list regions", Retry::Transient, || self.get("/regions/list"))
            .await?;
        keyed_values(raw).map_err(|source| Error::Decode {
            endpoint: "list regions",
            source,
        })
    }

    /// Plan ids currently orderable in the given region.
    pub async fn available_plans(&self, region_id: u32) -> Result<Vec<u32>> {
        let region = region_id.to_string();
        self.json("region availability", Retry::Transient, || {
            self.get("/regions/availability")
                .query(&[("DCID", region.as_str())])
        })
        .await
    }

    pub async fn account_info(&self) -> Result<AccountInfo> {
        self.json("account info", Retry::Transient, || self.get("/account/info")).await
    }
}
