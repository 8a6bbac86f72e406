use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};

// ── Servers ──────────────────────────────────────────────────────────

/// A server record as returned by `server/list?SUBID=...`.
///
/// The v1 API reports every field as a string, including numeric ones.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Server {
    #[serde(rename = "SUBID")]
    pub id: String,
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub server_state: String,
    #[serde(default)]
    pub power_status: String,
    #[serde(default)]
    pub main_ip: String,
    #[serde(default)]
    pub internal_ip: String,
    #[serde(rename = "DCID", default)]
    pub region_id: String,
    #[serde(rename = "VPSPLANID", default)]
    pub plan_id: String,
    #[serde(rename = "OSID", default)]
    pub os_id: String,
    #[serde(default)]
    pub tag: String,
}

/// Startup script flavour accepted by `startupscript/create`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Boot,
    Pxe,
}

impl ScriptType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Boot => "boot",
            Self::Pxe => "pxe",
        }
    }
}

/// Optional knobs for `server/create`.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    pub label: Option<String>,
    pub hostname: Option<String>,
    pub ssh_key_id: Option<String>,
    pub script_id: Option<u32>,
    pub snapshot_id: Option<String>,
    /// Raw cloud-init payload, any bytes; base64-encoded on the wire.
    pub user_data: Option<Vec<u8>>,
    pub ipv6: bool,
    pub private_networking: bool,
    pub auto_backups: bool,
    pub notify_activate: bool,
    pub tag: Option<String>,
    pub firewall_group_id: Option<String>,
    pub reserved_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateServerResponse {
    #[serde(rename = "SUBID", deserialize_with = "string_or_number")]
    pub id: String,
}

// ── SSH keys ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SshKey {
    #[serde(rename = "SSHKEYID")]
    pub id: String,
    pub name: String,
    #[serde(rename = "ssh_key")]
    pub public_key: String,
    #[serde(default)]
    pub date_created: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct CreateSshKeyResponse {
    #[serde(rename = "SSHKEYID")]
    pub id: String,
}

// ── Startup scripts ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub(crate) struct CreateScriptResponse {
    #[serde(rename = "SCRIPTID", deserialize_with = "string_or_number")]
    pub id: String,
}

// ── Regions / account ────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    #[serde(rename = "DCID", deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub continent: String,
    #[serde(default)]
    pub regioncode: String,
}

impl Region {
    /// Numeric region id (`DCID`), if the provider sent a well-formed one.
    pub fn dcid(&self) -> Option<u32> {
        self.id.parse().ok()
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AccountInfo {
    #[serde(default, deserialize_with = "string_or_number")]
    pub balance: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub pending_charges: String,
    #[serde(default)]
    pub last_payment_date: String,
    #[serde(default, deserialize_with = "string_or_number")]
    pub last_payment_amount: String,
}

// ── Decoding helpers ─────────────────────────────────────────────────

/// Accept either `"5"` or `5` and keep it as a string.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

/// List endpoints return an object keyed by id, or `[]` when empty.
pub(crate) fn keyed_values<T: DeserializeOwned>(
    value: serde_json::Value,
) -> serde_json::Result<Vec<T>> {
    match value {
        serde_json::Value::Object(map) => map
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v))
            .collect(),
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(serde_json::from_value)
            .collect(),
        serde_json::Value::Null => Ok(Vec::new()),
        other => Err(de::Error::custom(format!(
            "expected object or array, got {other}"
        ))),
    }
}
