use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::device::{ConnectTarget, LoginCredentials};
use crate::error::PipelineError;

const DEFAULT_SSH_PORT: u16 = 22;

/// Connectivity descriptor for a lab, as exported by the lab platform.
/// Keys this crate doesn't model are carried in `extra` so a load/save
/// cycle keeps them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Testbed {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub testbed: Option<serde_yaml::Mapping>,
    pub devices: BTreeMap<String, TestbedDevice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topology: Option<serde_yaml::Value>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TestbedDevice {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub series: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub credentials: BTreeMap<String, Credential>,
    #[serde(default)]
    pub connections: BTreeMap<String, Connection>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credential {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, alias = "host", skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(flatten)]
    pub extra: serde_yaml::Mapping,
}

impl TestbedDevice {
    /// Pick the connection to use: the one named by `defaults.via`, then
    /// `cli`, then the first other entry by name.
    fn connection(&self) -> Option<&Connection> {
        let via = self
            .connections
            .get("defaults")
            .and_then(|d| d.extra.get("via"))
            .and_then(|v| v.as_str());

        if let Some(conn) = via.and_then(|name| self.connections.get(name)) {
            return Some(conn);
        }
        if let Some(conn) = self.connections.get("cli") {
            return Some(conn);
        }
        self.connections
            .iter()
            .find(|(name, _)| name.as_str() != "defaults")
            .map(|(_, conn)| conn)
    }
}

impl Testbed {
    pub fn from_yaml(content: &str) -> Result<Self, PipelineError> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> Result<String, PipelineError> {
        Ok(serde_yaml::to_string(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), PipelineError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_yaml()?)?;
        Ok(())
    }

    /// `testbed.credentials`, which devices fall back to
    fn shared_credentials(&self) -> BTreeMap<String, Credential> {
        let Some(value) = self.testbed.as_ref().and_then(|t| t.get("credentials")) else {
            return BTreeMap::new();
        };
        serde_yaml::from_value(value.clone()).unwrap_or_else(|e| {
            tracing::warn!("Ignoring malformed testbed credentials: {}", e);
            BTreeMap::new()
        })
    }

    /// A device's login, each field taken from its own credentials first and
    /// from the testbed-wide ones otherwise
    fn login(&self, device: &TestbedDevice) -> LoginCredentials {
        let shared = self.shared_credentials();
        let field = |name: &str, pick: fn(&Credential) -> Option<&String>| {
            device
                .credentials
                .get(name)
                .and_then(pick)
                .or_else(|| shared.get(name).and_then(pick))
                .cloned()
        };

        LoginCredentials {
            username: field("default", |c| c.username.as_ref()).unwrap_or_default(),
            password: field("default", |c| c.password.as_ref()).unwrap_or_default(),
            enable_password: field("enable", |c| c.password.as_ref()),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.devices.contains_key(name)
    }

    /// Find the jump host by key, or failing that by its `alias` field
    pub fn jump_host(&self, alias: &str) -> Option<(&String, &TestbedDevice)> {
        self.devices.get_key_value(alias).or_else(|| {
            self.devices
                .iter()
                .find(|(_, d)| d.alias.as_deref() == Some(alias))
        })
    }

    pub fn is_jump_host(&self, name: &str, alias: &str) -> bool {
        self.jump_host(alias).map_or(false, |(key, _)| key == name)
    }

    /// Overwrite the jump host's default credentials.
    /// The exported testbed ships with placeholders here.
    pub fn set_jump_host_credentials(
        &mut self,
        alias: &str,
        username: &str,
        password: &str,
    ) -> Result<(), PipelineError> {
        let key = self
            .jump_host(alias)
            .map(|(key, _)| key.clone())
            .ok_or_else(|| PipelineError::MissingJumpHost(alias.to_string()))?;

        let device = self
            .devices
            .get_mut(&key)
            .ok_or_else(|| PipelineError::MissingJumpHost(alias.to_string()))?;
        let default = device.credentials.entry("default".to_string()).or_default();
        default.username = Some(username.to_string());
        default.password = Some(password.to_string());
        Ok(())
    }

    /// Device names in sorted order, without the jump host
    pub fn device_names_except(&self, alias: &str) -> Vec<String> {
        self.devices
            .keys()
            .filter(|name| !self.is_jump_host(name, alias))
            .cloned()
            .collect()
    }

    /// Work out how to reach a device: directly over SSH, or through the
    /// proxy its connection names followed by a console command.
    pub fn connect_target(&self, name: &str, timeout: Duration) -> Result<ConnectTarget, PipelineError> {
        let device = self
            .devices
            .get(name)
            .ok_or_else(|| PipelineError::DeviceNotInTestbed(name.to_string()))?;
        let conn = device
            .connection()
            .ok_or_else(|| PipelineError::NoConnection(name.to_string()))?;
        let login = self.login(device);

        match conn.proxy.as_deref() {
            Some(proxy) => {
                let (proxy_name, proxy_device) = self
                    .jump_host(proxy)
                    .ok_or_else(|| PipelineError::MissingJumpHost(proxy.to_string()))?;
                let proxy_conn = proxy_device
                    .connection()
                    .ok_or_else(|| PipelineError::NoConnection(proxy_name.clone()))?;
                let host = proxy_conn
                    .ip
                    .clone()
                    .ok_or_else(|| PipelineError::NoConnection(proxy_name.clone()))?;
                let command = conn
                    .command
                    .clone()
                    .ok_or_else(|| PipelineError::NoConnection(name.to_string()))?;
                let proxy_login = self.login(proxy_device);

                Ok(ConnectTarget {
                    device: name.to_string(),
                    host,
                    port: proxy_conn.port.unwrap_or(DEFAULT_SSH_PORT),
                    ssh_username: proxy_login.username,
                    ssh_password: proxy_login.password,
                    console_command: Some(command),
                    login,
                    timeout,
                })
            }
            None => {
                let is_ssh = conn
                    .protocol
                    .as_deref()
                    .map_or(true, |p| p.eq_ignore_ascii_case("ssh"));
                if !is_ssh {
                    return Err(PipelineError::NoConnection(name.to_string()));
                }
                let host = conn
                    .ip
                    .clone()
                    .ok_or_else(|| PipelineError::NoConnection(name.to_string()))?;

                Ok(ConnectTarget {
                    device: name.to_string(),
                    host,
                    port: conn.port.unwrap_or(DEFAULT_SSH_PORT),
                    ssh_username: login.username.clone(),
                    ssh_password: login.password.clone(),
                    console_command: None,
                    login,
                    timeout,
                })
            }
        }
    }
}
