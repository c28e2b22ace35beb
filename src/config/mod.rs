use std::env;
use std::time::Duration;

/// Config holds every setting the pipeline stages read from the environment
#[derive(Clone)]
pub struct Config {
    pub netbox_url: String,
    pub netbox_token: String,
    pub template_mapping: String,
    pub templates_dir: String,
    pub cml_url: String,
    pub cml_username: String,
    pub cml_password: String,
    pub cml_verify_tls: bool,
    pub jump_host_alias: String,
    pub jump_host_username: String,
    pub jump_host_password: String,
    pub expected_os: String,
    pub expected_version: String,
    pub ssh_timeout_secs: u64,
    pub http_timeout_secs: u64,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn load() -> Self {
        Self {
            netbox_url: get_env("NETBOX_URL", "http://localhost:8000"),
            netbox_token: get_env("NETBOX_TOKEN", ""),
            template_mapping: get_env("TEMPLATE_MAPPING", "templates/mapping.json"),
            templates_dir: get_env("TEMPLATES_DIR", "templates"),
            cml_url: get_env("CML_URL", "https://localhost"),
            cml_username: get_env("CML_USERNAME", "admin"),
            cml_password: get_env("CML_PASSWORD", ""),
            cml_verify_tls: parse_bool(&get_env("CML_VERIFY_TLS", "true"), true),
            jump_host_alias: get_env("JUMP_HOST_ALIAS", "terminal_server"),
            jump_host_username: get_env("JUMP_HOST_USERNAME", "admin"),
            jump_host_password: get_env("JUMP_HOST_PASSWORD", ""),
            expected_os: get_env("EXPECTED_OS", "ios"),
            expected_version: get_env("EXPECTED_VERSION", "15.9(3)M4"),
            ssh_timeout_secs: get_env("SSH_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
            http_timeout_secs: get_env("HTTP_TIMEOUT_SECS", "30")
                .parse()
                .unwrap_or(30),
        }
    }

    pub fn ssh_timeout(&self) -> Duration {
        Duration::from_secs(self.ssh_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

// Hand-written so passwords and tokens never end up in a log line.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("netbox_url", &self.netbox_url)
            .field("template_mapping", &self.template_mapping)
            .field("templates_dir", &self.templates_dir)
            .field("cml_url", &self.cml_url)
            .field("cml_username", &self.cml_username)
            .field("cml_verify_tls", &self.cml_verify_tls)
            .field("jump_host_alias", &self.jump_host_alias)
            .field("jump_host_username", &self.jump_host_username)
            .field("expected_os", &self.expected_os)
            .field("expected_version", &self.expected_version)
            .field("ssh_timeout_secs", &self.ssh_timeout_secs)
            .field("http_timeout_secs", &self.http_timeout_secs)
            .finish_non_exhaustive()
    }
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(value: &str, default: bool) -> bool {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}
