pub mod console;
pub mod ssh;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

pub use console::Console;
pub use ssh::SshDriver;

/// Credentials used at the device's own login prompt
#[derive(Clone, Default)]
pub struct LoginCredentials {
    pub username: String,
    pub password: String,
    pub enable_password: Option<String>,
}

impl std::fmt::Debug for LoginCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoginCredentials")
            .field("username", &self.username)
            .field("enable", &self.enable_password.is_some())
            .finish_non_exhaustive()
    }
}

/// Everything needed to reach one device's CLI.
///
/// `host`/`port` and the `ssh_*` pair are the SSH endpoint. When
/// `console_command` is set, that endpoint is a jump host: the command is
/// typed at its shell to attach to the device console, and `login` is used
/// at the device prompts that follow.
#[derive(Clone)]
pub struct ConnectTarget {
    pub device: String,
    pub host: String,
    pub port: u16,
    pub ssh_username: String,
    pub ssh_password: String,
    pub console_command: Option<String>,
    pub login: LoginCredentials,
    pub timeout: Duration,
}

impl std::fmt::Debug for ConnectTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectTarget")
            .field("device", &self.device)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("ssh_username", &self.ssh_username)
            .field("console_command", &self.console_command)
            .field("login", &self.login)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Pushes configuration to and runs commands on devices
#[async_trait]
pub trait DeviceDriver: Send + Sync {
    /// Enter configuration mode, send every line of `config`, leave it again
    async fn configure(&self, target: &ConnectTarget, config: &str) -> Result<String>;

    /// Run one exec-mode command and return its output without echo or prompt
    async fn execute(&self, target: &ConnectTarget, command: &str) -> Result<String>;
}

#[cfg(test)]
pub(crate) mod fake {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Records every call and answers from a per-device table
    #[derive(Default)]
    pub(crate) struct FakeDriver {
        responses: HashMap<String, Result<String, String>>,
        calls: Mutex<Vec<(String, String)>>,
    }

    impl FakeDriver {
        pub(crate) fn respond(mut self, device: &str, response: Result<&str, &str>) -> Self {
            let response = response.map(str::to_string).map_err(str::to_string);
            self.responses.insert(device.to_string(), response);
            self
        }

        /// (device, payload) pairs in call order
        pub(crate) fn calls(&self) -> Vec<(String, String)> {
            self.calls.lock().unwrap().clone()
        }

        fn answer(&self, target: &ConnectTarget, payload: &str) -> Result<String> {
            self.calls
                .lock()
                .unwrap()
                .push((target.device.clone(), payload.to_string()));
            match self.responses.get(&target.device) {
                Some(Ok(out)) => Ok(out.clone()),
                Some(Err(e)) => Err(anyhow::anyhow!("{}", e)),
                None => Ok(String::new()),
            }
        }
    }

    #[async_trait]
    impl DeviceDriver for FakeDriver {
        async fn configure(&self, target: &ConnectTarget, config: &str) -> Result<String> {
            self.answer(target, config)
        }

        async fn execute(&self, target: &ConnectTarget, command: &str) -> Result<String> {
            self.answer(target, command)
        }
    }
}
