use anyhow::Result;
use async_trait::async_trait;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use super::{ConnectTarget, Console, DeviceDriver};
use crate::error::PipelineError;

/// How long a single channel read may block before the console polls again
const READ_POLL_MS: u32 = 250;

/// Keyboard-interactive prompt handler that always responds with the password
struct PasswordPrompt {
    password: String,
}

impl ssh2::KeyboardInteractivePrompt for PasswordPrompt {
    fn prompt<'a>(
        &mut self,
        _username: &str,
        _instructions: &str,
        prompts: &[ssh2::Prompt<'a>],
    ) -> Vec<String> {
        prompts.iter().map(|_| self.password.clone()).collect()
    }
}

/// Create an SSH session and authenticate with password + keyboard-interactive.
/// This is blocking, so call from a spawn_blocking context.
pub fn ssh_connect(host: &str, port: u16, user: &str, pass: &str, timeout: Duration) -> Result<ssh2::Session, PipelineError> {
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| PipelineError::Connect(format!("Invalid address {}:{}: {}", host, port, e)))?
        .next()
        .ok_or_else(|| PipelineError::Connect(format!("No address for {}:{}", host, port)))?;

    let tcp = TcpStream::connect_timeout(&addr, timeout)
        .map_err(|e| PipelineError::Connect(format!("TCP connection to {} failed: {}", addr, e)))?;

    tcp.set_read_timeout(Some(timeout)).ok();
    tcp.set_write_timeout(Some(timeout)).ok();

    let mut session = ssh2::Session::new()
        .map_err(|e| PipelineError::Connect(format!("Failed to create SSH session: {}", e)))?;
    session.set_tcp_stream(tcp);
    session.set_timeout(timeout.as_millis().min(u32::MAX as u128) as u32);
    session
        .handshake()
        .map_err(|e| PipelineError::Connect(format!("SSH handshake failed: {}", e)))?;

    // Try password auth first
    match session.userauth_password(user, pass) {
        Ok(_) if session.authenticated() => return Ok(session),
        _ => {}
    }

    // Try keyboard-interactive auth (terminal servers and some NOSes need it)
    let mut prompter = PasswordPrompt { password: pass.to_string() };
    let _ = session.userauth_keyboard_interactive(user, &mut prompter);

    if session.authenticated() {
        Ok(session)
    } else {
        Err(PipelineError::Connect("SSH authentication failed: all methods exhausted".to_string()))
    }
}

/// Open an interactive shell to the target and get to an exec prompt.
/// The session is returned alongside so it outlives the console.
fn open_console(target: &ConnectTarget) -> Result<(ssh2::Session, Console<ssh2::Channel>), PipelineError> {
    let session = ssh_connect(
        &target.host,
        target.port,
        &target.ssh_username,
        &target.ssh_password,
        target.timeout,
    )?;

    let mut channel = session
        .channel_session()
        .map_err(|e| PipelineError::Connect(format!("Failed to open channel: {}", e)))?;
    // Network devices need a PTY for interactive CLI
    channel
        .request_pty("vt100", None, Some((200, 24, 0, 0)))
        .map_err(|e| PipelineError::Connect(format!("PTY request failed: {}", e)))?;
    channel
        .shell()
        .map_err(|e| PipelineError::Connect(format!("Failed to start shell: {}", e)))?;
    session.set_timeout(READ_POLL_MS);

    let mut console = Console::new(channel, target.timeout)?;
    if let Some(command) = target.console_command.as_deref() {
        tracing::debug!("{}: attaching via {} with '{}'", target.device, target.host, command);
        console.attach(command)?;
    }
    console.login(&target.login)?;
    tracing::debug!("{}: ready at prompt '{}'", target.device, console.prompt());

    Ok((session, console))
}

/// DeviceDriver backed by libssh2, one session per call
#[derive(Debug, Default, Clone, Copy)]
pub struct SshDriver;

#[async_trait]
impl DeviceDriver for SshDriver {
    async fn configure(&self, target: &ConnectTarget, config: &str) -> Result<String> {
        let target = target.clone();
        let config = config.to_string();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let (_session, mut console) = open_console(&target)?;
            Ok(console.configure(&config)?)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {}", e))?
    }

    async fn execute(&self, target: &ConnectTarget, command: &str) -> Result<String> {
        let target = target.clone();
        let command = command.to_string();

        tokio::task::spawn_blocking(move || -> Result<String> {
            let (_session, mut console) = open_console(&target)?;
            Ok(console.execute(&command)?)
        })
        .await
        .map_err(|e| anyhow::anyhow!("Task join error: {}", e))?
    }
}
