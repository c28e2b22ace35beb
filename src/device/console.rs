use regex_lite::Regex;
use std::io::{ErrorKind, Read, Write};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::LoginCredentials;
use crate::error::PipelineError;

const MAX_LOGIN_STEPS: usize = 8;
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Output IOS-family devices print when they refuse a line
const REJECT_MARKERS: &[&str] = &[
    "% Invalid input",
    "% Incomplete command",
    "% Ambiguous command",
    "% Unknown command",
];

struct Patterns {
    device_prompt: Regex,
    shell_prompt: Regex,
    username: Regex,
    password: Regex,
    press_return: Regex,
}

impl Patterns {
    fn new() -> Result<Self, PipelineError> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| PipelineError::Console(format!("invalid pattern {}: {}", pattern, e)))
        };

        Ok(Self {
            device_prompt: compile(r"^[\w.\-/:]+(\([\w.\-]+\))?[>#]$")?,
            shell_prompt: compile(r"[>#$%]$")?,
            username: compile(r"(?i)(user ?name|login):$")?,
            password: compile(r"(?i)password:$")?,
            press_return: compile(r"(?i)press return")?,
        })
    }
}

/// What `read_until` waits for
enum Expect<'a> {
    /// Pattern must match the unfinished last line, where prompts sit
    Line(&'a Regex),
    /// Pattern may match anywhere in what has been read
    Anywhere(&'a Regex),
}

/// Expect-style dialog with a device CLI over any byte stream.
///
/// Reads are polled until a pattern matches or the timeout runs out, so the
/// stream may be blocking with a short read timeout or non-blocking.
pub struct Console<S> {
    stream: S,
    buffer: String,
    timeout: Duration,
    patterns: Arc<Patterns>,
    prompt: String,
}

impl<S: Read + Write> Console<S> {
    pub fn new(stream: S, timeout: Duration) -> Result<Self, PipelineError> {
        Ok(Self {
            stream,
            buffer: String::new(),
            timeout,
            patterns: Arc::new(Patterns::new()?),
            prompt: String::new(),
        })
    }

    /// The last device prompt seen, e.g. `R1#`
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn send_line(&mut self, line: &str) -> Result<(), PipelineError> {
        self.stream.write_all(format!("{}\r", line).as_bytes())?;
        self.stream.flush()?;
        Ok(())
    }

    fn matching(&self, expect: &[Expect<'_>]) -> Option<usize> {
        let last = last_line(&self.buffer);
        expect.iter().position(|e| match e {
            Expect::Line(re) => re.is_match(last),
            Expect::Anywhere(re) => re.is_match(&self.buffer),
        })
    }

    /// Read until one of `expect` matches; returns its index and everything read
    fn read_until(&mut self, expect: &[Expect<'_>]) -> Result<(usize, String), PipelineError> {
        let deadline = Instant::now() + self.timeout;
        let mut chunk = [0u8; 4096];

        loop {
            if let Some(idx) = self.matching(expect) {
                return Ok((idx, std::mem::take(&mut self.buffer)));
            }
            if Instant::now() >= deadline {
                return Err(PipelineError::Console(format!(
                    "timed out after {:?} waiting for a prompt, last output: {:?}",
                    self.timeout,
                    tail(&self.buffer, 80)
                )));
            }

            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(PipelineError::Console("connection closed by remote end".to_string()))
                }
                Ok(n) => self.buffer.push_str(&String::from_utf8_lossy(&chunk[..n])),
                Err(e)
                    if matches!(
                        e.kind(),
                        ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
                    ) =>
                {
                    std::thread::sleep(POLL_INTERVAL)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn wait_prompt(&mut self) -> Result<String, PipelineError> {
        let patterns = Arc::clone(&self.patterns);
        let (_, output) = self.read_until(&[Expect::Line(&patterns.device_prompt)])?;
        self.prompt = last_line(&output).to_string();
        Ok(output)
    }

    /// On a jump host: wait for its shell, then type the console attach command
    pub fn attach(&mut self, command: &str) -> Result<(), PipelineError> {
        let patterns = Arc::clone(&self.patterns);
        self.read_until(&[Expect::Line(&patterns.shell_prompt)])?;
        self.send_line(command)
    }

    /// Wake the line up and answer login prompts until a device prompt shows.
    /// Leaves the device in privileged exec mode when an enable secret is known.
    pub fn login(&mut self, creds: &LoginCredentials) -> Result<(), PipelineError> {
        let patterns = Arc::clone(&self.patterns);
        self.send_line("")?;

        for _ in 0..MAX_LOGIN_STEPS {
            let (idx, output) = self.read_until(&[
                Expect::Line(&patterns.username),
                Expect::Line(&patterns.password),
                Expect::Line(&patterns.device_prompt),
                Expect::Anywhere(&patterns.press_return),
            ])?;

            match idx {
                0 => self.send_line(&creds.username)?,
                1 => self.send_line(&creds.password)?,
                2 => {
                    self.prompt = last_line(&output).to_string();
                    return self.settle(creds);
                }
                _ => self.send_line("")?,
            }
        }

        Err(PipelineError::Console(format!(
            "no device prompt after {} login steps",
            MAX_LOGIN_STEPS
        )))
    }

    fn settle(&mut self, creds: &LoginCredentials) -> Result<(), PipelineError> {
        // a previous session may have left the line in config mode
        if self.prompt.contains("(config") {
            self.send_line("end")?;
            self.wait_prompt()?;
        }

        if self.prompt.ends_with('>') {
            if let Some(secret) = creds.enable_password.as_deref() {
                self.enable(secret)?;
            }
        }
        Ok(())
    }

    fn enable(&mut self, secret: &str) -> Result<(), PipelineError> {
        let patterns = Arc::clone(&self.patterns);
        self.send_line("enable")?;
        let (idx, output) = self.read_until(&[
            Expect::Line(&patterns.password),
            Expect::Line(&patterns.device_prompt),
        ])?;

        if idx == 0 {
            self.send_line(secret)?;
            self.wait_prompt()?;
        } else {
            self.prompt = last_line(&output).to_string();
        }

        if self.prompt.ends_with('#') {
            Ok(())
        } else {
            Err(PipelineError::Console(format!("enable failed, still at '{}'", self.prompt)))
        }
    }

    /// Send a configuration block line by line in config mode.
    /// Stops at the first line the device rejects.
    pub fn configure(&mut self, config: &str) -> Result<String, PipelineError> {
        let mut transcript = String::new();

        self.send_line("configure terminal")?;
        transcript.push_str(&self.wait_prompt()?);
        if !self.prompt.contains("(config") {
            return Err(PipelineError::Console(format!(
                "could not enter configuration mode at '{}'",
                self.prompt
            )));
        }

        for step in config_steps(config) {
            let line = match step {
                ConfigStep::Line(line) => {
                    self.send_line(line)?;
                    line
                }
                // the device only prompts again after the closing delimiter
                ConfigStep::Block { opener, body } => {
                    self.send_line(opener)?;
                    for text in body {
                        self.send_line(text)?;
                    }
                    opener
                }
            };

            let output = self.wait_prompt()?;
            if let Some(marker) = rejection(&output) {
                let _ = self.send_line("end");
                return Err(PipelineError::Console(format!(
                    "device rejected '{}': {}",
                    line.trim(),
                    marker
                )));
            }
            transcript.push_str(&output);
        }

        self.send_line("end")?;
        transcript.push_str(&self.wait_prompt()?);
        Ok(transcript)
    }

    /// Run one exec command with paging disabled
    pub fn execute(&mut self, command: &str) -> Result<String, PipelineError> {
        self.send_line("terminal length 0")?;
        self.wait_prompt()?;

        self.send_line(command)?;
        let raw = self.wait_prompt()?;
        Ok(strip_echo_and_prompt(&raw, command))
    }
}

fn last_line(buffer: &str) -> &str {
    buffer.rsplit('\n').next().unwrap_or("").trim()
}

fn tail(s: &str, max_chars: usize) -> String {
    let count = s.chars().count();
    s.chars().skip(count.saturating_sub(max_chars)).collect()
}

/// One unit of a config push
#[derive(Debug, PartialEq)]
enum ConfigStep<'a> {
    Line(&'a str),
    /// `banner motd ^` then text lines up to and including the one holding
    /// the closing `^`, sent verbatim
    Block { opener: &'a str, body: Vec<&'a str> },
}

/// Split a config into steps. Outside banner text, blanks, `!` comments and
/// `end` (we send our own) are dropped.
fn config_steps(config: &str) -> Vec<ConfigStep<'_>> {
    let mut steps = Vec::new();
    let mut lines = config.lines().map(|l| l.trim_end_matches('\r'));

    while let Some(line) = lines.next() {
        let line = line.trim_end();
        let t = line.trim();
        if t.is_empty() || t.starts_with('!') || t == "end" {
            continue;
        }

        match open_delimiter(t) {
            Some(delim) => {
                let mut body = Vec::new();
                for text in lines.by_ref() {
                    body.push(text);
                    if text.contains(delim) {
                        break;
                    }
                }
                steps.push(ConfigStep::Block { opener: line, body });
            }
            None => steps.push(ConfigStep::Line(line)),
        }
    }
    steps
}

/// Delimiter of a `banner <kind> <delim>` line whose text runs past the end
/// of the line. `banner motd ^Hello^` is complete and returns None.
fn open_delimiter(line: &str) -> Option<char> {
    let mut words = line.splitn(3, char::is_whitespace);
    if words.next()? != "banner" {
        return None;
    }
    let _kind = words.next()?;
    let mut text = words.next()?.trim_start().chars();
    let delim = text.next()?;
    if text.as_str().contains(delim) {
        None
    } else {
        Some(delim)
    }
}

fn rejection(output: &str) -> Option<&'static str> {
    REJECT_MARKERS.iter().copied().find(|m| output.contains(m))
}

fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let mut lines: Vec<&str> = raw.lines().map(|l| l.trim_end_matches('\r')).collect();
    lines.pop();
    if lines.first().map_or(false, |l| l.contains(command)) {
        lines.remove(0);
    }
    lines.join("\n").trim_end().to_string()
}
