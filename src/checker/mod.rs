pub mod version;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::device::DeviceDriver;
use crate::testbed::Testbed;

pub use version::parse_show_version;

const SHOW_VERSION: &str = "show version";

/// The OS family and release every checked device must run
#[derive(Debug, Clone)]
pub struct VersionExpectation {
    pub os: String,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Mismatch,
    /// Different OS family, not subject to the version check
    Skipped,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceVersion {
    pub device: String,
    pub os: Option<String>,
    pub platform: Option<String>,
    pub version: Option<String>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl DeviceVersion {
    fn failed(device: &str, outcome: Outcome, detail: String) -> Self {
        Self {
            device: device.to_string(),
            os: None,
            platform: None,
            version: None,
            outcome,
            detail: Some(detail),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    pub checked_at: DateTime<Utc>,
    pub expected_os: String,
    pub expected_version: String,
    pub passed: bool,
    pub devices: Vec<DeviceVersion>,
}

impl CheckReport {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn count(&self, outcome: Outcome) -> usize {
        self.devices.iter().filter(|d| d.outcome == outcome).count()
    }
}

/// Ask every device but the jump host for its version and compare it with
/// the expectation. Every device is visited; any mismatch or error fails
/// the whole report.
pub async fn check_versions(
    testbed: &Testbed,
    driver: &dyn DeviceDriver,
    expected: &VersionExpectation,
    jump_alias: &str,
    timeout: Duration,
) -> CheckReport {
    let names = testbed.device_names_except(jump_alias);
    if names.is_empty() {
        tracing::warn!("Testbed has no devices besides the jump host '{}'", jump_alias);
    }

    let mut devices = Vec::with_capacity(names.len());
    for name in &names {
        let result = check_device(testbed, driver, expected, name, timeout).await;
        match result.outcome {
            Outcome::Passed => tracing::info!(
                "{}: {} version {} - OK",
                name,
                result.os.as_deref().unwrap_or("?"),
                result.version.as_deref().unwrap_or("?")
            ),
            Outcome::Skipped => tracing::info!(
                "{}: os {} is not {}, skipping version check",
                name,
                result.os.as_deref().unwrap_or("?"),
                expected.os
            ),
            Outcome::Mismatch => tracing::error!(
                "{}: version {} does not match expected {}",
                name,
                result.version.as_deref().unwrap_or("?"),
                expected.version
            ),
            Outcome::Error => tracing::error!(
                "{}: version check failed: {}",
                name,
                result.detail.as_deref().unwrap_or("unknown error")
            ),
        }
        devices.push(result);
    }

    let passed = devices
        .iter()
        .all(|d| matches!(d.outcome, Outcome::Passed | Outcome::Skipped));

    CheckReport {
        checked_at: Utc::now(),
        expected_os: expected.os.clone(),
        expected_version: expected.version.clone(),
        passed,
        devices,
    }
}

async fn check_device(
    testbed: &Testbed,
    driver: &dyn DeviceDriver,
    expected: &VersionExpectation,
    name: &str,
    timeout: Duration,
) -> DeviceVersion {
    let target = match testbed.connect_target(name, timeout) {
        Ok(t) => t,
        Err(e) => return DeviceVersion::failed(name, Outcome::Error, e.to_string()),
    };

    let output = match driver.execute(&target, SHOW_VERSION).await {
        Ok(out) => out,
        Err(e) => return DeviceVersion::failed(name, Outcome::Error, e.to_string()),
    };

    let info = match parse_show_version(&output) {
        Some(info) => info,
        None => {
            return DeviceVersion::failed(
                name,
                Outcome::Error,
                "unrecognised show version output".to_string(),
            )
        }
    };

    let os = testbed
        .devices
        .get(name)
        .and_then(|d| d.os.clone())
        .unwrap_or_else(|| info.os.clone());

    let outcome = if !os.eq_ignore_ascii_case(&expected.os) {
        Outcome::Skipped
    } else if info.version == expected.version {
        Outcome::Passed
    } else {
        Outcome::Mismatch
    };

    DeviceVersion {
        device: name.to_string(),
        os: Some(os),
        platform: info.platform,
        version: Some(info.version),
        outcome,
        detail: None,
    }
}
