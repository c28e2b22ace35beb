use anyhow::Result;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::compiler::file_safe_name;
use crate::device::DeviceDriver;
use crate::testbed::Testbed;

#[derive(Debug, Default)]
pub struct ApplySummary {
    pub applied: Vec<String>,
    /// Files whose name matches no testbed device
    pub skipped: Vec<PathBuf>,
    /// (device, error) for pushes that did not go through
    pub failed: Vec<(String, String)>,
}

/// Regular files in `dir`, sorted by name
async fn config_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| anyhow::anyhow!("Cannot read config directory {}: {}", dir.display(), e))?;

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}

/// `R1.conf` -> `R1`
fn device_name(path: &Path) -> Option<&str> {
    path.file_stem().and_then(|s| s.to_str())
}

/// Testbed device a file stem belongs to: an exact name, or a name that
/// the compiler wrote with `/` replaced (`core_sw1` -> `core/sw1`)
fn resolve_device(testbed: &Testbed, stem: &str) -> Option<String> {
    if testbed.contains(stem) {
        return Some(stem.to_string());
    }
    testbed
        .devices
        .keys()
        .find(|name| file_safe_name(name) == stem)
        .cloned()
}

/// Push every rendered config whose file name matches a testbed device.
///
/// Files without a matching device are skipped. Devices are handled one at a
/// time and a failed push does not stop the ones after it.
pub async fn apply_configs(
    testbed: &Testbed,
    config_dir: &Path,
    driver: &dyn DeviceDriver,
    timeout: Duration,
    dry_run: bool,
) -> Result<ApplySummary> {
    let mut summary = ApplySummary::default();

    for path in config_files(config_dir).await? {
        let matched = device_name(&path).and_then(|stem| resolve_device(testbed, stem));
        let name = match matched {
            Some(n) => n,
            None => {
                tracing::info!("Skipping {}: no matching device in testbed", path.display());
                summary.skipped.push(path);
                continue;
            }
        };

        match push_config(testbed, &name, &path, driver, timeout, dry_run).await {
            Ok(()) => summary.applied.push(name),
            Err(e) => {
                tracing::error!("{}: failed to apply {}: {}", name, path.display(), e);
                summary.failed.push((name, e.to_string()));
            }
        }
    }

    tracing::info!(
        "Applied {} config(s), skipped {}, failed {}",
        summary.applied.len(),
        summary.skipped.len(),
        summary.failed.len()
    );
    Ok(summary)
}

async fn push_config(
    testbed: &Testbed,
    name: &str,
    path: &Path,
    driver: &dyn DeviceDriver,
    timeout: Duration,
    dry_run: bool,
) -> Result<()> {
    let config = tokio::fs::read_to_string(path).await?;
    let target = testbed.connect_target(name, timeout)?;

    if dry_run {
        tracing::info!(
            "{}: dry run, would push {} line(s) via {}:{}",
            name,
            config.lines().count(),
            target.host,
            target.port
        );
        return Ok(());
    }

    tracing::info!("{}: pushing {}", name, path.display());
    let transcript = driver.configure(&target, &config).await?;
    tracing::debug!("{}: configure transcript:\n{}", name, transcript);
    Ok(())
}
