use regex_lite::Regex;
use serde::Serialize;

/// What `show version` says about a device
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VersionInfo {
    pub os: String,
    pub platform: Option<String>,
    pub version: String,
}

/// OS family from the banner line of `show version`
fn detect_os(output: &str) -> Option<&'static str> {
    if output.contains("Cisco IOS XE Software") || output.contains("IOS-XE Software") {
        Some("iosxe")
    } else if output.contains("Cisco IOS XR Software") {
        Some("iosxr")
    } else if output.contains("Cisco Nexus Operating System") || output.contains("NX-OS") {
        Some("nxos")
    } else if output.contains("Cisco IOS Software") || output.contains("IOS (tm)") {
        Some("ios")
    } else {
        None
    }
}

fn first_capture(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Parse `show version` output from IOS, IOS-XE, IOS-XR and NX-OS devices.
/// Returns None when the OS or the version string cannot be found.
pub fn parse_show_version(output: &str) -> Option<VersionInfo> {
    let os = detect_os(output)?;

    let version = if os == "nxos" {
        first_capture(r"(?i)(?:NXOS|system):\s+version\s+(\S+)", output)
    } else {
        first_capture(r"Version\s+([^\s,\[]+)", output)
    }?;

    // hardware line, e.g. "cisco IOSv (revision 1.0) with ..."
    let platform = first_capture(r"(?m)^cisco\s+(\S+)", output);

    Some(VersionInfo {
        os: os.to_string(),
        platform,
        version,
    })
}
