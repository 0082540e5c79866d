//! Host identity fields carried in the vendor `Metadata` message.

use std::sync::OnceLock;

use sha2::{Digest, Sha256};

/// OS string the vendor expects.
pub fn os_name() -> &'static str {
    #[cfg(target_os = "macos")]
    {
        "macos"
    }
    #[cfg(target_os = "linux")]
    {
        "linux"
    }
    #[cfg(target_os = "windows")]
    {
        "windows"
    }
}

/// Stable device fingerprint: hex sha-256 over sorted MAC addresses, the
/// machine serial (empty when unavailable), and the username, comma-joined.
pub fn device_fingerprint() -> &'static str {
    static FINGERPRINT: OnceLock<String> = OnceLock::new();
    FINGERPRINT.get_or_init(|| {
        let mut macs = mac_addresses();
        macs.sort();
        macs.dedup();
        let seed = format!(
            "{},{},{}",
            macs.join(","),
            machine_serial().unwrap_or_default(),
            whoami::username()
        );
        hex_digest(seed.as_bytes())
    })
}

fn hex_digest(input: &[u8]) -> String {
    Sha256::digest(input)
        .iter()
        .map(|byte| format!("{byte:02x}"))
        .collect()
}

#[cfg(target_os = "linux")]
fn mac_addresses() -> Vec<String> {
    let Ok(entries) = std::fs::read_dir("/sys/class/net") else {
        return Vec::new();
    };
    entries
        .flatten()
        .filter(|entry| entry.file_name() != "lo")
        .filter_map(|entry| std::fs::read_to_string(entry.path().join("address")).ok())
        .map(|addr| addr.trim().to_string())
        .filter(|addr| !addr.is_empty() && addr != "00:00:00:00:00:00")
        .collect()
}

#[cfg(target_os = "macos")]
fn mac_addresses() -> Vec<String> {
    let Ok(output) = std::process::Command::new("ifconfig").output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let rest = line.trim_start().strip_prefix("ether ")?;
            Some(rest.split_whitespace().next()?.to_string())
        })
        .collect()
}

#[cfg(target_os = "windows")]
fn mac_addresses() -> Vec<String> {
    let Ok(output) = std::process::Command::new("getmac").args(["/fo", "csv", "/nh"]).output()
    else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| line.split(',').next())
        .map(|field| field.trim_matches('"').to_ascii_lowercase().replace('-', ":"))
        .filter(|addr| addr.len() == 17)
        .collect()
}

#[cfg(target_os = "linux")]
fn machine_serial() -> Option<String> {
    let serial = std::fs::read_to_string("/sys/class/dmi/id/product_serial").ok()?;
    let serial = serial.trim();
    (!serial.is_empty()).then(|| serial.to_string())
}

#[cfg(target_os = "macos")]
fn machine_serial() -> Option<String> {
    let output = std::process::Command::new("ioreg")
        .args(["-rd1", "-c", "IOPlatformExpertDevice"])
        .output()
        .ok()?;
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find(|line| line.contains("IOPlatformSerialNumber"))
        .and_then(|line| line.split('"').nth(3))
        .map(str::to_string)
}

#[cfg(target_os = "windows")]
fn machine_serial() -> Option<String> {
    let output = std::process::Command::new("wmic")
        .args(["bios", "get", "serialnumber"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout).to_string();
    let serial = text.lines().nth(1)?.trim().to_string();
    (!serial.is_empty()).then_some(serial)
}
