//! Host inspection: process table, per-PID listening sockets, and the
//! editor state database.
//!
//! The three credential sources have different idioms per OS, so they sit
//! behind the [`HostInspector`] capability trait; [`SystemInspector`] is the
//! real implementation and tests substitute their own.

use std::path::Path;
use std::process::Command;

use rusqlite::{Connection, OpenFlags, OptionalExtension};

use super::AUTH_STATUS_KEY;

/// A running language-server process, as parsed from the process table.
#[derive(Debug, Clone, Default)]
pub struct LanguageServer {
    pub pid: u32,
    pub csrf_token: Option<String>,
    pub extension_server_port: Option<u16>,
    pub version: Option<String>,
}

/// Capability interface over the OS surfaces the resolver needs.
pub trait HostInspector: Send + Sync {
    /// Vendor language-server processes, excluding this process.
    fn enumerate_language_servers(&self) -> Vec<LanguageServer>;
    /// TCP ports `pid` is listening on.
    fn listening_ports_for(&self, pid: u32) -> Vec<u16>;
    /// The `apiKey` stored in the editor state database at `path`.
    fn read_auth_db(&self, path: &Path) -> Option<String>;
}

/// Platform substring identifying the language-server binary.
#[cfg(target_os = "macos")]
const SERVER_BINARY: &str = "language_server_macos";
#[cfg(target_os = "linux")]
const SERVER_BINARY: &str = "language_server_linux";
#[cfg(target_os = "windows")]
const SERVER_BINARY: &str = "language_server_windows";

/// Parse one process-table entry into a [`LanguageServer`].
///
/// Both `--flag value` and `--flag=value` spellings occur in the wild. The
/// version token may carry a `+build` suffix, which is stripped.
pub fn parse_server_line(pid: u32, line: &str) -> LanguageServer {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let flag = |name: &str| -> Option<String> {
        let eq_prefix = format!("--{name}=");
        tokens.iter().enumerate().find_map(|(i, token)| {
            if let Some(value) = token.strip_prefix(&eq_prefix) {
                return Some(value.to_string());
            }
            if *token == format!("--{name}") {
                return tokens.get(i + 1).map(|v| (*v).to_string());
            }
            None
        })
    };

    LanguageServer {
        pid,
        csrf_token: flag("csrf_token"),
        extension_server_port: flag("extension_server_port").and_then(|p| p.parse().ok()),
        version: flag("windsurf_version")
            .map(|v| v.split('+').next().unwrap_or(&v).to_string()),
    }
}

/// Real OS-backed inspector.
#[derive(Debug, Default)]
pub struct SystemInspector;

impl HostInspector for SystemInspector {
    fn enumerate_language_servers(&self) -> Vec<LanguageServer> {
        let own_pid = std::process::id();
        process_table()
            .into_iter()
            .filter(|(pid, line)| *pid != own_pid && line.contains(SERVER_BINARY))
            .map(|(pid, line)| parse_server_line(pid, &line))
            .collect()
    }

    fn listening_ports_for(&self, pid: u32) -> Vec<u16> {
        listening_ports(pid)
    }

    fn read_auth_db(&self, path: &Path) -> Option<String> {
        let conn =
            Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY).ok()?;
        let value: Option<String> = conn
            .query_row(
                "SELECT value FROM ItemTable WHERE key = ?1",
                [AUTH_STATUS_KEY],
                |row| row.get(0),
            )
            .optional()
            .ok()??;
        let value: String = value?;
        let parsed: serde_json::Value = serde_json::from_str(&value).ok()?;
        parsed
            .get("apiKey")
            .and_then(|key| key.as_str())
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }
}

/// `(pid, command line)` entries of the process table.
#[cfg(unix)]
fn process_table() -> Vec<(u32, String)> {
    let Ok(output) = Command::new("ps").args(["-axo", "pid=,args="]).output() else {
        return Vec::new();
    };
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let trimmed = line.trim_start();
            let (pid, rest) = trimmed.split_once(char::is_whitespace)?;
            Some((pid.parse().ok()?, rest.to_string()))
        })
        .collect()
}

#[cfg(windows)]
fn process_table() -> Vec<(u32, String)> {
    // wmic emits "CommandLine=..." / "ProcessId=..." blocks in list format.
    let Ok(output) = Command::new("wmic")
        .args(["process", "get", "ProcessId,CommandLine", "/format:list"])
        .output()
    else {
        return Vec::new();
    };
    let text = String::from_utf8_lossy(&output.stdout);
    let mut entries = Vec::new();
    let mut command_line = String::new();
    for line in text.lines() {
        if let Some(value) = line.strip_prefix("CommandLine=") {
            command_line = value.to_string();
        } else if let Some(value) = line.strip_prefix("ProcessId=") {
            if let Ok(pid) = value.trim().parse() {
                entries.push((pid, std::mem::take(&mut command_line)));
            }
        }
    }
    entries
}

#[cfg(target_os = "linux")]
fn listening_ports(pid: u32) -> Vec<u16> {
    let ports = proc_net_ports(pid);
    if !ports.is_empty() {
        return ports;
    }
    ss_ports(pid)
}

/// Socket inodes owned by `pid`, joined against the kernel TCP tables.
#[cfg(target_os = "linux")]
fn proc_net_ports(pid: u32) -> Vec<u16> {
    const TCP_LISTEN: &str = "0A";

    let mut inodes = std::collections::HashSet::new();
    if let Ok(entries) = std::fs::read_dir(format!("/proc/{pid}/fd")) {
        for entry in entries.flatten() {
            if let Ok(target) = std::fs::read_link(entry.path()) {
                let target = target.to_string_lossy().into_owned();
                if let Some(inode) = target
                    .strip_prefix("socket:[")
                    .and_then(|t| t.strip_suffix(']'))
                {
                    inodes.insert(inode.to_string());
                }
            }
        }
    }
    if inodes.is_empty() {
        return Vec::new();
    }

    let mut ports = Vec::new();
    for table in ["/proc/net/tcp", "/proc/net/tcp6"] {
        let Ok(content) = std::fs::read_to_string(table) else {
            continue;
        };
        for line in content.lines().skip(1) {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 10 || cols[3] != TCP_LISTEN || !inodes.contains(cols[9]) {
                continue;
            }
            if let Some(port) = cols[1]
                .rsplit(':')
                .next()
                .and_then(|hex| u16::from_str_radix(hex, 16).ok())
            {
                ports.push(port);
            }
        }
    }
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(target_os = "linux")]
fn ss_ports(pid: u32) -> Vec<u16> {
    let Ok(output) = Command::new("ss").args(["-tlnp"]).output() else {
        return Vec::new();
    };
    let marker = format!("pid={pid},");
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.contains(&marker))
        .filter_map(|line| {
            let local = line.split_whitespace().nth(3)?;
            local.rsplit(':').next()?.parse().ok()
        })
        .collect()
}

#[cfg(target_os = "macos")]
fn listening_ports(pid: u32) -> Vec<u16> {
    let Ok(output) = Command::new("lsof")
        .args(["-a", "-p", &pid.to_string(), "-i", "-P", "-n"])
        .output()
    else {
        return Vec::new();
    };
    let mut ports: Vec<u16> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter(|line| line.contains("LISTEN"))
        .filter_map(|line| {
            let name = line.split_whitespace().rev().nth(1)?;
            name.rsplit(':').next()?.parse().ok()
        })
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(windows)]
fn listening_ports(pid: u32) -> Vec<u16> {
    let Ok(output) = Command::new("netstat").args(["-ano", "-p", "tcp"]).output() else {
        return Vec::new();
    };
    let pid_str = pid.to_string();
    let mut ports: Vec<u16> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 || cols[3] != "LISTENING" || cols[4] != pid_str {
                return None;
            }
            cols[1].rsplit(':').next()?.parse().ok()
        })
        .collect();
    ports.sort_unstable();
    ports.dedup();
    ports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_server_line_space_flags() {
        let line = "/opt/windsurf/bin/language_server_linux_x64 \
                    --csrf_token 9f8a7b6c-1d2e-3f40-5161-728394a5b6c7 \
                    --extension_server_port 42100 \
                    --windsurf_version 1.36.2+win.4821";
        let server = parse_server_line(4242, line);
        assert_eq!(server.pid, 4242);
        assert_eq!(
            server.csrf_token.as_deref(),
            Some("9f8a7b6c-1d2e-3f40-5161-728394a5b6c7")
        );
        assert_eq!(server.extension_server_port, Some(42100));
        assert_eq!(server.version.as_deref(), Some("1.36.2"));
    }

    #[test]
    fn test_parse_server_line_equals_flags() {
        let line = "language_server_macos_arm --csrf_token=abc --extension_server_port=7000";
        let server = parse_server_line(1, line);
        assert_eq!(server.csrf_token.as_deref(), Some("abc"));
        assert_eq!(server.extension_server_port, Some(7000));
        assert_eq!(server.version, None);
    }

    #[test]
    fn test_parse_server_line_missing_flags() {
        let server = parse_server_line(9, "language_server_linux_x64 --inference_api");
        assert_eq!(server.csrf_token, None);
        assert_eq!(server.extension_server_port, None);
    }
}
