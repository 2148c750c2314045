//! SSH client configuration and trust store helpers

use std::io;
use std::path::Path;

use dc_core::error::ConfigError;

/// Host keys published for `ssh.devcloud.intel.com`
pub const GATEWAY_HOST_KEYS: &[&str] = &[
    "AAAAC3NzaC1lZDI1NTE5AAAAIDIGwSUzJCMFNSftDKLn/EPXIJP6MKAH8TkfxgoN3tvB",
    "AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBPhRp937We7Ki2wXpQLV9WshuwxmaCKChl5bDihaN9OO0nxg5ZttUmuW+iT+ncv8hNVpESZS4HTOiOjt/V5M6Tk=",
];

/// Host keys of the head node behind the gateway
pub const HEAD_NODE_HOST_KEYS: &[&str] = &[
    "AAAAC3NzaC1lZDI1NTE5AAAAIJY1hqNQCSK3XI2naNfg8YwG6wvqGcxj87dNMVNYTqqT",
    "AAAAE2VjZHNhLXNoYTItbmlzdHAyNTYAAAAIbmlzdHAyNTYAAABBBPRkwT920FAPq7DkQ3ViO49IO/5il9rOK085sQ+QT9rP3dbKxPfVyNbVvzQzIdjUhG+kcqIuyYqZlAwbRXeMTx4=",
];

/// `User` of the `Host` block that lists `alias`
pub fn extract_user(config: &str, alias: &str) -> Option<String> {
    let mut in_block = false;

    for line in config.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let (key, value) = match line.split_once(|c: char| c.is_whitespace() || c == '=') {
            Some((key, value)) => (key, value.trim_start_matches(|c: char| c.is_whitespace() || c == '=').trim()),
            None => continue,
        };

        if key.eq_ignore_ascii_case("Host") {
            in_block = value.split_whitespace().any(|pattern| pattern == alias);
        } else if key.eq_ignore_ascii_case("Match") {
            in_block = false;
        } else if in_block && key.eq_ignore_ascii_case("User") && !value.is_empty() {
            return Some(value.trim_matches('"').to_string());
        }
    }

    None
}

/// Read the SSH config and resolve the remote user name for `alias`
pub fn read_user(path: &Path, alias: &str) -> Result<String, ConfigError> {
    let config = match std::fs::read_to_string(path) {
        Ok(config) => config,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::SshConfigMissing(path.to_path_buf()))
        }
        Err(e) => {
            return Err(ConfigError::Invalid(format!(
                "Failed to read SSH config {:?}: {}",
                path, e
            )))
        }
    };

    extract_user(&config, alias).ok_or_else(|| ConfigError::HostAliasMissing {
        alias: alias.to_string(),
        path: path.to_path_buf(),
    })
}

/// Whether the known hosts text trusts both endpoints
pub fn known_hosts_trusted(known_hosts: &str) -> bool {
    [GATEWAY_HOST_KEYS, HEAD_NODE_HOST_KEYS]
        .iter()
        .all(|keys| keys.iter().any(|key| known_hosts.contains(key)))
}

/// Same as [`known_hosts_trusted`] for a file; a missing file trusts nothing
pub fn known_hosts_file_trusted(path: &Path) -> bool {
    match std::fs::read_to_string(path) {
        Ok(text) => known_hosts_trusted(&text),
        Err(e) => {
            tracing::debug!("Known hosts {:?} not readable: {}", path, e);
            false
        }
    }
}
