//! User settings and their pre-flight validation

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;
use crate::traits::RemoteTarget;
use crate::types::DeviceClass;

/// Default per-stage connection timeout
pub const DEFAULT_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Default session wall time
pub const DEFAULT_WALLTIME: &str = "06:00:00";

/// Cluster flavour, each served by its own scheduler server
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    #[default]
    Public,
    Nda,
    Fpga,
}

impl Cluster {
    /// Scheduler server identifier for this cluster
    pub fn server(&self) -> &'static str {
        match self {
            Cluster::Public => "v-qsvr-1",
            Cluster::Nda => "v-qsvr-nda",
            Cluster::Fpga => "v-qsvr-fpga",
        }
    }
}

/// How the tunnel job is submitted
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionMode {
    /// Placeholder batch job polled via status queries
    #[default]
    Batch,
    /// `qsub -I` typed into the head-node session
    Interactive,
}

/// Settings consumed by the connection core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Which cluster to use
    pub cluster: Cluster,

    /// Route SSH through a SOCKS proxy
    pub proxy: bool,

    /// Proxy endpoint, `scheme://host[:port]` or `host:port`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_server: Option<String>,

    /// Per-stage connection timeout in seconds
    #[serde(with = "duration_secs")]
    pub connection_timeout: Duration,

    /// Requested job wall time, `hh:mm:ss`; empty disables the limit
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_walltime: Option<String>,

    /// Device class preselected in the node prompt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_class: Option<DeviceClass>,

    /// Tunnel job submission strategy
    pub submission: SubmissionMode,

    /// Shell used to run ssh
    pub shell_path: PathBuf,

    /// SSH client configuration file
    pub ssh_config_path: PathBuf,

    /// SSH known hosts file
    pub known_hosts_path: PathBuf,

    /// Head node alias in the SSH config
    pub host_alias: String,

    /// Domain suffix appended to compute node names
    pub node_domain: String,

    /// Directory where log sinks are created
    pub sink_dir: PathBuf,

    /// Interval between tunnel job status queries, in seconds
    #[serde(with = "duration_secs")]
    pub placement_poll_interval: Duration,

    /// Upper bound on waiting for the tunnel job to be placed, in seconds
    #[serde(with = "duration_secs")]
    pub placement_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        let ssh_dir = dirs::home_dir().unwrap_or_default().join(".ssh");

        Self {
            cluster: Cluster::default(),
            proxy: false,
            proxy_server: None,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            session_walltime: Some(DEFAULT_WALLTIME.to_string()),
            device_class: None,
            submission: SubmissionMode::default(),
            shell_path: PathBuf::from("/bin/bash"),
            ssh_config_path: ssh_dir.join("config"),
            known_hosts_path: ssh_dir.join("known_hosts"),
            host_alias: "devcloud".to_string(),
            node_domain: ".aidevcloud".to_string(),
            sink_dir: std::env::temp_dir(),
            placement_poll_interval: Duration::from_secs(5),
            placement_timeout: Duration::from_secs(120),
        }
    }
}

/// Settings that passed validation, with derived values
#[derive(Debug, Clone)]
pub struct ValidatedSettings {
    /// The settings as loaded
    pub settings: Settings,
    /// Effective per-stage timeout
    pub connection_timeout: Duration,
    /// Normalized wall time clause, if any
    pub walltime: Option<String>,
    /// Wall time as a duration, if any
    pub session_deadline: Option<Duration>,
}

impl ValidatedSettings {
    /// Alias used to reach the head node
    pub fn head_alias(&self) -> String {
        if self.settings.proxy {
            format!("{}.proxy", self.settings.host_alias)
        } else {
            self.settings.host_alias.clone()
        }
    }

    /// Fully qualified host name of a compute node
    pub fn node_host(&self, node: &str) -> String {
        format!("{}{}", node, self.settings.node_domain)
    }

    /// Scheduler server the cluster maps to
    pub fn scheduler_server(&self) -> &'static str {
        self.settings.cluster.server()
    }

    /// Remote command target for the head node
    pub fn remote_target(&self) -> RemoteTarget {
        RemoteTarget {
            shell: self.settings.shell_path.clone(),
            host_alias: self.head_alias(),
            timeout: self.connection_timeout,
        }
    }
}

impl Settings {
    /// Check formats and derive the values the core needs
    pub fn validate(&self) -> Result<ValidatedSettings, ConfigError> {
        let connection_timeout = if self.connection_timeout.is_zero() {
            tracing::warn!(
                "connection_timeout is not a positive number, using the default of {}s",
                DEFAULT_CONNECTION_TIMEOUT.as_secs()
            );
            DEFAULT_CONNECTION_TIMEOUT
        } else {
            self.connection_timeout
        };

        self.check_proxy()?;

        let walltime = self
            .session_walltime
            .as_deref()
            .map(|w| w.chars().filter(|c| !c.is_whitespace()).collect::<String>())
            .filter(|w| !w.is_empty());

        let session_deadline = match &walltime {
            Some(w) => Some(validate_walltime(w, connection_timeout)?),
            None => None,
        };

        Ok(ValidatedSettings {
            settings: self.clone(),
            connection_timeout,
            walltime,
            session_deadline,
        })
    }

    fn check_proxy(&self) -> Result<(), ConfigError> {
        if !self.proxy {
            return Ok(());
        }

        let server = self
            .proxy_server
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or(ConfigError::ProxyServerMissing)?;

        if is_url(server) || is_host_port(server) {
            Ok(())
        } else {
            Err(ConfigError::ProxyServerInvalid(server.to_string()))
        }
    }
}

/// Parse an `hh:mm:ss` wall time
pub fn parse_walltime(value: &str) -> Result<Duration, ConfigError> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return Err(ConfigError::WallTimeFormat(value.to_string()));
    }

    let mut fields = [0i64; 3];
    for (field, part) in fields.iter_mut().zip(&parts) {
        // Signs other than a leading minus are not part of the format
        let digits = part.strip_prefix('-').unwrap_or(part);
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ConfigError::WallTimeFormat(value.to_string()));
        }
        *field = part
            .parse::<i64>()
            .map_err(|_| ConfigError::WallTimeFormat(value.to_string()))?;
    }
    let [hh, mm, ss] = fields;

    if !(0..=24).contains(&hh) || !(0..=59).contains(&mm) || !(0..=59).contains(&ss) {
        return Err(ConfigError::WallTimeValue(value.to_string()));
    }
    if hh == 24 && (mm != 0 || ss != 0) {
        return Err(ConfigError::WallTimeValue(value.to_string()));
    }

    Ok(Duration::from_millis(((hh * 3600 + mm * 60 + ss) * 1000) as u64))
}

/// Parse a wall time and require it to outlast three connection stages
pub fn validate_walltime(
    value: &str,
    connection_timeout: Duration,
) -> Result<Duration, ConfigError> {
    let walltime = parse_walltime(value)?;
    let minimum = connection_timeout * 3;
    if walltime <= minimum {
        return Err(ConfigError::WallTimeTooShort {
            walltime: value.to_string(),
            min_secs: minimum.as_secs(),
        });
    }
    Ok(walltime)
}

fn is_url(value: &str) -> bool {
    match value.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.is_empty()
        }
        None => false,
    }
}

fn is_host_port(value: &str) -> bool {
    if value.parse::<SocketAddr>().is_ok() {
        return true;
    }
    match value.rsplit_once(':') {
        Some((host, port)) => {
            !host.is_empty()
                && host
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.'))
                && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

// Durations are stored as whole seconds in the config file
mod duration_secs {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TIMEOUT: Duration = Duration::from_secs(30);

    #[test]
    fn test_walltime_converts_to_millis() {
        for (value, hh, mm, ss) in [
            ("00:01:31", 0u64, 1u64, 31u64),
            ("06:00:00", 6, 0, 0),
            ("23:59:59", 23, 59, 59),
            ("12:30:05", 12, 30, 5),
        ] {
            let parsed = parse_walltime(value).unwrap();
            assert_eq!(
                parsed.as_millis() as u64,
                (hh * 3600 + mm * 60 + ss) * 1000,
                "{}",
                value
            );
        }
    }

    #[test]
    fn test_walltime_24_hours_only_exact() {
        assert_eq!(
            parse_walltime("24:00:00").unwrap(),
            Duration::from_secs(24 * 3600)
        );
        assert!(matches!(
            parse_walltime("24:00:01"),
            Err(ConfigError::WallTimeValue(_))
        ));
        assert!(matches!(
            parse_walltime("24:01:00"),
            Err(ConfigError::WallTimeValue(_))
        ));
    }

    #[test]
    fn test_walltime_rejects_bad_format() {
        for value in [
            "invalid string",
            "aa:00:00",
            "00:aa:00",
            "00:00:aa",
            "1:2",
            "1:2:3:4",
            "+1:00:00",
            "00:+5:00",
            "00::00",
        ] {
            assert!(
                matches!(parse_walltime(value), Err(ConfigError::WallTimeFormat(_))),
                "{}",
                value
            );
        }
    }

    #[test]
    fn test_walltime_rejects_out_of_range() {
        for value in ["-10:00:00", "00:-10:00", "00:00:-10", "25:00:00", "00:65:00", "00:00:60"] {
            assert!(
                matches!(parse_walltime(value), Err(ConfigError::WallTimeValue(_))),
                "{}",
                value
            );
        }
    }

    #[test]
    fn test_walltime_must_exceed_three_timeouts() {
        assert!(matches!(
            validate_walltime("00:01:29", TIMEOUT),
            Err(ConfigError::WallTimeTooShort { min_secs: 90, .. })
        ));
        assert!(validate_walltime("00:01:30", TIMEOUT).is_err());
        assert_eq!(
            validate_walltime("00:01:31", TIMEOUT).unwrap(),
            Duration::from_secs(91)
        );
    }

    #[test]
    fn test_validate_defaults() {
        let validated = Settings::default().validate().unwrap();
        assert_eq!(validated.connection_timeout, TIMEOUT);
        assert_eq!(validated.walltime.as_deref(), Some("06:00:00"));
        assert_eq!(
            validated.session_deadline,
            Some(Duration::from_millis(21_600_000))
        );
        assert_eq!(validated.head_alias(), "devcloud");
        assert_eq!(validated.node_host("s001-n042"), "s001-n042.aidevcloud");
        assert_eq!(validated.scheduler_server(), "v-qsvr-1");

        let target = validated.remote_target();
        assert_eq!(target.host_alias, "devcloud");
        assert_eq!(target.timeout, TIMEOUT);
    }

    #[test]
    fn test_validate_strips_whitespace_and_allows_empty_walltime() {
        let settings = Settings {
            session_walltime: Some(" 01:00:00 ".into()),
            ..Default::default()
        };
        assert_eq!(
            settings.validate().unwrap().walltime.as_deref(),
            Some("01:00:00")
        );

        let settings = Settings {
            session_walltime: Some(String::new()),
            ..Default::default()
        };
        let validated = settings.validate().unwrap();
        assert!(validated.walltime.is_none());
        assert!(validated.session_deadline.is_none());
    }

    #[test]
    fn test_zero_timeout_falls_back_to_default() {
        let settings = Settings {
            connection_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert_eq!(settings.validate().unwrap().connection_timeout, TIMEOUT);
    }

    #[test]
    fn test_proxy_requires_server() {
        let settings = Settings {
            proxy: true,
            proxy_server: Some(String::new()),
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ProxyServerMissing)
        ));

        let settings = Settings {
            proxy: true,
            proxy_server: None,
            ..Default::default()
        };
        assert!(matches!(
            settings.validate(),
            Err(ConfigError::ProxyServerMissing)
        ));
    }

    #[test]
    fn test_proxy_server_formats() {
        for good in [
            "http://proxy.example.com:911",
            "socks5://10.0.0.1:1080",
            "10.0.0.1:1080",
            "proxy.example.com:911",
        ] {
            let settings = Settings {
                proxy: true,
                proxy_server: Some(good.into()),
                ..Default::default()
            };
            let validated = settings.validate().unwrap();
            assert_eq!(validated.head_alias(), "devcloud.proxy");
        }

        for bad in ["test_proxy_server_string", "host:port", "://nothing"] {
            let settings = Settings {
                proxy: true,
                proxy_server: Some(bad.into()),
                ..Default::default()
            };
            assert!(
                matches!(settings.validate(), Err(ConfigError::ProxyServerInvalid(_))),
                "{}",
                bad
            );
        }
    }

    #[test]
    fn test_settings_toml_roundtrip() {
        let toml_text = r#"
            cluster = "nda"
            connection_timeout = 45
            session_walltime = "02:00:00"
            device_class = "gpu"
            submission = "interactive"
        "#;
        let settings: Settings = toml::from_str(toml_text).unwrap();
        assert_eq!(settings.cluster, Cluster::Nda);
        assert_eq!(settings.connection_timeout, Duration::from_secs(45));
        assert_eq!(settings.device_class, Some(DeviceClass::Gpu));
        assert_eq!(settings.submission, SubmissionMode::Interactive);
        assert_eq!(settings.host_alias, "devcloud");

        let text = toml::to_string_pretty(&settings).unwrap();
        assert!(text.contains("connection_timeout = 45"));
        assert!(text.contains("cluster = \"nda\""));
    }
}
