use crate::error::{OxideError, Result};
use ipnetwork::Ipv4Network;
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{self, Display},
    fs::File,
    io::BufReader,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_CONFIG_PATH: &str = "./ufwoxide.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.start, self.end)
    }
}

/// UFW logging verbosity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Low,
    Medium,
    High,
    Full,
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            LogLevel::Off => "off",
            LogLevel::Low => "low",
            LogLevel::Medium => "medium",
            LogLevel::High => "high",
            LogLevel::Full => "full",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OxideConfig {
    pub probe_address: Ipv4Addr,
    pub ssh_port: u16,
    pub dev_port_range: PortRange,
    pub named_ports: Vec<u16>,
    pub logging: LogLevel,
    pub rules_dir: PathBuf,
    pub rule_files: Vec<String>,
    pub defaults_file: PathBuf,
    pub backup_dir: PathBuf,
    pub report_dir: PathBuf,
    pub log_dir: PathBuf,
    pub mesh_range: Ipv4Network,
    pub mesh_timeout_secs: u64,
    pub confirm_timeout_secs: u64,
}

impl Default for OxideConfig {
    fn default() -> Self {
        OxideConfig {
            probe_address: Ipv4Addr::new(8, 8, 8, 8),
            ssh_port: 22,
            dev_port_range: PortRange {
                start: 3000,
                end: 3010,
            },
            named_ports: vec![5173, 8080],
            logging: LogLevel::Medium,
            rules_dir: PathBuf::from("/etc/ufw"),
            rule_files: [
                "user.rules",
                "user6.rules",
                "before.rules",
                "before6.rules",
                "after.rules",
                "after6.rules",
                "ufw.conf",
            ]
            .iter()
            .map(|f| f.to_string())
            .collect(),
            defaults_file: PathBuf::from("/etc/default/ufw"),
            backup_dir: PathBuf::from("./ufw-backups"),
            report_dir: PathBuf::from("."),
            log_dir: PathBuf::from("."),
            mesh_range: Ipv4Network::new(Ipv4Addr::new(100, 64, 0, 0), 10)
                .unwrap_or_else(|_| Ipv4Network::from(Ipv4Addr::new(100, 64, 0, 0))),
            mesh_timeout_secs: 5,
            confirm_timeout_secs: 30,
        }
    }
}

impl OxideConfig {
    /// Load the config at `path`, or the default location if none is given.
    ///
    /// A missing default file yields the built-in defaults; a missing explicit
    /// file is an error.
    pub fn load(path: Option<&Path>) -> Result<OxideConfig> {
        let (path, explicit) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(OxideConfig::default());
        }
        let reader = BufReader::new(File::open(&path)?);
        let config: OxideConfig =
            serde_json::from_reader(reader).map_err(|source| OxideError::Config {
                path: path.clone(),
                source,
            })?;
        config.check()?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn check(&self) -> Result<()> {
        if self.dev_port_range.start == 0 || self.dev_port_range.start > self.dev_port_range.end {
            return Err(OxideError::InvalidConfig(format!(
                "dev_port_range {} is not a valid range",
                self.dev_port_range
            )));
        }
        if self.ssh_port == 0 || self.named_ports.contains(&0) {
            return Err(OxideError::InvalidConfig("port 0 is not allowed".to_owned()));
        }
        Ok(())
    }

    pub fn mesh_timeout(&self) -> Duration {
        Duration::from_secs(self.mesh_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }
}
