use crate::error::{OxideError, Result};
use crate::os::detect::NetworkFacts;
use crate::utils::{
    config::{LogLevel, OxideConfig},
    tools::Shell,
};
use ipnetwork::Ipv4Network;
use log::{debug, error, info, warn};
use std::{
    fmt::{self, Display},
    fs, io,
    path::{Path, PathBuf},
};

const BACKUP_PREFIX: &str = "backup_";
const STATE_FILE: &str = "state";
const STATUS_FILE: &str = "status.txt";
const DEFAULTS_COPY: &str = "default_ufw";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    Allow,
    Deny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Incoming,
    Outgoing,
    Routed,
}

/// One ufw invocation that changes the firewall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FirewallOp {
    Reset,
    Default { policy: Policy, direction: Direction },
    Allow(String),
    Limit(String),
    AllowFrom(Ipv4Network),
    AllowPortFrom { network: Ipv4Network, port: String },
    Logging(LogLevel),
    Enable,
}

impl FirewallOp {
    pub fn args(&self) -> Vec<String> {
        match self {
            FirewallOp::Reset => vec!["--force".into(), "reset".into()],
            FirewallOp::Default { policy, direction } => vec![
                "default".into(),
                match policy {
                    Policy::Allow => "allow",
                    Policy::Deny => "deny",
                }
                .into(),
                match direction {
                    Direction::Incoming => "incoming",
                    Direction::Outgoing => "outgoing",
                    Direction::Routed => "routed",
                }
                .into(),
            ],
            FirewallOp::Allow(port) => vec!["allow".into(), port.clone()],
            FirewallOp::Limit(port) => vec!["limit".into(), port.clone()],
            FirewallOp::AllowFrom(network) => {
                vec!["allow".into(), "from".into(), network.to_string()]
            }
            FirewallOp::AllowPortFrom { network, port } => vec![
                "allow".into(),
                "from".into(),
                network.to_string(),
                "to".into(),
                "any".into(),
                "port".into(),
                port.clone(),
                "proto".into(),
                "tcp".into(),
            ],
            FirewallOp::Logging(level) => vec!["logging".into(), level.to_string()],
            FirewallOp::Enable => vec!["--force".into(), "enable".into()],
        }
    }
}

impl Display for FirewallOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ufw {}", self.args().join(" "))
    }
}

/// The full rule set for one host, in the order it is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RulePlan {
    ops: Vec<FirewallOp>,
}

impl RulePlan {
    pub fn build(facts: &NetworkFacts, config: &OxideConfig) -> RulePlan {
        let ssh = format!("{}/tcp", config.ssh_port);
        let networks = facts.allowed_networks();

        let mut ops = vec![
            FirewallOp::Reset,
            FirewallOp::Default {
                policy: Policy::Deny,
                direction: Direction::Incoming,
            },
            FirewallOp::Default {
                policy: Policy::Allow,
                direction: Direction::Outgoing,
            },
            FirewallOp::Default {
                policy: Policy::Deny,
                direction: Direction::Routed,
            },
            FirewallOp::Allow(ssh.clone()),
            FirewallOp::Limit(ssh),
        ];
        ops.extend(networks.iter().copied().map(FirewallOp::AllowFrom));
        for network in &networks {
            ops.push(FirewallOp::AllowPortFrom {
                network: *network,
                port: config.dev_port_range.to_string(),
            });
            for port in &config.named_ports {
                ops.push(FirewallOp::AllowPortFrom {
                    network: *network,
                    port: port.to_string(),
                });
            }
        }
        ops.push(FirewallOp::Logging(config.logging));
        ops.push(FirewallOp::Enable);
        RulePlan { ops }
    }

    pub fn ops(&self) -> &[FirewallOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }
}

impl Display for RulePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for op in &self.ops {
            writeln!(f, "{}", op)?;
        }
        Ok(())
    }
}

/// Current `ufw status verbose` listing.
pub fn listing(shell: &Shell) -> Result<String> {
    Ok(shell.ufw(&["status", "verbose"])?.stdout)
}

/// Copies of the ufw rule files taken before a run.
///
/// `ufw default` and `ufw logging` write outside the rule files, so the
/// policy defaults file is saved alongside them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backup {
    pub dir: PathBuf,
    pub was_active: bool,
    pub files: Vec<String>,
    pub defaults: Option<PathBuf>,
}

fn copy(shell: &Shell, source: &Path, target: &Path) -> Result<()> {
    let (from, to) = (source.to_string_lossy(), target.to_string_lossy());
    shell.checked("cp", &["-p", &*from, &*to])?;
    Ok(())
}

impl Backup {
    pub fn take(shell: &Shell, config: &OxideConfig, stamp: &str) -> Result<Backup> {
        let dir = config
            .backup_dir
            .join(format!("{}{}", BACKUP_PREFIX, stamp));
        fs::create_dir_all(&config.backup_dir)?;
        if let Err(e) = fs::create_dir(&dir) {
            if e.kind() == io::ErrorKind::AlreadyExists {
                return Err(OxideError::BackupExists(dir));
            }
            return Err(e.into());
        }

        let status = listing(shell)?;
        let was_active = status.lines().any(|l| l.trim() == "Status: active");
        fs::write(dir.join(STATUS_FILE), &status)?;

        let mut files = Vec::new();
        for file in &config.rule_files {
            let source = config.rules_dir.join(file);
            if !source.exists() {
                debug!("{} does not exist, not backing it up", source.display());
                continue;
            }
            copy(shell, &source, &dir.join(file))?;
            files.push(file.clone());
        }
        let defaults = if config.defaults_file.exists() {
            copy(shell, &config.defaults_file, &dir.join(DEFAULTS_COPY))?;
            Some(config.defaults_file.clone())
        } else {
            debug!("{} does not exist, not backing it up", config.defaults_file.display());
            None
        };
        fs::write(
            dir.join(STATE_FILE),
            if was_active { "active\n" } else { "inactive\n" },
        )?;
        info!("Backed up {} rule files to {}", files.len(), dir.display());

        Ok(Backup {
            dir,
            was_active,
            files,
            defaults,
        })
    }

    pub fn load(dir: &Path, config: &OxideConfig) -> Result<Backup> {
        let state = fs::read_to_string(dir.join(STATE_FILE))?;
        let files = config
            .rule_files
            .iter()
            .filter(|file| dir.join(file).exists())
            .cloned()
            .collect();
        let defaults = dir
            .join(DEFAULTS_COPY)
            .exists()
            .then(|| config.defaults_file.clone());
        Ok(Backup {
            dir: dir.to_path_buf(),
            was_active: state.trim() == "active",
            files,
            defaults,
        })
    }

    /// Newest backup under the configured backup directory.
    pub fn latest(config: &OxideConfig) -> Result<Backup> {
        let root = &config.backup_dir;
        let mut newest: Option<PathBuf> = None;
        if root.is_dir() {
            for entry in fs::read_dir(root)? {
                let path = entry?.path();
                let is_backup = path.is_dir()
                    && path
                        .file_name()
                        .map(|n| n.to_string_lossy().starts_with(BACKUP_PREFIX))
                        .unwrap_or(false);
                // stamps sort chronologically by name
                if is_backup && newest.as_ref().map(|n| path > *n).unwrap_or(true) {
                    newest = Some(path);
                }
            }
        }
        match newest {
            Some(dir) => Backup::load(&dir, config),
            None => Err(OxideError::NoBackup(root.clone())),
        }
    }

    /// Put the saved rule files back and return ufw to its saved state.
    pub fn restore(&self, shell: &Shell, config: &OxideConfig) -> Result<()> {
        for file in &self.files {
            let target = config.rules_dir.join(file);
            copy(shell, &self.dir.join(file), &target)?;
            debug!("Restored {}", target.display());
        }
        if let Some(target) = &self.defaults {
            copy(shell, &self.dir.join(DEFAULTS_COPY), target)?;
            debug!("Restored {}", target.display());
        }
        if self.was_active {
            shell.ufw(&["--force", "enable"])?;
            shell.ufw(&["reload"])?;
        } else {
            shell.ufw(&["disable"])?;
        }
        info!("Restored firewall rules from {}", self.dir.display());
        Ok(())
    }
}

/// Applies a [`RulePlan`] with the pre-run rules as the rollback point.
pub struct Transaction<'a> {
    shell: &'a Shell<'a>,
    config: &'a OxideConfig,
    backup: Backup,
    applied: usize,
}

impl<'a> Transaction<'a> {
    pub fn begin(shell: &'a Shell<'a>, config: &'a OxideConfig, stamp: &str) -> Result<Self> {
        let backup = Backup::take(shell, config, stamp)?;
        Ok(Transaction {
            shell,
            config,
            backup,
            applied: 0,
        })
    }

    pub fn apply(&mut self, plan: &RulePlan) -> Result<()> {
        for op in plan.ops() {
            let args = op.args();
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            let result = self
                .shell
                .check_interrupt()
                .and_then(|_| self.shell.ufw(&args));
            if let Err(cause) = result {
                return Err(self.rollback(cause));
            }
            info!("Applied `{}`", op);
            self.applied += 1;
        }
        Ok(())
    }

    fn rollback(&self, cause: OxideError) -> OxideError {
        error!(
            "Failed after {} of the planned commands: {}",
            self.applied, cause
        );
        warn!("Restoring rules from {}", self.backup.dir.display());
        match self.backup.restore(self.shell, self.config) {
            Ok(()) => OxideError::RolledBack(Box::new(cause)),
            Err(restore) => OxideError::RollbackFailed {
                cause: Box::new(cause),
                restore: Box::new(restore),
            },
        }
    }

    /// Keep the new rules; the backup stays on disk for `revive`.
    pub fn commit(self) -> Backup {
        debug!("Committed {} commands", self.applied);
        self.backup
    }
}
