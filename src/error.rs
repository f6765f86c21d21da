use ipnetwork::Ipv4Network;
use std::{io, path::PathBuf};

/// Everything that can stop a run.
///
/// Detection and validation errors are raised before the firewall is touched.
/// Mutation errors always say whether the previous rule set came back.
#[derive(Debug, thiserror::Error)]
pub enum OxideError {
    #[error("could not determine an outbound routing interface")]
    NoRouteInterface,

    #[error("interface {0} has no IPv4 address")]
    NoIpv4Address(String),

    #[error("LAN network {0} is identical to the Docker bridge network")]
    NetworkConflict(Ipv4Network),

    #[error("network {0} is not a private or link-local range and was not confirmed")]
    UntrustedNetwork(Ipv4Network),

    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: subprocess::PopenError,
    },

    #[error("`{command}` timed out after {secs}s")]
    Timeout { command: String, secs: u64 },

    #[error("`{command}` failed ({status}): {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("rule application failed, previous rules restored: {0}")]
    RolledBack(Box<OxideError>),

    #[error("rule application failed ({cause}) and restoring the backup also failed: {restore}")]
    RollbackFailed {
        cause: Box<OxideError>,
        restore: Box<OxideError>,
    },

    #[error("could not read config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("no backup found under {0}")]
    NoBackup(PathBuf),

    #[error("backup {0} already exists")]
    BackupExists(PathBuf),

    #[error("interrupted")]
    Interrupted,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl OxideError {
    /// Process exit status for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            OxideError::Interrupted => 130,
            OxideError::RolledBack(cause) | OxideError::RollbackFailed { cause, .. } => {
                match cause.as_ref() {
                    OxideError::Interrupted => 130,
                    _ => 1,
                }
            }
            _ => 1,
        }
    }
}

pub type Result<T, E = OxideError> = std::result::Result<T, E>;
