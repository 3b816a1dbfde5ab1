pub use anyhow::bail;
use std::fmt::{self, Display, Formatter};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WvmError {
    Config(String),
    Provider(String),
    Provisioning(String),
    Command(String),
    Dependency(String),
    Transport(String),
    Timeout(String),
    Filesystem(String),
    Serialization(String),
    Internal(String),
    Io(#[from] std::io::Error),
    Other(#[from] anyhow::Error),
}

impl Display for WvmError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            WvmError::Config(s) => write!(f, "Configuration error: {}", s),
            WvmError::Provider(s) => write!(f, "Provider error: {}", s),
            WvmError::Provisioning(s) => write!(f, "Provisioning error: {}", s),
            WvmError::Command(s) => write!(f, "Command failed: {}", s),
            WvmError::Dependency(s) => write!(f, "Dependency not found: {}", s),
            WvmError::Transport(s) => write!(f, "Guest transport error: {}", s),
            WvmError::Timeout(s) => write!(f, "Timed out: {}", s),
            WvmError::Filesystem(s) => write!(f, "Filesystem error: {}", s),
            WvmError::Serialization(s) => write!(f, "Serialization error: {}", s),
            WvmError::Internal(s) => write!(f, "Internal error: {}", s),
            WvmError::Io(e) => write!(f, "I/O error: {}", e),
            WvmError::Other(e) => write!(f, "Other error: {}", e),
        }
    }
}

impl From<serde_yaml_ng::Error> for WvmError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        WvmError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for WvmError {
    fn from(err: serde_json::Error) -> Self {
        WvmError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, WvmError>;
