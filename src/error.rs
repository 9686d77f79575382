//! One error type to rule the binary.

use crate::config::ConfigError;
use crate::coordinates::TransformError;
use crate::motor_control::CommandError;
use crate::session::SessionError;
use crate::storage::StorageError;
use crate::stroke_cache::CacheError;
use std::{error::Error, fmt::Display};

/// Every error the `cubetrace` binary can end on.
#[derive(Debug)]
pub enum CubeTraceError {
    /// The config file could not be used.
    Config(ConfigError),
    /// The trace store failed.
    Storage(StorageError),
    /// The stroke cache failed.
    Cache(CacheError),
    /// The drawing config does not make a usable transform.
    Transform(TransformError),
    /// Connecting or talking to a cube failed.
    Session(SessionError),
    /// Driving the cube failed.
    Command(CommandError),
    /// A named trace does not exist.
    NoSuchTrace(String),
}

impl Display for CubeTraceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CubeTraceError::Config(e) => write!(f, "config: {}", e),
            CubeTraceError::Storage(e) => write!(f, "storage: {}", e),
            CubeTraceError::Cache(e) => write!(f, "cache: {}", e),
            CubeTraceError::Transform(e) => write!(f, "transform: {}", e),
            CubeTraceError::Session(e) => write!(f, "session: {}", e),
            CubeTraceError::Command(e) => write!(f, "command: {}", e),
            CubeTraceError::NoSuchTrace(name) => write!(f, "no trace named '{}'", name),
        }
    }
}

impl Error for CubeTraceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CubeTraceError::Config(e) => Some(e),
            CubeTraceError::Storage(e) => Some(e),
            CubeTraceError::Cache(e) => Some(e),
            CubeTraceError::Transform(e) => Some(e),
            CubeTraceError::Session(e) => Some(e),
            CubeTraceError::Command(e) => Some(e),
            CubeTraceError::NoSuchTrace(_) => None,
        }
    }
}

impl From<ConfigError> for CubeTraceError {
    fn from(value: ConfigError) -> Self {
        Self::Config(value)
    }
}

impl From<StorageError> for CubeTraceError {
    fn from(value: StorageError) -> Self {
        Self::Storage(value)
    }
}

impl From<CacheError> for CubeTraceError {
    fn from(value: CacheError) -> Self {
        Self::Cache(value)
    }
}

impl From<TransformError> for CubeTraceError {
    fn from(value: TransformError) -> Self {
        Self::Transform(value)
    }
}

impl From<SessionError> for CubeTraceError {
    fn from(value: SessionError) -> Self {
        Self::Session(value)
    }
}

impl From<CommandError> for CubeTraceError {
    fn from(value: CommandError) -> Self {
        Self::Command(value)
    }
}
