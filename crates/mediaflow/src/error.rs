use std::path::PathBuf;
use thiserror::Error;

pub use crate::db::DatabaseError;

#[derive(Error, Debug)]
pub enum MediaflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepoError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    #[error("IO error for path '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl MediaflowError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("{type_name} '{id}' not found")]
    NotFound { type_name: &'static str, id: String },

    #[error("{type_name} '{id}' already exists")]
    AlreadyExists { type_name: &'static str, id: String },

    #[error("{type_name} '{id}' was modified concurrently (expected version {expected}, found {found})")]
    VersionConflict {
        type_name: &'static str,
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Failed to (de)serialize {type_name}: {source}")]
    Serialization {
        type_name: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Repository lock poisoned")]
    LockPoisoned,
}

impl RepoError {
    /// True for the errors an optimistic writer expects when it loses a race.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            RepoError::AlreadyExists { .. } | RepoError::VersionConflict { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error for '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Path not found: {0}")]
    NotFound(String),

    #[error("Path escapes volume root: {0}")]
    InvalidPath(String),

    #[error("Unsupported volume type '{kind}' for '{name}'")]
    UnsupportedVolume { name: String, kind: String },

    #[error("Volume '{name}' is missing parameter '{param}'")]
    MissingParameter { name: String, param: String },

    #[error("Scan of '{name}' failed: {message}")]
    Scan { name: String, message: String },
}

#[derive(Error, Debug)]
pub enum ProfileError {
    #[error("Profile '{0}' not found")]
    NotFound(String),

    #[error("Profile inheritance cycle: {}", chain.join(" -> "))]
    Cycle { chain: Vec<String> },

    #[error("Invalid output pattern '{pattern}' in profile '{profile}': {reason}")]
    InvalidPattern {
        profile: String,
        pattern: String,
        reason: String,
    },

    #[error("Repository error while resolving profile: {0}")]
    Repository(#[from] RepoError),
}

#[derive(Error, Debug)]
pub enum OperationError {
    #[error("Unknown operation '{0}'")]
    Unknown(String),

    #[error("Operation '{operation}' failed: {message}")]
    Failed { operation: String, message: String },

    #[error("Failed to spawn '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Reasons a single profile run did not produce a usable result.
#[derive(Error, Debug)]
pub enum ExecError {
    #[error("no operation object for profile={profile}")]
    MissingOperation { profile: String },

    #[error("no media for profile={profile}")]
    MissingMedia { profile: String },

    #[error("no command for profile={profile}")]
    MissingCommand { profile: String },

    #[error("no args for profile={profile} asset={asset}")]
    MissingArgs { profile: String, asset: String },

    #[error("no result for profile={profile} asset={asset}")]
    MissingResult { profile: String, asset: String },

    #[error("unexpected analysis output for profile={profile} asset={asset}")]
    UnexpectedAnalysis { profile: String, asset: String },

    #[error(
        "exitCode={exit_code} args={args:?} profile={profile} asset={asset} stdout={stdout} stderr={stderr}"
    )]
    CommandFailed {
        profile: String,
        asset: String,
        exit_code: i32,
        args: Vec<String>,
        stdout: String,
        stderr: String,
    },

    #[error("operation failed: {0}")]
    Operation(#[from] OperationError),

    #[error("failed to prepare output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, MediaflowError>;
