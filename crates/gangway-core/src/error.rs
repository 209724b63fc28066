//! Error types for gangway.

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the bridge lifecycle.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// `start` was called on a bridge that has already been started.
    ///
    /// The lifecycle is one-way: a bridge runs its engine at most once.
    #[error("engine already started (state: {state})")]
    AlreadyStarted {
        /// State the bridge was in when the second `start` arrived.
        state: crate::bridge::Lifecycle,
    },

    /// The dedicated engine thread panicked before `start` returned.
    #[error("engine thread panicked")]
    EnginePanicked,
}

/// Errors internal to the engine boundary.
///
/// These never cross `Bridge::start`: a failed script surfaces to the host
/// only as the engine terminating. They are returned by the lower-level
/// [`Engine`](crate::engine::Engine) and [`EngineHost`](crate::host::EngineHost)
/// APIs for callers that drive an engine directly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Script compilation or evaluation failed.
    #[error("script error: {0}")]
    Script(String),

    /// IO error while loading the main script.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors resolving a script project before launch.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// The project directory does not exist.
    #[error("no such project directory: {0}")]
    NoSuchProject(PathBuf),

    /// The resolved main script file does not exist.
    #[error("main script not found: {0}")]
    MissingScript(PathBuf),

    /// The project manifest could not be parsed.
    #[error("manifest error: {0}")]
    Manifest(#[from] toml::de::Error),

    /// IO error reading the manifest or provisioning the data directory.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
