//! Custom error types for keyscript.
//!
//! Only failures that end an operation are represented here. Failures inside
//! host capabilities (clipboard, shell, paste tool) are handed to scripts as
//! plain strings and never become a [`KeyScriptError`].

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Main error type for keyscript operations.
#[derive(Error, Debug)]
pub enum KeyScriptError {
    /// The input device could not be opened.
    #[error("failed to open input device '{path}': {source}")]
    DeviceOpen {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A script file could not be created or read.
    #[error("script store error for '{path}': {source}")]
    ScriptStore {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No embedded interpreter is available.
    #[error("scripting runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    /// A script faulted while loading or running.
    #[error("{0}")]
    Execution(#[from] mlua::Error),

    /// Configuration validation error.
    #[error("configuration error: {0}")]
    ConfigValidation(String),

    /// Error reading or parsing configuration file.
    #[error("failed to load config from '{path}': {reason}")]
    ConfigLoad { path: String, reason: String },

    /// Error writing configuration file.
    #[error("failed to save config to '{path}': {reason}")]
    ConfigSave { path: String, reason: String },

    /// Error parsing duration string.
    #[error("invalid duration '{value}': {reason}")]
    InvalidDuration { value: String, reason: String },

    /// The capture thread could not be spawned or panicked.
    #[error("capture thread error: {0}")]
    CaptureThread(String),

    /// The external editor could not be launched.
    #[error("failed to launch editor '{editor}': {source}")]
    Editor {
        editor: String,
        #[source]
        source: io::Error,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for keyscript operations.
pub type Result<T> = std::result::Result<T, KeyScriptError>;

impl KeyScriptError {
    /// Create a new DeviceOpen error.
    pub fn device_open(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::DeviceOpen {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a new ScriptStore error.
    pub fn script_store(path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::ScriptStore {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Create a new RuntimeUnavailable error.
    pub fn runtime_unavailable(message: impl Into<String>) -> Self {
        Self::RuntimeUnavailable(message.into())
    }

    /// Create a new ConfigValidation error.
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation(message.into())
    }

    /// Create a new ConfigLoad error.
    pub fn config_load(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new ConfigSave error.
    pub fn config_save(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigSave {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Create a new InvalidDuration error.
    pub fn invalid_duration(value: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidDuration {
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// Create a new CaptureThread error.
    pub fn capture_thread(message: impl Into<String>) -> Self {
        Self::CaptureThread(message.into())
    }

    /// Create a new Editor error.
    pub fn editor(editor: impl Into<String>, source: io::Error) -> Self {
        Self::Editor {
            editor: editor.into(),
            source,
        }
    }
}
