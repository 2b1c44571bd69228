//! Configuration loading, saving and validation.
//!
//! The configuration is a small JSON document read once at the start of each
//! capture session:
//!
//! ```json
//! {
//!   "scripts_dir": "/home/me/.config/keyscript/scripts",
//!   "command_timeout": "5s",
//!   "edit_modifier": "KEY_LEFTCTRL",
//!   "paste_command": ["xdotool", "key", "control+v"]
//! }
//! ```
//!
//! Every field is optional; missing fields fall back to their defaults.

use crate::error::{KeyScriptError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const APP_DIR: &str = "keyscript";
const CONFIG_FILE: &str = "config.json";

const MIN_COMMAND_TIMEOUT: Duration = Duration::from_secs(1);
const MAX_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory holding one `<identifier>.lua` per key.
    #[serde(default = "default_scripts_dir")]
    pub scripts_dir: PathBuf,

    /// Upper bound for `run_command` calls made by scripts.
    #[serde(default = "default_command_timeout", with = "duration_format")]
    pub command_timeout: Duration,

    /// Raw code of the key that, while held, turns a press into an edit request.
    #[serde(default = "default_edit_modifier")]
    pub edit_modifier: String,

    /// Program used to open scripts. Defaults to `xdg-open`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub editor: Option<String>,

    /// Command that synthesizes a paste keystroke for `insert_text`.
    #[serde(default = "default_paste_command")]
    pub paste_command: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_device: Option<PathBuf>,

    #[serde(default = "default_true")]
    pub auto_select_last: bool,

    #[serde(default)]
    pub verbose: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scripts_dir: default_scripts_dir(),
            command_timeout: default_command_timeout(),
            edit_modifier: default_edit_modifier(),
            editor: None,
            paste_command: default_paste_command(),
            last_device: None,
            auto_select_last: true,
            verbose: false,
        }
    }
}

fn app_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config"))
        .join(APP_DIR)
}

fn default_scripts_dir() -> PathBuf {
    app_dir().join("scripts")
}

fn default_command_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_edit_modifier() -> String {
    "KEY_LEFTCTRL".to_string()
}

fn default_paste_command() -> Vec<String> {
    vec![
        "xdotool".to_string(),
        "key".to_string(),
        "control+v".to_string(),
    ]
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Location of the configuration file under the user config directory.
    pub fn default_path() -> PathBuf {
        app_dir().join(CONFIG_FILE)
    }

    pub fn from_file(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).map_err(|e| KeyScriptError::config_load(path, e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| KeyScriptError::config_load(path, e.to_string()))
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::from_file(&path.to_string_lossy())
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_file(&self, path: &str) -> Result<()> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .map_err(|e| KeyScriptError::config_save(path, e.to_string()))?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).map_err(|e| KeyScriptError::config_save(path, e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.command_timeout < MIN_COMMAND_TIMEOUT || self.command_timeout > MAX_COMMAND_TIMEOUT
        {
            return Err(KeyScriptError::config_validation(format!(
                "command_timeout must be between {}s and {}s",
                MIN_COMMAND_TIMEOUT.as_secs(),
                MAX_COMMAND_TIMEOUT.as_secs()
            )));
        }

        if self.edit_modifier.trim().is_empty() {
            return Err(KeyScriptError::config_validation(
                "edit_modifier cannot be empty",
            ));
        }

        if !self.edit_modifier.starts_with("KEY_") {
            return Err(KeyScriptError::config_validation(format!(
                "edit_modifier '{}' is not a raw key code (expected e.g. KEY_LEFTCTRL)",
                self.edit_modifier
            )));
        }

        if self.paste_command.first().map_or(true, |tool| tool.trim().is_empty()) {
            return Err(KeyScriptError::config_validation(
                "paste_command must name a program",
            ));
        }

        if self.scripts_dir.as_os_str().is_empty() {
            return Err(KeyScriptError::config_validation(
                "scripts_dir cannot be empty",
            ));
        }

        Ok(())
    }
}

/// Parses `"500ms"`, `"5s"`, `"2m"` or a bare number of milliseconds.
pub fn parse_duration(value: &str) -> Result<Duration> {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return Err(KeyScriptError::invalid_duration(value, "empty duration"));
    }

    let split_at = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split_at);

    if number.is_empty() {
        return Err(KeyScriptError::invalid_duration(value, "missing number"));
    }

    let amount: u64 = number
        .parse()
        .map_err(|_| KeyScriptError::invalid_duration(value, "number out of range"))?;

    match unit.trim() {
        "" | "ms" => Ok(Duration::from_millis(amount)),
        "s" => Ok(Duration::from_secs(amount)),
        "m" => amount
            .checked_mul(60)
            .map(Duration::from_secs)
            .ok_or_else(|| KeyScriptError::invalid_duration(value, "number out of range")),
        other => Err(KeyScriptError::invalid_duration(
            value,
            format!("unknown unit '{other}'"),
        )),
    }
}

fn format_duration(duration: Duration) -> String {
    if duration.subsec_millis() == 0 && duration.as_secs() > 0 {
        format!("{}s", duration.as_secs())
    } else {
        format!("{}ms", duration.as_millis())
    }
}

mod duration_format {
    use super::{format_duration, parse_duration};
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_duration(*duration))
    }

    /// Accepts a duration string or a bare number of milliseconds.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(u64),
        Text(String),
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        match Raw::deserialize(deserializer)? {
            Raw::Millis(millis) => Ok(Duration::from_millis(millis)),
            Raw::Text(raw) => parse_duration(&raw).map_err(serde::de::Error::custom),
        }
    }
}
