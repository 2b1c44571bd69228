//! Per-key script files.
//!
//! Each script identifier owns exactly one `<identifier>.lua` file inside the
//! scripts directory. The store only ever creates files; once a script exists
//! it belongs to the user.

use crate::error::{KeyScriptError, Result};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const SCRIPT_EXTENSION: &str = "lua";

/// A script file returned by [`ScriptStore::ensure_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptFile {
    pub path: PathBuf,
    /// `true` when this call wrote the default template.
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct ScriptStore {
    dir: PathBuf,
}

impl ScriptStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the scripts directory and its parents.
    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir).map_err(|e| KeyScriptError::script_store(&self.dir, e))
    }

    pub fn script_path(&self, identifier: &str) -> PathBuf {
        self.dir.join(format!("{identifier}.{SCRIPT_EXTENSION}"))
    }

    /// Returns the script for `identifier`, writing the default template first
    /// if the file does not exist yet. Existing files are never touched.
    pub fn ensure_script(&self, identifier: &str) -> Result<ScriptFile> {
        let path = self.script_path(identifier);

        let file = OpenOptions::new().write(true).create_new(true).open(&path);
        let mut file = match file {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                debug!(path = %path.display(), "script already exists");
                return Ok(ScriptFile {
                    path,
                    created: false,
                });
            }
            Err(e) => return Err(KeyScriptError::script_store(&path, e)),
        };

        file.write_all(default_template(identifier).as_bytes())
            .map_err(|e| KeyScriptError::script_store(&path, e))?;

        info!(path = %path.display(), "created default script");
        Ok(ScriptFile {
            path,
            created: true,
        })
    }
}

fn default_template(key: &str) -> String {
    format!(
        r#"-- Macro script for key: {key}
-- This script runs every time '{key}' is pressed on the captured keyboard.

print("Key {key} was pressed!")

-- Insert your macro code here. Examples:

-- Run a shell command and use its output (bounded by the configured timeout):
-- local output = run_command("echo Hello from {key}")
-- print("Command output: " .. output)

-- Launch a program without waiting for it:
-- run_command_async("firefox https://example.org")

-- Read the clipboard:
-- local clipboard = get_clipboard()
-- print("Clipboard content: " .. clipboard)

-- Replace the clipboard:
-- set_clipboard("Hello from Lua!")

-- Type text at the cursor (pastes through the clipboard, then restores it):
-- insert_text("This text will be inserted at the cursor.")

-- Hold the edit modifier while pressing this key to open this file again.
"#
    )
}
