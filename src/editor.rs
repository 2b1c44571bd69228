//! Opening scripts in an external editor.

use crate::error::{KeyScriptError, Result};
use std::path::Path;
use std::process::Command;
use std::thread;
use tracing::{debug, info, warn};

/// Used when no editor is configured: the desktop's default handler.
pub const DEFAULT_EDITOR: &str = "xdg-open";

/// Opens `path` with `editor`, or [`DEFAULT_EDITOR`] when none is given.
///
/// `editor` may carry arguments (`"code --wait"`); the path is appended last.
/// The editor runs detached and this returns as soon as it has started.
pub fn open_in_editor(path: &Path, editor: Option<&str>) -> Result<()> {
    let editor = editor
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .unwrap_or(DEFAULT_EDITOR);
    let mut parts = editor.split_whitespace();
    let program = parts.next().unwrap_or(DEFAULT_EDITOR);

    info!(editor, path = %path.display(), "opening script in editor");
    let mut child = Command::new(program)
        .args(parts)
        .arg(path)
        .spawn()
        .map_err(|e| KeyScriptError::editor(editor, e))?;

    // Reap the child so it does not linger as a zombie.
    let editor = editor.to_string();
    thread::spawn(move || match child.wait() {
        Ok(status) if status.success() => debug!(%editor, "editor exited"),
        Ok(status) => warn!(%editor, %status, "editor exited with failure"),
        Err(e) => warn!(%editor, error = %e, "failed to wait for editor"),
    });
    Ok(())
}
