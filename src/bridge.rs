//! Host capabilities exposed to key scripts.
//!
//! Every capability reports failure as data: clipboard, shell and paste errors
//! come back to the script as strings or as lines in the execution output,
//! never as Lua errors.
//!
//! The capabilities are installed once as interpreter globals, so modules
//! loaded with `require` can call them too. Output is collected in an
//! [`OutputSink`] that belongs to a single execution and is made active for
//! the duration of that execution.

use crate::clipboard::Clipboard;
use crate::config::Config;
use mlua::{Function, Lua, Value, Variadic};
use std::cell::RefCell;
use std::io;
use std::process::{Command, Output, Stdio};
use std::rc::Rc;
use std::thread;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{debug, warn};

const PREVIEW_CHARS: usize = 50;

/// Time the target application gets to read the clipboard before it is restored.
const PASTE_SETTLE: Duration = Duration::from_millis(100);

/// Lines produced by one script execution.
#[derive(Debug, Clone, Default)]
pub struct OutputSink {
    lines: Rc<RefCell<Vec<String>>>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.borrow_mut().push(line.into());
    }

    /// Drains the sink, leaving it empty.
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lines.borrow_mut())
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines.borrow().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.borrow().is_empty()
    }
}

enum CommandOutcome {
    Finished(Output),
    TimedOut,
    Failed(io::Error),
}

/// Capability functions installed into the interpreter globals.
///
/// Clones share the clipboard, the command runtime and the active sink. The
/// bridge is `!Send` and lives on the capture thread next to the interpreter.
#[derive(Clone)]
pub struct HostBridge {
    clipboard: Rc<RefCell<Box<dyn Clipboard>>>,
    command_timeout: Duration,
    paste_command: Rc<[String]>,
    runtime: Rc<Runtime>,
    active: Rc<RefCell<Option<OutputSink>>>,
}

impl HostBridge {
    pub fn new(
        clipboard: Box<dyn Clipboard>,
        command_timeout: Duration,
        paste_command: Vec<String>,
    ) -> io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;

        Ok(Self {
            clipboard: Rc::new(RefCell::new(clipboard)),
            command_timeout,
            paste_command: paste_command.into(),
            runtime: Rc::new(runtime),
            active: Rc::new(RefCell::new(None)),
        })
    }

    pub fn from_config(config: &Config, clipboard: Box<dyn Clipboard>) -> io::Result<Self> {
        Self::new(
            clipboard,
            config.command_timeout,
            config.paste_command.clone(),
        )
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    pub fn get_clipboard(&self) -> String {
        match self.clipboard.borrow_mut().get_text() {
            Ok(text) => text,
            Err(e) => format!("Error getting clipboard content: {e}"),
        }
    }

    pub fn set_clipboard(&self, text: &str) -> String {
        match self.clipboard.borrow_mut().set_text(text) {
            Ok(()) => "Clipboard content set successfully.".to_string(),
            Err(e) => format!("Error setting clipboard content: {e}"),
        }
    }

    /// Runs `command` through `sh -c`, waiting at most the configured timeout.
    ///
    /// Returns trimmed stdout on success and an `"Error: ..."` string otherwise.
    /// A command that outlives the timeout is killed.
    pub fn run_command(&self, command: &str, sink: &OutputSink) -> String {
        match self.run_with_timeout(command) {
            CommandOutcome::Finished(output) if output.status.success() => {
                sink.push(format!("Command executed: '{command}'"));
                String::from_utf8_lossy(&output.stdout).trim().to_string()
            }
            CommandOutcome::Finished(output) => {
                let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
                sink.push(format!("Error executing command '{command}': {stderr}"));
                format!("Error: {stderr}")
            }
            CommandOutcome::TimedOut => {
                sink.push(format!(
                    "Command '{command}' timed out after {} seconds.",
                    self.command_timeout.as_secs()
                ));
                "Error: Command timed out".to_string()
            }
            CommandOutcome::Failed(e) => {
                sink.push(format!("Unexpected error running command '{command}': {e}"));
                format!("Error: {e}")
            }
        }
    }

    fn run_with_timeout(&self, command: &str) -> CommandOutcome {
        let timeout = self.command_timeout;
        self.runtime.block_on(async move {
            let spawned = tokio::process::Command::new("sh")
                .arg("-c")
                .arg(command)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn();

            let child = match spawned {
                Ok(child) => child,
                Err(e) => return CommandOutcome::Failed(e),
            };

            // Dropping the child on timeout kills it.
            match tokio::time::timeout(timeout, child.wait_with_output()).await {
                Ok(Ok(output)) => CommandOutcome::Finished(output),
                Ok(Err(e)) => CommandOutcome::Failed(e),
                Err(_) => CommandOutcome::TimedOut,
            }
        })
    }

    /// Starts `command` without waiting for it.
    pub fn run_command_async(&self, command: &str, sink: &OutputSink) {
        let spawned = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .spawn();

        match spawned {
            Ok(mut child) => {
                sink.push(format!("Async command launched: '{command}'"));
                // Reap in the background so finished commands do not linger as zombies.
                thread::spawn(move || {
                    let _ = child.wait();
                });
            }
            Err(e) => {
                sink.push(format!("Error launching async command '{command}': {e}"));
            }
        }
    }

    /// Pastes `text` at the cursor through the clipboard.
    ///
    /// The previous clipboard content is restored on every path out of this
    /// function, including a missing or failing paste tool.
    pub fn insert_text(&self, text: &str, sink: &OutputSink) {
        let original = match self.clipboard.borrow_mut().get_text() {
            Ok(original) => original,
            Err(e) => {
                debug!(error = %e, "clipboard unreadable before insert, restoring to empty");
                String::new()
            }
        };
        let _restore = RestoreClipboard {
            clipboard: &self.clipboard,
            original,
        };

        let set = self.clipboard.borrow_mut().set_text(text);
        if let Err(e) = set {
            sink.push(format!("Error setting clipboard content: {e}"));
            return;
        }

        let Some((tool, args)) = self.paste_command.split_first() else {
            sink.push("Error: no paste command configured. Cannot trigger paste.");
            return;
        };

        match Command::new(tool).args(args).status() {
            Ok(status) if status.success() => {
                thread::sleep(PASTE_SETTLE);
                let preview: String = text.chars().take(PREVIEW_CHARS).collect();
                sink.push(format!("Inserted text: '{preview}...'"));
            }
            Ok(status) => {
                sink.push(format!("Error triggering paste with {tool}: {status}"));
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                sink.push(format!("Error: {tool} not found. Cannot trigger paste."));
            }
            Err(e) => {
                sink.push(format!("Error triggering paste with {tool}: {e}"));
            }
        }
    }

    /// Registers `print` and the capability functions as interpreter globals.
    ///
    /// Globals are shared with every module a script `require`s. Output goes
    /// to whichever sink is active (see [`HostBridge::activate`]); with no
    /// active sink it is logged at debug level.
    pub fn install(&self, lua: &Lua) -> mlua::Result<()> {
        let globals = lua.globals();

        let bridge = self.clone();
        let print = lua.create_function(move |lua, args: Variadic<Value>| {
            let tostring: Function = lua.globals().get("tostring")?;
            let mut parts = Vec::with_capacity(args.len());
            for value in args.iter() {
                parts.push(tostring.call::<String>(value.clone())?);
            }
            bridge.with_active(|sink| sink.push(parts.join(" ")));
            Ok(())
        })?;
        globals.set("print", print)?;

        let bridge = self.clone();
        globals.set(
            "get_clipboard",
            lua.create_function(move |_, ()| Ok(bridge.get_clipboard()))?,
        )?;

        let bridge = self.clone();
        globals.set(
            "set_clipboard",
            lua.create_function(move |_, text: String| Ok(bridge.set_clipboard(&text)))?,
        )?;

        let bridge = self.clone();
        globals.set(
            "run_command",
            lua.create_function(move |_, command: String| {
                Ok(bridge.with_active(|sink| bridge.run_command(&command, sink)))
            })?,
        )?;

        let bridge = self.clone();
        globals.set(
            "run_command_async",
            lua.create_function(move |_, command: String| {
                bridge.with_active(|sink| bridge.run_command_async(&command, sink));
                Ok(())
            })?,
        )?;

        let bridge = self.clone();
        globals.set(
            "insert_text",
            lua.create_function(move |_, text: String| {
                bridge.with_active(|sink| bridge.insert_text(&text, sink));
                Ok(())
            })?,
        )?;

        debug!("host capabilities installed");
        Ok(())
    }

    /// Routes capability output to `sink` until the returned guard drops.
    pub fn activate(&self, sink: &OutputSink) -> ActiveOutput {
        *self.active.borrow_mut() = Some(sink.clone());
        ActiveOutput {
            slot: Rc::clone(&self.active),
        }
    }

    fn with_active<T>(&self, f: impl FnOnce(&OutputSink) -> T) -> T {
        // Cloned out so a capability may re-enter the bridge.
        let active = self.active.borrow().clone();
        match active {
            Some(sink) => f(&sink),
            None => {
                let sink = OutputSink::new();
                let value = f(&sink);
                for line in sink.take() {
                    debug!(%line, "output outside a script execution");
                }
                value
            }
        }
    }
}

/// Clears the active output sink on drop.
pub struct ActiveOutput {
    slot: Rc<RefCell<Option<OutputSink>>>,
}

impl Drop for ActiveOutput {
    fn drop(&mut self) {
        self.slot.borrow_mut().take();
    }
}

struct RestoreClipboard<'a> {
    clipboard: &'a RefCell<Box<dyn Clipboard>>,
    original: String,
}

impl Drop for RestoreClipboard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.clipboard.borrow_mut().set_text(&self.original) {
            warn!(error = %e, "failed to restore clipboard after insert");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::{MemoryClipboard, UnavailableClipboard};
    use std::time::Instant;

    fn bridge_with(clipboard: Box<dyn Clipboard>, paste: &[&str]) -> HostBridge {
        HostBridge::new(
            clipboard,
            Duration::from_secs(1),
            paste.iter().map(|s| s.to_string()).collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_output_sink_take_empties() {
        let sink = OutputSink::new();
        sink.push("one");
        sink.push("two");
        assert_eq!(sink.take(), vec!["one", "two"]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_clipboard_round_trip() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        assert_eq!(bridge.set_clipboard("abc"), "Clipboard content set successfully.");
        assert_eq!(bridge.get_clipboard(), "abc");
    }

    #[test]
    fn test_empty_clipboard_reads_as_empty_string() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        assert_eq!(bridge.get_clipboard(), "");
    }

    #[test]
    fn test_clipboard_failure_is_a_string() {
        let bridge = bridge_with(Box::new(UnavailableClipboard::new("no display")), &["true"]);
        assert!(bridge
            .get_clipboard()
            .starts_with("Error getting clipboard content:"));
        assert!(bridge
            .set_clipboard("x")
            .starts_with("Error setting clipboard content:"));
    }

    #[test]
    fn test_run_command_returns_trimmed_stdout() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        let sink = OutputSink::new();
        assert_eq!(bridge.run_command("echo hello", &sink), "hello");
        assert_eq!(sink.lines(), vec!["Command executed: 'echo hello'"]);
    }

    #[test]
    fn test_run_command_nonzero_exit() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        let sink = OutputSink::new();
        let result = bridge.run_command("echo broken >&2; exit 3", &sink);
        assert_eq!(result, "Error: broken");
        assert!(sink.lines()[0].starts_with("Error executing command"));
    }

    #[test]
    fn test_run_command_times_out() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        let sink = OutputSink::new();
        let started = Instant::now();
        let result = bridge.run_command("sleep 10", &sink);
        assert_eq!(result, "Error: Command timed out");
        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(
            sink.lines(),
            vec!["Command 'sleep 10' timed out after 1 seconds."]
        );
    }

    #[test]
    fn test_run_command_async_logs_launch() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        let sink = OutputSink::new();
        bridge.run_command_async("true", &sink);
        assert_eq!(sink.lines(), vec!["Async command launched: 'true'"]);
    }

    #[test]
    fn test_insert_text_restores_clipboard() {
        let bridge = bridge_with(Box::new(MemoryClipboard::with_text("before")), &["true"]);
        let sink = OutputSink::new();
        bridge.insert_text("typed", &sink);
        assert_eq!(bridge.get_clipboard(), "before");
        assert_eq!(sink.lines(), vec!["Inserted text: 'typed...'"]);
    }

    #[test]
    fn test_insert_text_restores_clipboard_when_tool_missing() {
        let bridge = bridge_with(
            Box::new(MemoryClipboard::with_text("before")),
            &["keyscript-no-such-paste-tool"],
        );
        let sink = OutputSink::new();
        bridge.insert_text("typed", &sink);
        assert_eq!(bridge.get_clipboard(), "before");
        assert_eq!(
            sink.lines(),
            vec!["Error: keyscript-no-such-paste-tool not found. Cannot trigger paste."]
        );
    }

    #[test]
    fn test_insert_text_restores_clipboard_when_tool_fails() {
        let bridge = bridge_with(Box::new(MemoryClipboard::with_text("before")), &["false"]);
        let sink = OutputSink::new();
        bridge.insert_text("typed", &sink);
        assert_eq!(bridge.get_clipboard(), "before");
        assert!(sink.lines()[0].starts_with("Error triggering paste with false"));
    }

    #[test]
    fn test_insert_text_preview_is_truncated() {
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        let sink = OutputSink::new();
        let long = "x".repeat(80);
        bridge.insert_text(&long, &sink);
        assert_eq!(sink.lines(), vec![format!("Inserted text: '{}...'", "x".repeat(50))]);
    }

    #[test]
    fn test_installed_print_writes_to_active_sink() {
        let lua = Lua::new();
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        bridge.install(&lua).unwrap();
        let sink = OutputSink::new();

        {
            let _active = bridge.activate(&sink);
            lua.load(r#"print("a", 1, true)"#).exec().unwrap();
        }
        lua.load(r#"print("after")"#).exec().unwrap();

        assert_eq!(sink.lines(), vec!["a 1 true"]);
    }

    #[test]
    fn test_installed_capabilities_are_globals() {
        let lua = Lua::new();
        let bridge = bridge_with(Box::new(MemoryClipboard::with_text("clip")), &["true"]);
        bridge.install(&lua).unwrap();
        let sink = OutputSink::new();
        let _active = bridge.activate(&sink);

        let (clip, out): (String, String) = lua
            .load("return get_clipboard(), run_command('echo hi')")
            .eval()
            .unwrap();

        assert_eq!(clip, "clip");
        assert_eq!(out, "hi");
        assert_eq!(sink.lines(), vec!["Command executed: 'echo hi'"]);
    }

    #[test]
    fn test_capability_without_active_sink() {
        let lua = Lua::new();
        let bridge = bridge_with(Box::new(MemoryClipboard::new()), &["true"]);
        bridge.install(&lua).unwrap();

        let out: String = lua.load("return run_command('echo quiet')").eval().unwrap();
        assert_eq!(out, "quiet");
    }
}
