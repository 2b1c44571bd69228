//! Lua script execution.
//!
//! A [`LuaRuntime`] is created once per capture session on the capture thread
//! and lent to a [`ScriptEngine`]. The engine turns every outcome, including
//! interpreter faults, into an [`ExecutionResult`].

use crate::bridge::{HostBridge, OutputSink};
use crate::error::{KeyScriptError, Result};
use mlua::{Lua, Table};
use std::cell::Cell;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Output reported for every key while no interpreter is available.
pub const RUNTIME_UNAVAILABLE: &str = "Lua not installed";

const SUCCESS_MARKER: &str = "Script executed successfully.";

/// Outcome of one script execution, handed straight to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
}

impl ExecutionResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
        }
    }

    pub fn failure(output: impl Into<String>) -> Self {
        Self {
            success: false,
            output: output.into(),
        }
    }
}

/// Runs the script for a key. Implemented by [`ScriptEngine`]; the capture
/// loop only depends on this trait.
pub trait ScriptRunner {
    fn run(&mut self, identifier: &str, script: &Path) -> ExecutionResult;
}

/// The embedded interpreter, if one could be started.
///
/// `Lua` is `!Send`, so a runtime stays on the thread that probed it.
pub struct LuaRuntime {
    lua: Option<Lua>,
}

impl LuaRuntime {
    /// Starts an interpreter and checks that it evaluates code.
    pub fn probe() -> Self {
        let lua = Lua::new();
        match lua.load("return _VERSION").eval::<String>() {
            Ok(version) => {
                info!(%version, "Lua runtime ready");
                Self { lua: Some(lua) }
            }
            Err(e) => {
                warn!(error = %e, "Lua runtime failed its probe");
                Self { lua: None }
            }
        }
    }

    /// A runtime that reports every execution as not installed.
    pub fn unavailable() -> Self {
        Self { lua: None }
    }

    pub fn is_available(&self) -> bool {
        self.lua.is_some()
    }

    pub fn lua(&self) -> Option<&Lua> {
        self.lua.as_ref()
    }

    /// Lets scripts `require` modules stored in `dir`.
    pub fn add_module_dir(&self, dir: &Path) -> Result<()> {
        let Some(lua) = &self.lua else {
            return Err(KeyScriptError::runtime_unavailable(RUNTIME_UNAVAILABLE));
        };
        let package: Table = lua.globals().get("package")?;
        let current: String = package.get("path")?;
        package.set("path", format!("{current};{}/?.lua", dir.display()))?;
        debug!(dir = %dir.display(), "added script module directory");
        Ok(())
    }
}

/// Runs key scripts on a borrowed runtime.
///
/// The bridge capabilities are installed into the runtime globals before the
/// first execution. One runtime serves one engine.
pub struct ScriptEngine<'rt> {
    runtime: &'rt LuaRuntime,
    bridge: HostBridge,
    installed: Cell<bool>,
}

impl<'rt> ScriptEngine<'rt> {
    pub fn new(runtime: &'rt LuaRuntime, bridge: HostBridge) -> Self {
        Self {
            runtime,
            bridge,
            installed: Cell::new(false),
        }
    }

    pub fn bridge(&self) -> &HostBridge {
        &self.bridge
    }

    /// Loads and runs `script`, returning what it printed.
    ///
    /// Never panics or returns an error: read failures, syntax errors and
    /// runtime errors all come back as a failed [`ExecutionResult`].
    pub fn execute(&self, identifier: &str, script: &Path) -> ExecutionResult {
        let Some(lua) = self.runtime.lua() else {
            debug!(identifier, "runtime unavailable, skipping script");
            return ExecutionResult::failure(RUNTIME_UNAVAILABLE);
        };

        let sink = OutputSink::new();
        let outcome = {
            let _active = self.bridge.activate(&sink);
            self.run_in(lua, script)
        };
        let lines = sink.take();

        match outcome {
            Ok(()) => {
                info!(identifier, lines = lines.len(), "script executed");
                ExecutionResult::success(format!(
                    "{SUCCESS_MARKER}\nOutput:\n{}",
                    lines.join("\n")
                ))
            }
            Err(e) => {
                warn!(identifier, error = %e, "script failed");
                ExecutionResult::failure(format!("Error executing script: {e}"))
            }
        }
    }

    fn run_in(&self, lua: &Lua, script: &Path) -> Result<()> {
        if !self.installed.get() {
            self.bridge.install(lua)?;
            self.installed.set(true);
        }
        let source =
            fs::read_to_string(script).map_err(|e| KeyScriptError::script_store(script, e))?;
        let env = run_environment(lua)?;
        lua.load(source.as_str())
            .set_name(format!("@{}", script.display()))
            .set_environment(env)
            .exec()?;
        Ok(())
    }
}

/// A fresh global table for one run. Reads fall back to the interpreter
/// globals; assignments stay in this table.
fn run_environment(lua: &Lua) -> mlua::Result<Table> {
    let env = lua.create_table()?;
    let meta = lua.create_table()?;
    meta.set("__index", lua.globals())?;
    env.set_metatable(Some(meta));
    Ok(env)
}

impl ScriptRunner for ScriptEngine<'_> {
    fn run(&mut self, identifier: &str, script: &Path) -> ExecutionResult {
        self.execute(identifier, script)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;
    use std::time::Duration;

    fn bridge() -> HostBridge {
        HostBridge::new(
            Box::new(MemoryClipboard::with_text("clip")),
            Duration::from_secs(1),
            vec!["true".to_string()],
        )
        .unwrap()
    }

    fn write_script(dir: &Path, name: &str, body: &str) -> std::path::PathBuf {
        let path = dir.join(format!("{name}.lua"));
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn test_probe_finds_runtime() {
        assert!(LuaRuntime::probe().is_available());
        assert!(!LuaRuntime::unavailable().is_available());
    }

    #[test]
    fn test_successful_script_output() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "a", "print('hello', 42)\nprint(get_clipboard())");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert!(result.success);
        assert_eq!(
            result.output,
            "Script executed successfully.\nOutput:\nhello 42\nclip"
        );
    }

    #[test]
    fn test_output_is_isolated_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_script(dir.path(), "a", "print('first')");
        let second = write_script(dir.path(), "b", "print('second')");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        engine.execute("a", &first);
        let result = engine.execute("b", &second);
        assert_eq!(result.output, "Script executed successfully.\nOutput:\nsecond");
    }

    #[test]
    fn test_script_reassigning_print_does_not_leak() {
        let dir = tempfile::tempdir().unwrap();
        let hijack = write_script(dir.path(), "a", "print = function() end");
        let normal = write_script(dir.path(), "b", "print('still here')");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        assert!(engine.execute("a", &hijack).success);
        let result = engine.execute("b", &normal);
        assert!(result.output.ends_with("still here"));
    }

    #[test]
    fn test_syntax_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "a", "print('unterminated");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert!(!result.success);
        assert!(result.output.starts_with("Error executing script:"));
    }

    #[test]
    fn test_runtime_error_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "a", "error('boom')");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert!(!result.success);
        assert!(result.output.contains("boom"));

        // The interpreter is still usable afterwards.
        let ok = write_script(dir.path(), "b", "print('ok')");
        assert!(engine.execute("b", &ok).success);
    }

    #[test]
    fn test_missing_script_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &dir.path().join("a.lua"));
        assert!(!result.success);
        assert!(result.output.starts_with("Error executing script:"));
    }

    #[test]
    fn test_unavailable_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let script = write_script(dir.path(), "a", "print('never')");
        let runtime = LuaRuntime::unavailable();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert_eq!(result, ExecutionResult::failure("Lua not installed"));
    }

    #[test]
    fn test_script_globals_do_not_leak_between_runs() {
        let dir = tempfile::tempdir().unwrap();
        let first = write_script(dir.path(), "a", "counter = 1");
        let second = write_script(dir.path(), "b", "print(counter == nil)");
        let runtime = LuaRuntime::probe();
        let engine = ScriptEngine::new(&runtime, bridge());

        engine.execute("a", &first);
        let result = engine.execute("b", &second);
        assert!(result.output.ends_with("true"), "{}", result.output);
    }

    #[test]
    fn test_required_module_reaches_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        write_script(
            dir.path(),
            "helpers",
            "local M = {}\nfunction M.go()\n  print('from helper')\n  return run_command('echo x')\nend\nreturn M",
        );
        let script = write_script(dir.path(), "a", "print(require('helpers').go())");
        let runtime = LuaRuntime::probe();
        runtime.add_module_dir(dir.path()).unwrap();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert!(result.success, "{}", result.output);
        assert_eq!(
            result.output,
            "Script executed successfully.\nOutput:\nfrom helper\nCommand executed: 'echo x'\nx"
        );
    }

    #[test]
    fn test_require_from_module_dir() {
        let dir = tempfile::tempdir().unwrap();
        write_script(dir.path(), "helpers", "return { greet = function() return 'hi' end }");
        let script = write_script(dir.path(), "a", "print(require('helpers').greet())");
        let runtime = LuaRuntime::probe();
        runtime.add_module_dir(dir.path()).unwrap();
        let engine = ScriptEngine::new(&runtime, bridge());

        let result = engine.execute("a", &script);
        assert!(result.success, "{}", result.output);
        assert!(result.output.ends_with("hi"));
    }
}
