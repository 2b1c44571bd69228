//! # keyscript
//!
//! Turns a dedicated keyboard into a bank of macro keys: every key press runs
//! a Lua script named after the key.
//!
//! ## Features
//!
//! - Exclusive capture of one evdev keyboard on a background thread
//! - One script per key, created from a template on first press
//! - Hold the edit modifier and press a key to open its script instead
//! - Host capabilities for scripts: clipboard, shell commands with timeout,
//!   fire-and-forget commands and pasting text into the focused window
//! - JSON configuration file support
//!
//! ## Example
//!
//! ```no_run
//! use keyscript::{find_keyboards, start_capture, CaptureEvent, Config};
//!
//! let config = Config::default();
//! let keyboard = find_keyboards().into_iter().next().expect("no keyboard");
//! let (handle, events) = start_capture(&keyboard.path, &config).unwrap();
//!
//! for event in events {
//!     if let CaptureEvent::Dispatch(dispatch) = event {
//!         println!("{}: {}", dispatch.identifier, dispatch.output);
//!     }
//! }
//! handle.join().unwrap();
//! ```
//!
//! ## Configuration
//!
//! ```json
//! {
//!   "scripts_dir": "/home/me/.config/keyscript/scripts",
//!   "command_timeout": "5s",
//!   "edit_modifier": "KEY_LEFTCTRL",
//!   "paste_command": ["xdotool", "key", "control+v"]
//! }
//! ```

pub mod bridge;
pub mod capture;
pub mod clipboard;
pub mod config;
pub mod device;
pub mod editor;
pub mod engine;
pub mod error;
pub mod keymap;
pub mod mock;
pub mod permissions;
pub mod store;

pub use bridge::{HostBridge, OutputSink};
pub use capture::{
    start_capture, start_capture_with, CaptureEvent, CaptureHandle, CaptureLoop, CaptureState,
    DispatchEvent, HeldKeys, Notice, NoticeLevel, StopSignal,
};
pub use config::Config;
pub use device::{find_keyboards, EvdevSource, EventSource, InputDevice, KeyEvent, KeyTransition};
pub use engine::{ExecutionResult, LuaRuntime, ScriptEngine, ScriptRunner};
pub use error::{KeyScriptError, Result};
pub use store::{ScriptFile, ScriptStore};
