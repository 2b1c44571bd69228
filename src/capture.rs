//! The device capture loop.
//!
//! One loop owns one device for one session. It runs on a dedicated thread,
//! polls the device with a bounded timeout so that a stop request is noticed
//! within one poll interval, and dispatches every key press synchronously:
//!
//! ```text
//! key down ─▶ keymap::resolve ─▶ ScriptStore::ensure_script ─┬─▶ ScriptRunner::run ─▶ Dispatch
//!                                                            └─▶ EditRequested (edit modifier held)
//! ```
//!
//! Script execution is not bounded by the poll interval. A script that never
//! returns keeps the loop from seeing further keys or the stop request.

use crate::bridge::HostBridge;
use crate::clipboard;
use crate::config::Config;
use crate::device::{EvdevSource, EventSource, KeyEvent, KeyTransition};
use crate::engine::{LuaRuntime, ScriptEngine, ScriptRunner};
use crate::error::{KeyScriptError, Result};
use crate::keymap;
use crate::store::ScriptStore;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Grabbing,
    Running,
    Stopped,
    /// The device failed a read. Terminal; the caller decides whether to restart.
    Disconnected,
}

/// Outcome of one key press that ran its script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchEvent {
    pub key_code: String,
    pub identifier: String,
    pub success: bool,
    pub output: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

/// Everything a capture session reports, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureEvent {
    Dispatch(DispatchEvent),
    /// A key was pressed while the edit modifier was held; its script should
    /// be opened instead of run.
    EditRequested {
        key_code: String,
        identifier: String,
        path: PathBuf,
    },
    Notice(Notice),
    Disconnected,
}

/// Keys currently held down on the captured device.
#[derive(Debug, Default, Clone)]
pub struct HeldKeys {
    keys: HashSet<String>,
}

impl HeldKeys {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` if the key was already held.
    pub fn press(&mut self, code: &str) -> bool {
        self.keys.insert(code.to_string())
    }

    /// Returns `false` if the key was not held.
    pub fn release(&mut self, code: &str) -> bool {
        self.keys.remove(code)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.keys.contains(code)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// `true` when `code` is held and nothing else is.
    pub fn is_only(&self, code: &str) -> bool {
        self.keys.len() == 1 && self.keys.contains(code)
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }
}

/// Cooperative stop flag shared between the capture thread and its owner.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    flag: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

struct Notifier {
    events: Sender<CaptureEvent>,
}

impl Notifier {
    fn emit(&self, event: CaptureEvent) {
        if self.events.send(event).is_err() {
            debug!("capture event receiver dropped");
        }
    }

    fn notice(&self, level: NoticeLevel, message: impl Into<String>) {
        let message = message.into();
        match level {
            NoticeLevel::Info => info!("{message}"),
            NoticeLevel::Warning => warn!("{message}"),
            NoticeLevel::Error => error!("{message}"),
        }
        self.emit(CaptureEvent::Notice(Notice { level, message }));
    }
}

/// Exclusive access to the source for the lifetime of the guard.
///
/// A denied grab leaves the source shared; the guard then has nothing to
/// release. Otherwise the grab is released when the guard drops, whichever
/// way the loop ends.
struct ExclusiveGrab<'a, S: EventSource> {
    source: &'a mut S,
    exclusive: bool,
}

impl<'a, S: EventSource> ExclusiveGrab<'a, S> {
    fn acquire(source: &'a mut S, notifier: &Notifier) -> Self {
        let exclusive = match source.grab() {
            Ok(()) => {
                notifier.notice(NoticeLevel::Info, "Keyboard successfully grabbed");
                true
            }
            Err(e) => {
                debug!(error = %e, "exclusive grab denied");
                notifier.notice(
                    NoticeLevel::Warning,
                    "Could not grab keyboard - other programs may still receive events",
                );
                false
            }
        };
        Self { source, exclusive }
    }

    fn source(&mut self) -> &mut S {
        self.source
    }
}

impl<S: EventSource> Drop for ExclusiveGrab<'_, S> {
    fn drop(&mut self) {
        if !self.exclusive {
            return;
        }
        match self.source.release() {
            Ok(()) => debug!("released exclusive grab"),
            Err(e) => warn!(error = %e, "failed to release exclusive grab"),
        }
    }
}

struct Dispatcher<R> {
    store: ScriptStore,
    runner: R,
    held: HeldKeys,
    edit_modifier: String,
    notifier: Notifier,
}

impl<R: ScriptRunner> Dispatcher<R> {
    fn handle(&mut self, event: KeyEvent) {
        match event.transition {
            KeyTransition::Up => {
                self.held.release(&event.code);
            }
            KeyTransition::Down => {
                self.held.press(&event.code);
                self.dispatch(&event.code);
            }
        }
    }

    fn dispatch(&mut self, code: &str) {
        let is_modifier = code == self.edit_modifier;
        if is_modifier && self.held.is_only(code) {
            debug!(code, "edit modifier pressed alone");
            return;
        }
        let edit = !is_modifier && self.held.contains(&self.edit_modifier);

        let identifier = keymap::resolve(code);
        let script = match self.store.ensure_script(&identifier) {
            Ok(script) => script,
            Err(e) => {
                self.notifier
                    .notice(NoticeLevel::Error, format!("Cannot prepare script for {code}: {e}"));
                return;
            }
        };
        if script.created {
            self.notifier.notice(
                NoticeLevel::Info,
                format!("Created new script: {}", display_name(&script.path)),
            );
        }

        if edit {
            info!(code, identifier = %identifier, "edit requested");
            self.notifier.emit(CaptureEvent::EditRequested {
                key_code: code.to_string(),
                identifier,
                path: script.path,
            });
            return;
        }

        let result = self.runner.run(&identifier, &script.path);
        self.notifier.emit(CaptureEvent::Dispatch(DispatchEvent {
            key_code: code.to_string(),
            identifier,
            success: result.success,
            output: result.output,
        }));
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

pub struct CaptureLoop<S, R> {
    source: S,
    dispatcher: Dispatcher<R>,
    poll_interval: Duration,
    state: CaptureState,
}

impl<S: EventSource, R: ScriptRunner> CaptureLoop<S, R> {
    pub fn new(
        source: S,
        store: ScriptStore,
        runner: R,
        edit_modifier: impl Into<String>,
        events: Sender<CaptureEvent>,
    ) -> Self {
        Self {
            source,
            dispatcher: Dispatcher {
                store,
                runner,
                held: HeldKeys::new(),
                edit_modifier: edit_modifier.into(),
                notifier: Notifier { events },
            },
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: CaptureState::Idle,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn state(&self) -> CaptureState {
        self.state
    }

    pub fn held_keys(&self) -> &HeldKeys {
        &self.dispatcher.held
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn runner(&self) -> &R {
        &self.dispatcher.runner
    }

    /// Runs until `stop` is requested or the device fails, and returns the
    /// terminal state (`Stopped` or `Disconnected`).
    pub fn run(&mut self, stop: &StopSignal) -> CaptureState {
        self.state = CaptureState::Grabbing;
        let mut grab = ExclusiveGrab::acquire(&mut self.source, &self.dispatcher.notifier);

        self.state = CaptureState::Running;
        let end = loop {
            if stop.is_requested() {
                break CaptureState::Stopped;
            }
            match grab.source().poll_events(self.poll_interval) {
                Ok(events) => {
                    for event in events {
                        self.dispatcher.handle(event);
                    }
                }
                Err(e) => {
                    error!(error = %e, "device read failed");
                    break CaptureState::Disconnected;
                }
            }
        };
        drop(grab);

        self.dispatcher.held.clear();
        if end == CaptureState::Disconnected {
            self.dispatcher.notifier.emit(CaptureEvent::Disconnected);
        }
        info!(state = ?end, "capture loop finished");
        self.state = end;
        end
    }
}

/// A capture session running on its own thread.
pub struct CaptureHandle {
    device: PathBuf,
    stop: StopSignal,
    thread: Option<JoinHandle<Result<CaptureState>>>,
}

impl CaptureHandle {
    pub fn device(&self) -> &Path {
        &self.device
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Requests stop and waits for the session to end. Waits for an
    /// in-flight script to finish first.
    pub fn stop(mut self) -> Result<CaptureState> {
        self.stop.request();
        self.wait()
    }

    /// Waits for the session to end on its own (disconnect or external stop).
    pub fn join(mut self) -> Result<CaptureState> {
        self.wait()
    }

    fn wait(&mut self) -> Result<CaptureState> {
        match self.thread.take() {
            Some(thread) => thread
                .join()
                .map_err(|_| KeyScriptError::capture_thread("capture thread panicked"))?,
            None => Ok(CaptureState::Stopped),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.request();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Starts capturing `device_path` on a new thread.
///
/// The device is opened on that thread; an open failure shows up as an error
/// notice followed by the channel closing, and as the error returned from
/// [`CaptureHandle::stop`] or [`CaptureHandle::join`].
pub fn start_capture(
    device_path: impl Into<PathBuf>,
    config: &Config,
) -> Result<(CaptureHandle, Receiver<CaptureEvent>)> {
    start_capture_with(device_path, config, |path: &Path| EvdevSource::open(path))
}

/// Like [`start_capture`], with the event source opened by `open` on the
/// capture thread.
pub fn start_capture_with<S, F>(
    device_path: impl Into<PathBuf>,
    config: &Config,
    open: F,
) -> Result<(CaptureHandle, Receiver<CaptureEvent>)>
where
    S: EventSource,
    F: FnOnce(&Path) -> Result<S> + Send + 'static,
{
    let device = device_path.into();
    let stop = StopSignal::new();
    let (events, receiver) = mpsc::channel();

    let thread_device = device.clone();
    let thread_config = config.clone();
    let thread_stop = stop.clone();
    let thread = thread::Builder::new()
        .name("key-capture".to_string())
        .spawn(move || {
            run_session(&thread_device, &thread_config, open, events, &thread_stop)
        })
        .map_err(|e| KeyScriptError::capture_thread(e.to_string()))?;

    info!(device = %device.display(), "capture started");
    Ok((
        CaptureHandle {
            device,
            stop,
            thread: Some(thread),
        },
        receiver,
    ))
}

fn run_session<S, F>(
    device: &Path,
    config: &Config,
    open: F,
    events: Sender<CaptureEvent>,
    stop: &StopSignal,
) -> Result<CaptureState>
where
    S: EventSource,
    F: FnOnce(&Path) -> Result<S>,
{
    let notifier = Notifier {
        events: events.clone(),
    };

    let source = match open(device) {
        Ok(source) => source,
        Err(e) => {
            notifier.notice(NoticeLevel::Error, format!("Error in keyboard monitoring: {e}"));
            return Err(e);
        }
    };
    notifier.notice(NoticeLevel::Info, format!("Monitoring {}", device.display()));

    let store = ScriptStore::new(&config.scripts_dir);
    if let Err(e) = store.ensure_dir() {
        notifier.notice(NoticeLevel::Error, format!("Scripts directory unusable: {e}"));
    }

    let runtime = LuaRuntime::probe();
    if runtime.is_available() {
        if let Err(e) = runtime.add_module_dir(store.dir()) {
            warn!(error = %e, "could not extend package.path");
        }
    } else {
        notifier.notice(
            NoticeLevel::Warning,
            "Lua runtime unavailable - key presses will be reported but not executed",
        );
    }

    let bridge = HostBridge::from_config(config, clipboard::system_or_unavailable())?;
    let engine = ScriptEngine::new(&runtime, bridge);

    let mut capture = CaptureLoop::new(source, store, engine, config.edit_modifier.clone(), events);
    Ok(capture.run(stop))
}
