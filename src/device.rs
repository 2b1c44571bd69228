//! Keyboard devices and the key event stream.
//!
//! [`EvdevSource`] reads `/dev/input/event*` nodes. The capture loop only sees
//! the [`EventSource`] trait, so tests can replay scripted events through
//! [`crate::mock::MockEventSource`] instead.

use crate::error::{KeyScriptError, Result};
use evdev::{Device, InputEvent, InputEventKind, Key};
use std::fmt;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

/// A keyboard found by [`find_keyboards`]. Identity is the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    pub path: PathBuf,
    pub name: String,
}

impl fmt::Display for InputDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransition {
    Down,
    Up,
}

/// One key transition, identified by its raw code (`KEY_A`, `KEY_SPACE`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: String,
    pub transition: KeyTransition,
}

impl KeyEvent {
    pub fn down(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            transition: KeyTransition::Down,
        }
    }

    pub fn up(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            transition: KeyTransition::Up,
        }
    }
}

/// A stream of key events from one device.
pub trait EventSource {
    /// Requests exclusive ownership of the device.
    fn grab(&mut self) -> io::Result<()>;

    /// Gives up exclusive ownership.
    fn release(&mut self) -> io::Result<()>;

    /// Waits up to `timeout` and returns the key events read, possibly none.
    ///
    /// An error means the device is gone.
    fn poll_events(&mut self, timeout: Duration) -> io::Result<Vec<KeyEvent>>;
}

/// Event source backed by an evdev device node.
pub struct EvdevSource {
    path: PathBuf,
    device: Device,
    grabbed: bool,
}

impl EvdevSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let device = Device::open(path).map_err(|e| KeyScriptError::device_open(path, e))?;
        set_nonblocking(device.as_raw_fd()).map_err(|e| KeyScriptError::device_open(path, e))?;

        debug!(path = %path.display(), name = device.name().unwrap_or("?"), "opened input device");
        Ok(Self {
            path: path.to_path_buf(),
            device,
            grabbed: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.device.name().unwrap_or("Unknown device")
    }
}

impl EventSource for EvdevSource {
    fn grab(&mut self) -> io::Result<()> {
        self.device.grab()?;
        self.grabbed = true;
        Ok(())
    }

    fn release(&mut self) -> io::Result<()> {
        if !self.grabbed {
            return Ok(());
        }
        self.grabbed = false;
        self.device.ungrab()
    }

    fn poll_events(&mut self, timeout: Duration) -> io::Result<Vec<KeyEvent>> {
        if !wait_readable(self.device.as_raw_fd(), timeout)? {
            return Ok(Vec::new());
        }

        match self.device.fetch_events() {
            Ok(events) => Ok(events.filter_map(decode).collect()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        if self.grabbed {
            if let Err(e) = self.device.ungrab() {
                warn!(path = %self.path.display(), error = %e, "failed to ungrab device on close");
            }
        }
    }
}

/// Key press and release events; auto-repeat (value 2) is dropped.
fn decode(event: InputEvent) -> Option<KeyEvent> {
    match event.kind() {
        InputEventKind::Key(key) => {
            let transition = match event.value() {
                0 => KeyTransition::Up,
                1 => KeyTransition::Down,
                _ => return None,
            };
            Some(KeyEvent {
                code: key_code_name(key),
                transition,
            })
        }
        _ => None,
    }
}

/// Symbolic name of `key`, `KEY_<number>` for codes evdev has no name for.
fn key_code_name(key: Key) -> String {
    let name = format!("{key:?}");
    if name.starts_with("KEY_") || name.starts_with("BTN_") {
        name
    } else {
        format!("KEY_{}", key.code())
    }
}

fn wait_readable(fd: RawFd, timeout: Duration) -> io::Result<bool> {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

    let rc = unsafe { libc::poll(&mut pollfd, 1, millis) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    if rc == 0 {
        return Ok(false);
    }
    if pollfd.revents & libc::POLLNVAL != 0 {
        return Err(io::Error::new(
            io::ErrorKind::BrokenPipe,
            "device handle is no longer valid",
        ));
    }
    // POLLERR/POLLHUP fall through: the read reports the actual error.
    Ok(true)
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // Preserve existing flags; just OR in O_NONBLOCK.
    let current = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if current < 0 {
        return Err(io::Error::last_os_error());
    }

    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, current | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn looks_like_keyboard(device: &Device) -> bool {
    device
        .supported_keys()
        .map_or(false, |keys| keys.contains(Key::KEY_A) && keys.contains(Key::KEY_SPACE))
}

/// Lists readable devices that have alphabetic and space keys.
pub fn find_keyboards() -> Vec<InputDevice> {
    let mut keyboards: Vec<InputDevice> = evdev::enumerate()
        .filter(|(_, device)| looks_like_keyboard(device))
        .map(|(path, device)| InputDevice {
            name: device.name().unwrap_or("Unknown device").to_string(),
            path,
        })
        .collect();

    keyboards.sort_by(|a, b| a.path.cmp(&b.path));
    debug!(count = keyboards.len(), "keyboard scan finished");
    keyboards
}

/// Whether `path` can still be opened as a key-capable device.
pub fn is_available(path: &Path) -> bool {
    match Device::open(path) {
        Ok(device) => device.supported_keys().is_some(),
        Err(_) => false,
    }
}
