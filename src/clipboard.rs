//! Clipboard access for the host bridge.

use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ClipboardError {
    message: String,
}

impl ClipboardError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<arboard::Error> for ClipboardError {
    fn from(err: arboard::Error) -> Self {
        ClipboardError::new(err.to_string())
    }
}

/// Text clipboard used by `get_clipboard`, `set_clipboard` and `insert_text`.
///
/// An empty clipboard reads as an empty string, not as an error.
pub trait Clipboard {
    fn get_text(&mut self) -> Result<String, ClipboardError>;
    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError>;
}

/// The desktop clipboard.
///
/// On X11 the contents are served by this process, so the value must stay
/// alive for as long as scripts may set the clipboard.
pub struct SystemClipboard {
    inner: arboard::Clipboard,
}

impl SystemClipboard {
    pub fn new() -> Result<Self, ClipboardError> {
        Ok(Self {
            inner: arboard::Clipboard::new()?,
        })
    }
}

impl Clipboard for SystemClipboard {
    fn get_text(&mut self) -> Result<String, ClipboardError> {
        match self.inner.get_text() {
            Ok(text) => Ok(text),
            Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.inner.set_text(text.to_string())?;
        Ok(())
    }
}

/// In-process clipboard, used headless and in tests.
#[derive(Debug, Default, Clone)]
pub struct MemoryClipboard {
    contents: String,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            contents: text.into(),
        }
    }
}

impl Clipboard for MemoryClipboard {
    fn get_text(&mut self) -> Result<String, ClipboardError> {
        Ok(self.contents.clone())
    }

    fn set_text(&mut self, text: &str) -> Result<(), ClipboardError> {
        self.contents = text.to_string();
        Ok(())
    }
}

/// Stand-in when no clipboard could be opened; every call reports why.
#[derive(Debug, Clone)]
pub struct UnavailableClipboard {
    reason: String,
}

impl UnavailableClipboard {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

impl Clipboard for UnavailableClipboard {
    fn get_text(&mut self) -> Result<String, ClipboardError> {
        Err(ClipboardError::new(format!("clipboard unavailable: {}", self.reason)))
    }

    fn set_text(&mut self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::new(format!("clipboard unavailable: {}", self.reason)))
    }
}

/// Opens the desktop clipboard, falling back to [`UnavailableClipboard`].
pub fn system_or_unavailable() -> Box<dyn Clipboard> {
    match SystemClipboard::new() {
        Ok(clipboard) => Box::new(clipboard),
        Err(e) => {
            tracing::warn!(error = %e, "system clipboard unavailable");
            Box::new(UnavailableClipboard::new(e.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_clipboard_round_trip() {
        let mut clipboard = MemoryClipboard::new();
        assert_eq!(clipboard.get_text().unwrap(), "");
        clipboard.set_text("hello").unwrap();
        assert_eq!(clipboard.get_text().unwrap(), "hello");
    }

    #[test]
    fn test_unavailable_clipboard_reports_reason() {
        let mut clipboard = UnavailableClipboard::new("no display");
        let err = clipboard.get_text().unwrap_err();
        assert_eq!(err.to_string(), "clipboard unavailable: no display");
        assert!(clipboard.set_text("x").is_err());
    }

    #[test]
    fn test_clipboard_error_display() {
        let err = ClipboardError::new("no selection owner");
        assert_eq!(err.to_string(), "no selection owner");
        let _: &dyn std::error::Error = &err;
    }
}
