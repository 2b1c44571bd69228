//! Raw key code to script identifier mapping.
//!
//! Identifiers double as file stems in the scripts directory, so every value
//! returned by [`resolve`] is built from ASCII alphanumerics and `_` only.

const KEY_PREFIX: &str = "KEY_";

/// Maps a raw key code such as `KEY_A` or `KEY_SPACE` to a script identifier.
///
/// Named keys get a short mnemonic, `KEY_` plus an alphanumeric suffix maps to
/// the lowercased suffix, and anything else is lowercased with `key_` removed.
///
/// ```
/// use keyscript::keymap::resolve;
///
/// assert_eq!(resolve("KEY_SPACE"), "space");
/// assert_eq!(resolve("KEY_A"), "a");
/// assert_eq!(resolve("BTN_LEFT"), "btn_left");
/// ```
pub fn resolve(code: &str) -> String {
    if let Some(name) = special_key(code) {
        return name.to_string();
    }

    if let Some(suffix) = code.strip_prefix(KEY_PREFIX) {
        if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return suffix.to_ascii_lowercase();
        }
    }

    fallback(code)
}

fn special_key(code: &str) -> Option<&'static str> {
    let name = match code {
        "KEY_SPACE" => "space",
        "KEY_ENTER" => "enter",
        "KEY_TAB" => "tab",
        "KEY_BACKSPACE" => "backspace",
        "KEY_DELETE" => "delete",
        "KEY_ESC" => "escape",

        // Modifiers
        "KEY_LEFTSHIFT" => "lshift",
        "KEY_RIGHTSHIFT" => "rshift",
        "KEY_LEFTCTRL" => "lctrl",
        "KEY_RIGHTCTRL" => "rctrl",
        "KEY_LEFTALT" => "lalt",
        "KEY_RIGHTALT" => "ralt",

        // Arrow keys
        "KEY_UP" => "up",
        "KEY_DOWN" => "down",
        "KEY_LEFT" => "left",
        "KEY_RIGHT" => "right",

        // Function keys
        "KEY_F1" => "f1",
        "KEY_F2" => "f2",
        "KEY_F3" => "f3",
        "KEY_F4" => "f4",
        "KEY_F5" => "f5",
        "KEY_F6" => "f6",
        "KEY_F7" => "f7",
        "KEY_F8" => "f8",
        "KEY_F9" => "f9",
        "KEY_F10" => "f10",
        "KEY_F11" => "f11",
        "KEY_F12" => "f12",

        _ => return None,
    };
    Some(name)
}

fn fallback(code: &str) -> String {
    let cleaned: String = code
        .to_lowercase()
        .replace("key_", "")
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .collect();

    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_special_keys() {
        assert_eq!(resolve("KEY_SPACE"), "space");
        assert_eq!(resolve("KEY_ENTER"), "enter");
        assert_eq!(resolve("KEY_ESC"), "escape");
        assert_eq!(resolve("KEY_LEFTCTRL"), "lctrl");
        assert_eq!(resolve("KEY_RIGHTALT"), "ralt");
        assert_eq!(resolve("KEY_UP"), "up");
    }

    #[test]
    fn test_function_keys() {
        for n in 1..=12 {
            assert_eq!(resolve(&format!("KEY_F{n}")), format!("f{n}"));
        }
    }

    #[test]
    fn test_alphanumeric_suffix() {
        assert_eq!(resolve("KEY_A"), "a");
        assert_eq!(resolve("KEY_Z"), "z");
        assert_eq!(resolve("KEY_1"), "1");
        assert_eq!(resolve("KEY_KP7"), "kp7");
        assert_eq!(resolve("KEY_F13"), "f13");
    }

    #[test]
    fn test_fallback() {
        assert_eq!(resolve("KEY_KP_ENTER"), "kp_enter");
        assert_eq!(resolve("BTN_LEFT"), "btn_left");
        assert_eq!(resolve("KEY_"), "unknown");
        assert_eq!(resolve(""), "unknown");
        assert_eq!(resolve("unknown key: 700"), "unknownkey700");
    }

    #[test]
    fn test_resolve_is_filesystem_safe() {
        for code in ["KEY_A", "KEY_SPACE", "BTN_TOOL_PEN", "weird/../code", "KEY_ü"] {
            let id = resolve(code);
            assert!(!id.is_empty());
            assert!(id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_'), "{id}");
        }
    }

    #[test]
    fn test_resolve_is_deterministic() {
        for code in ["KEY_A", "KEY_F5", "BTN_SIDE", ""] {
            assert_eq!(resolve(code), resolve(code));
        }
    }
}
