//! Checks whether the current user may read input devices.
//!
//! Reading `/dev/input/event*` normally requires membership in the `input`
//! group. The check is advisory: capture is still attempted when it fails.

use sysinfo::{get_current_pid, ProcessRefreshKind, ProcessesToUpdate, System, UpdateKind, Users};
use tracing::debug;

pub const INPUT_GROUP: &str = "input";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputAccess {
    Granted,
    MissingGroup { user: String },
    /// The user or their groups could not be determined.
    Unknown(String),
}

/// Looks up the current user's groups.
pub fn check_input_group() -> InputAccess {
    let pid = match get_current_pid() {
        Ok(pid) => pid,
        Err(e) => return InputAccess::Unknown(e.to_string()),
    };

    let mut system = System::new();
    system.refresh_processes_specifics(
        ProcessesToUpdate::Some(&[pid]),
        true,
        ProcessRefreshKind::nothing().with_user(UpdateKind::Always),
    );
    let Some(uid) = system.process(pid).and_then(|p| p.user_id()) else {
        return InputAccess::Unknown("current user id not available".to_string());
    };

    let users = Users::new_with_refreshed_list();
    let Some(user) = users.get_user_by_id(uid) else {
        return InputAccess::Unknown("current user not found".to_string());
    };

    let groups: Vec<String> = user
        .groups()
        .iter()
        .map(|group| group.name().to_string())
        .collect();
    debug!(user = user.name(), ?groups, "checked input permissions");
    classify(user.name(), &groups)
}

/// Decides access from a user name and its group names.
pub fn classify(user: &str, groups: &[String]) -> InputAccess {
    if user == "root" || groups.iter().any(|g| g == INPUT_GROUP) {
        InputAccess::Granted
    } else {
        InputAccess::MissingGroup {
            user: user.to_string(),
        }
    }
}

/// The command that grants `user` access to input devices.
pub fn fix_hint(user: &str) -> String {
    format!("sudo usermod -a -G {INPUT_GROUP} {user}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn test_member_of_input_group() {
        assert_eq!(classify("alex", &groups(&["wheel", "input"])), InputAccess::Granted);
    }

    #[test]
    fn test_missing_input_group() {
        assert_eq!(
            classify("alex", &groups(&["wheel", "audio"])),
            InputAccess::MissingGroup {
                user: "alex".to_string()
            }
        );
    }

    #[test]
    fn test_root_is_always_granted() {
        assert_eq!(classify("root", &[]), InputAccess::Granted);
    }

    #[test]
    fn test_fix_hint() {
        assert_eq!(fix_hint("alex"), "sudo usermod -a -G input alex");
    }
}
