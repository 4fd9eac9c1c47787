//! Detection of the shell nl2sh was invoked from.

use tracing::{debug, warn};

use crate::config::ShellType;

/// Detects the calling shell from the parent process, then `$SHELL`, then the platform.
pub fn detect_shell() -> ShellType {
    let parent = parent_process_name();
    let shell_env = std::env::var("SHELL").ok();
    let shell = classify(parent.as_deref(), shell_env.as_deref(), cfg!(windows));
    debug!(?parent, ?shell_env, %shell, "detected shell");
    shell
}

/// Picks a shell from the probed names.
///
/// Names are matched by substring so `/usr/bin/zsh`, `-bash` and `pwsh.exe` all resolve.
pub fn classify(parent: Option<&str>, shell_env: Option<&str>, windows: bool) -> ShellType {
    for name in [parent, shell_env].into_iter().flatten() {
        if let Some(shell) = match_name(name) {
            return shell;
        }
    }
    if windows {
        ShellType::PowerShell
    } else {
        ShellType::Bash
    }
}

fn match_name(name: &str) -> Option<ShellType> {
    let name = name.to_lowercase();
    if name.contains("powershell") || name.contains("pwsh") {
        Some(ShellType::PowerShell)
    } else if name.contains("zsh") {
        Some(ShellType::Zsh)
    } else if name.contains("bash") {
        Some(ShellType::Bash)
    } else {
        None
    }
}

#[cfg(target_os = "linux")]
fn parent_process_name() -> Option<String> {
    let ppid = std::os::unix::process::parent_id();
    match std::fs::read_to_string(format!("/proc/{ppid}/comm")) {
        Ok(comm) => Some(comm.trim().to_string()),
        Err(err) => {
            warn!(ppid, error = %err, "cannot read parent process name");
            None
        }
    }
}

#[cfg(all(unix, not(target_os = "linux")))]
fn parent_process_name() -> Option<String> {
    let ppid = std::os::unix::process::parent_id();
    let output = std::process::Command::new("ps")
        .args(["-o", "comm=", "-p", &ppid.to_string()])
        .output();
    match output {
        Ok(output) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(output) => {
            warn!(ppid, status = %output.status, "ps failed to report parent process");
            None
        }
        Err(err) => {
            warn!(ppid, error = %err, "cannot run ps");
            None
        }
    }
}

#[cfg(not(unix))]
fn parent_process_name() -> Option<String> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_wins_over_env() {
        assert_eq!(
            classify(Some("zsh"), Some("/bin/bash"), false),
            ShellType::Zsh
        );
        assert_eq!(
            classify(Some("pwsh.exe"), None, false),
            ShellType::PowerShell
        );
    }

    #[test]
    fn env_used_when_parent_is_unhelpful() {
        assert_eq!(
            classify(Some("tmux: server"), Some("/usr/bin/zsh"), false),
            ShellType::Zsh
        );
        assert_eq!(classify(None, Some("-bash"), false), ShellType::Bash);
    }

    #[test]
    fn platform_default() {
        assert_eq!(classify(Some("fish"), None, true), ShellType::PowerShell);
        assert_eq!(classify(None, None, false), ShellType::Bash);
    }
}
