//! Signals from the host the scheduler consults before running.

use std::io::{BufRead, IsTerminal, Write};
use std::process::Command;

/// Host conditions and user interaction available to a run
pub trait Environment {
    /// Running on battery power
    fn on_battery(&self) -> bool;

    /// A user can answer prompts
    fn is_interactive(&self) -> bool;

    /// Ask a yes/no question; the default answer is no
    fn confirm(&self, question: &str) -> bool;

    /// Deliver a desktop notification, if enabled
    fn notify(&self, title: &str, message: &str);
}

/// The real machine
#[derive(Debug, Clone)]
pub struct SystemEnvironment {
    notifications: bool,
    interactive: bool,
}

impl SystemEnvironment {
    /// Unattended runs never prompt and always notify
    pub fn new(notify: bool, auto: bool) -> Self {
        Self {
            notifications: notify || auto,
            interactive: !auto && std::io::stdin().is_terminal() && std::io::stdout().is_terminal(),
        }
    }
}

impl Environment for SystemEnvironment {
    fn on_battery(&self) -> bool {
        // `pmset` only exists on macOS; anywhere else counts as mains power.
        match Command::new("pmset").args(["-g", "batt"]).output() {
            Ok(output) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout).contains("Battery Power")
            }
            _ => false,
        }
    }

    fn is_interactive(&self) -> bool {
        self.interactive
    }

    fn confirm(&self, question: &str) -> bool {
        if !self.interactive {
            return false;
        }
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{question} [y/N] ");
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    }

    fn notify(&self, title: &str, message: &str) {
        if !self.notifications {
            return;
        }
        tracing::debug!(title = %title, "Sending notification");

        if cfg!(target_os = "macos") {
            let script = format!(
                "display notification \"{}\" with title \"{}\" sound name \"default\"",
                message.replace('"', "\\\""),
                title.replace('"', "\\\"")
            );
            // A failed notification must never fail the backup.
            let _ = Command::new("osascript").args(["-e", &script]).output();
        }
    }
}
